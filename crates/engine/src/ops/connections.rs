use chrono::Utc;
use sea_orm::{ActiveValue, ConnectionTrait, QueryFilter, QueryOrder, Statement, prelude::*};
use uuid::Uuid;

use crate::{
    Connection, ConnectionStatus, Credential, EngineError, ResultEngine, connections,
    util::{error_message, normalize_required_text},
};

use super::{AccountSyncReport, Engine, Job, with_tx};

/// Result of syncing one account as part of a connection sync.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccountOutcome {
    Synced {
        account_id: Uuid,
        report: AccountSyncReport,
    },
    Failed {
        account_id: Uuid,
        error: String,
    },
}

impl AccountOutcome {
    pub fn account_id(&self) -> Uuid {
        match self {
            Self::Synced { account_id, .. } | Self::Failed { account_id, .. } => *account_id,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionSyncReport {
    pub connection_id: Uuid,
    /// Set when the balance refresh or the account listing failed.
    pub connection_error: Option<String>,
    pub accounts: Vec<AccountOutcome>,
}

impl ConnectionSyncReport {
    pub fn failed(&self) -> usize {
        self.accounts.iter().filter(|outcome| outcome.is_failed()).count()
    }
}

impl Engine {
    /// Stores a newly linked institution and schedules its first sync.
    ///
    /// The credential handle is stored as given; turning it into a provider
    /// access token is up to the feed.
    pub async fn link_connection(
        &self,
        user_id: &str,
        institution_name: &str,
        environment: &str,
        credential: Credential,
    ) -> ResultEngine<Uuid> {
        let institution_name = normalize_required_text(institution_name, "institution name")?;
        let environment = normalize_required_text(environment, "environment")?;
        let now = Utc::now();

        let connection = Connection {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            institution_name,
            environment,
            credential,
            status: ConnectionStatus::Active,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        connections::ActiveModel::from(&connection)
            .insert(&self.database)
            .await?;
        tracing::info!(connection_id = %connection.id, user_id, "connection linked");

        let job = Job::SyncConnection {
            user_id: user_id.to_string(),
            connection_id: connection.id,
        };
        if let Err(err) = self.submit(job).await {
            self.set_connection_status(connection.id, ConnectionStatus::Error, Some(error_message(&err)))
                .await?;
        }
        Ok(connection.id)
    }

    pub async fn connection(&self, connection_id: Uuid, user_id: &str) -> ResultEngine<Connection> {
        let model = connections::Entity::find_by_id(connection_id)
            .filter(connections::Column::UserId.eq(user_id))
            .one(&self.database)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound("connection not exists".to_string()))?;
        Connection::try_from(model)
    }

    pub async fn list_connections(&self, user_id: &str) -> ResultEngine<Vec<Connection>> {
        connections::Entity::find()
            .filter(connections::Column::UserId.eq(user_id))
            .order_by_asc(connections::Column::CreatedAt)
            .order_by_asc(connections::Column::Id)
            .all(&self.database)
            .await?
            .into_iter()
            .map(Connection::try_from)
            .collect()
    }

    /// Every connection tagged with `environment`, across users.
    pub(super) async fn connections_in_environment(
        &self,
        environment: &str,
    ) -> ResultEngine<Vec<Connection>> {
        connections::Entity::find()
            .filter(connections::Column::Environment.eq(environment))
            .order_by_asc(connections::Column::CreatedAt)
            .order_by_asc(connections::Column::Id)
            .all(&self.database)
            .await?
            .into_iter()
            .map(Connection::try_from)
            .collect()
    }

    /// Disconnects an institution, dropping its accounts, their sync state,
    /// their transactions and those transactions' budget associations.
    pub async fn delete_connection(&self, connection_id: Uuid, user_id: &str) -> ResultEngine<()> {
        with_tx!(self, |db_tx| {
            let owned = connections::Entity::find_by_id(connection_id)
                .filter(connections::Column::UserId.eq(user_id))
                .one(&db_tx)
                .await?;
            if owned.is_none() {
                return Err(EngineError::KeyNotFound("connection not exists".to_string()));
            }

            let backend = self.database.get_database_backend();
            // Transactions follow their account, not the connection they were
            // first synced under.
            let statements = [
                "DELETE FROM transaction_budgets WHERE transaction_id IN (SELECT id FROM transactions WHERE account_id IN (SELECT id FROM accounts WHERE connection_id = ?));",
                "DELETE FROM transactions WHERE account_id IN (SELECT id FROM accounts WHERE connection_id = ?);",
                "DELETE FROM sync_states WHERE account_id IN (SELECT id FROM accounts WHERE connection_id = ?);",
                "DELETE FROM accounts WHERE connection_id = ?;",
                "DELETE FROM connections WHERE id = ?;",
            ];
            for sql in statements {
                db_tx
                    .execute(Statement::from_sql_and_values(
                        backend,
                        sql,
                        vec![connection_id.into()],
                    ))
                    .await?;
            }
            tracing::info!(connection_id = %connection_id, "connection deleted");
            Ok(())
        })
    }

    /// Refreshes balances, then syncs every account of the connection one
    /// after the other.
    ///
    /// Failures are isolated per account and reported in the outcome list;
    /// the only error returned is an unknown connection.
    #[tracing::instrument(level = "info", skip(self, credential))]
    pub async fn sync_connection(
        &self,
        connection_id: Uuid,
        user_id: &str,
        credential: &Credential,
    ) -> ResultEngine<ConnectionSyncReport> {
        let connection = self.connection(connection_id, user_id).await?;
        let mut report = ConnectionSyncReport {
            connection_id,
            connection_error: None,
            accounts: Vec::new(),
        };

        let refreshed = async {
            let feed_accounts = self
                .feed_call("account balances", self.feed.fetch_accounts(credential))
                .await?;
            self.upsert_accounts(&connection, &feed_accounts).await
        }
        .await;
        let status = match refreshed {
            Ok(count) => {
                tracing::debug!(accounts = count, "balances refreshed");
                self.set_connection_status(connection_id, ConnectionStatus::Active, None)
                    .await
            }
            Err(err) => {
                tracing::warn!("balance refresh failed: {err}");
                let message = error_message(&err);
                report.connection_error = Some(message.clone());
                self.set_connection_status(connection_id, ConnectionStatus::Error, Some(message))
                    .await
            }
        };
        if let Err(err) = status {
            tracing::warn!("cannot record connection status: {err}");
        }

        let accounts = match self.accounts_for_connection(connection_id, user_id).await {
            Ok(accounts) => accounts,
            Err(err) => {
                tracing::warn!("cannot list accounts: {err}");
                report.connection_error = Some(error_message(&err));
                return Ok(report);
            }
        };

        for account in accounts {
            let outcome = match Self::ensure_sync_state(&self.database, account.id).await {
                Ok(()) => {
                    self.sync_account(account.id, credential, user_id, connection_id)
                        .await
                }
                Err(err) => Err(err),
            };
            report.accounts.push(match outcome {
                Ok(account_report) => AccountOutcome::Synced {
                    account_id: account.id,
                    report: account_report,
                },
                Err(err) => {
                    tracing::warn!(account_id = %account.id, "account sync failed: {err}");
                    AccountOutcome::Failed {
                        account_id: account.id,
                        error: error_message(&err),
                    }
                }
            });
        }

        tracing::info!(
            accounts = report.accounts.len(),
            failed = report.failed(),
            "connection sync finished"
        );
        Ok(report)
    }

    async fn set_connection_status(
        &self,
        connection_id: Uuid,
        status: ConnectionStatus,
        last_error: Option<String>,
    ) -> ResultEngine<()> {
        let active = connections::ActiveModel {
            id: ActiveValue::Set(connection_id),
            status: ActiveValue::Set(status.as_str().to_string()),
            last_error: ActiveValue::Set(last_error),
            updated_at: ActiveValue::Set(Utc::now()),
            ..Default::default()
        };
        active.update(&self.database).await?;
        Ok(())
    }
}
