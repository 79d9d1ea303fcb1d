use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveValue, ConnectionTrait, QueryFilter, QueryOrder,
    prelude::*,
    sea_query::{Expr, OnConflict, Query},
};
use uuid::Uuid;

use crate::{Account, Connection, EngineError, FeedAccount, ResultEngine, accounts, transactions};

use super::{Engine, with_tx};

impl Engine {
    /// Returns an account owned by `user_id`.
    pub async fn account(&self, account_id: Uuid, user_id: &str) -> ResultEngine<Account> {
        let model = accounts::Entity::find_by_id(account_id)
            .filter(accounts::Column::UserId.eq(user_id))
            .one(&self.database)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound("account not exists".to_string()))?;
        Ok(Account::from(model))
    }

    /// Lists the accounts of a connection, oldest first.
    pub async fn accounts_for_connection(
        &self,
        connection_id: Uuid,
        user_id: &str,
    ) -> ResultEngine<Vec<Account>> {
        let models = accounts::Entity::find()
            .filter(accounts::Column::ConnectionId.eq(connection_id))
            .filter(accounts::Column::UserId.eq(user_id))
            .order_by_asc(accounts::Column::CreatedAt)
            .order_by_asc(accounts::Column::Id)
            .all(&self.database)
            .await?;
        Ok(models.into_iter().map(Account::from).collect())
    }

    /// Upserts the accounts returned by a balance refresh.
    ///
    /// Accounts are keyed by `(user_id, external_id)`; an existing row keeps
    /// its id and gets fresh names and balances. An account that moved here
    /// from another connection takes its stored transactions along.
    pub(super) async fn upsert_accounts(
        &self,
        connection: &Connection,
        feed_accounts: &[FeedAccount],
    ) -> ResultEngine<usize> {
        if feed_accounts.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        with_tx!(self, |db_tx| {
            for entry in feed_accounts {
                let active = accounts::ActiveModel {
                    id: ActiveValue::Set(Uuid::new_v4()),
                    user_id: ActiveValue::Set(connection.user_id.clone()),
                    connection_id: ActiveValue::Set(connection.id),
                    external_id: ActiveValue::Set(entry.account_id.clone()),
                    name: ActiveValue::Set(entry.name.clone()),
                    account_type: ActiveValue::Set(entry.account_type.clone()),
                    subtype: ActiveValue::Set(entry.subtype.clone()),
                    current_balance: ActiveValue::Set(entry.current_balance.map(i64::from)),
                    available_balance: ActiveValue::Set(entry.available_balance.map(i64::from)),
                    last_synced_at: ActiveValue::Set(None),
                    created_at: ActiveValue::Set(now),
                    updated_at: ActiveValue::Set(now),
                };
                accounts::Entity::insert(active)
                    .on_conflict(
                        OnConflict::columns([
                            accounts::Column::UserId,
                            accounts::Column::ExternalId,
                        ])
                        .update_columns([
                            accounts::Column::ConnectionId,
                            accounts::Column::Name,
                            accounts::Column::AccountType,
                            accounts::Column::Subtype,
                            accounts::Column::CurrentBalance,
                            accounts::Column::AvailableBalance,
                            accounts::Column::UpdatedAt,
                        ])
                        .to_owned(),
                    )
                    .exec_without_returning(&db_tx)
                    .await?;
            }

            let moved = transactions::Entity::update_many()
                .col_expr(transactions::Column::ConnectionId, Expr::value(connection.id))
                .col_expr(
                    transactions::Column::InstitutionName,
                    Expr::value(Some(connection.institution_name.clone())),
                )
                .col_expr(transactions::Column::UpdatedAt, Expr::value(now))
                .filter(
                    transactions::Column::AccountId.in_subquery(
                        Query::select()
                            .column(accounts::Column::Id)
                            .from(accounts::Entity)
                            .and_where(accounts::Column::ConnectionId.eq(connection.id))
                            .to_owned(),
                    ),
                )
                .filter(transactions::Column::ConnectionId.ne(connection.id))
                .exec(&db_tx)
                .await?;
            if moved.rows_affected > 0 {
                tracing::info!(
                    connection_id = %connection.id,
                    transactions = moved.rows_affected,
                    "transactions moved with their account"
                );
            }
            Ok(feed_accounts.len())
        })
    }

    pub(super) async fn stamp_account_synced<C: ConnectionTrait>(
        db: &C,
        account_id: Uuid,
        at: DateTime<Utc>,
    ) -> ResultEngine<()> {
        accounts::Entity::update_many()
            .col_expr(accounts::Column::LastSyncedAt, Expr::value(Some(at)))
            .filter(accounts::Column::Id.eq(account_id))
            .exec(db)
            .await?;
        Ok(())
    }
}
