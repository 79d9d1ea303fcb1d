use chrono::Utc;
use sea_orm::{
    ActiveValue, ConnectionTrait, QueryFilter,
    prelude::*,
    sea_query::{Expr, OnConflict},
};
use uuid::Uuid;

use crate::{EngineError, ResultEngine, SyncState, SyncStatus, sync_states};

use super::{Engine, with_tx};

impl Engine {
    /// Returns the sync state of an account.
    pub async fn sync_state(&self, account_id: Uuid) -> ResultEngine<SyncState> {
        let model = load_state(&self.database, account_id).await?;
        SyncState::try_from(model)
    }

    /// Creates the `never_synced` state row for an account if it is missing.
    pub(super) async fn ensure_sync_state<C: ConnectionTrait>(
        db: &C,
        account_id: Uuid,
    ) -> ResultEngine<()> {
        let now = Utc::now();
        let active = sync_states::ActiveModel {
            account_id: ActiveValue::Set(account_id),
            cursor: ActiveValue::Set(None),
            status: ActiveValue::Set(SyncStatus::NeverSynced.as_str().to_string()),
            total_synced: ActiveValue::Set(0),
            last_error: ActiveValue::Set(None),
            last_attempted_at: ActiveValue::Set(None),
            last_synced_at: ActiveValue::Set(None),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
        };
        sync_states::Entity::insert(active)
            .on_conflict(
                OnConflict::column(sync_states::Column::AccountId)
                    .do_nothing()
                    .to_owned(),
            )
            .do_nothing()
            .exec_without_returning(db)
            .await?;
        Ok(())
    }

    /// Moves the account into `syncing`, keeping whatever cursor the last
    /// completed page left behind.
    pub(super) async fn begin_sync(&self, account_id: Uuid) -> ResultEngine<SyncState> {
        with_tx!(self, |db_tx| {
            Self::ensure_sync_state(&db_tx, account_id).await?;
            let model = load_state(&db_tx, account_id).await?;
            let state = SyncState::try_from(model)?;
            state.status.ensure_transition(SyncStatus::Syncing)?;

            let now = Utc::now();
            let active = sync_states::ActiveModel {
                account_id: ActiveValue::Set(account_id),
                status: ActiveValue::Set(SyncStatus::Syncing.as_str().to_string()),
                last_attempted_at: ActiveValue::Set(Some(now)),
                updated_at: ActiveValue::Set(now),
                ..Default::default()
            };
            let model = active.update(&db_tx).await?;
            SyncState::try_from(model)
        })
    }

    /// Stores the cursor reached by a page and bumps the counter. Runs in the
    /// same DB transaction as the page's writes.
    pub(super) async fn record_page<C: ConnectionTrait>(
        db: &C,
        account_id: Uuid,
        cursor: Option<&str>,
        newly_stored: i64,
    ) -> ResultEngine<()> {
        let updated = sync_states::Entity::update_many()
            .col_expr(sync_states::Column::Cursor, Expr::value(cursor.map(str::to_string)))
            .col_expr(
                sync_states::Column::Status,
                Expr::value(SyncStatus::Syncing.as_str()),
            )
            .col_expr(
                sync_states::Column::TotalSynced,
                Expr::col(sync_states::Column::TotalSynced).add(newly_stored),
            )
            .col_expr(sync_states::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(sync_states::Column::AccountId.eq(account_id))
            .filter(sync_states::Column::Status.eq(SyncStatus::Syncing.as_str()))
            .exec(db)
            .await?;
        if updated.rows_affected == 0 {
            return Err(EngineError::InvalidState(format!(
                "account {account_id} is not syncing"
            )));
        }
        Ok(())
    }

    pub(super) async fn complete_sync(&self, account_id: Uuid) -> ResultEngine<()> {
        with_tx!(self, |db_tx| {
            let state = SyncState::try_from(load_state(&db_tx, account_id).await?)?;
            state.status.ensure_transition(SyncStatus::Synced)?;

            let now = Utc::now();
            let active = sync_states::ActiveModel {
                account_id: ActiveValue::Set(account_id),
                status: ActiveValue::Set(SyncStatus::Synced.as_str().to_string()),
                last_error: ActiveValue::Set(None),
                last_synced_at: ActiveValue::Set(Some(now)),
                updated_at: ActiveValue::Set(now),
                ..Default::default()
            };
            active.update(&db_tx).await?;
            Self::stamp_account_synced(&db_tx, account_id, now).await?;
            Ok(())
        })
    }

    pub(super) async fn fail_sync(&self, account_id: Uuid, message: String) -> ResultEngine<()> {
        with_tx!(self, |db_tx| {
            let state = SyncState::try_from(load_state(&db_tx, account_id).await?)?;
            state.status.ensure_transition(SyncStatus::Error)?;

            let active = sync_states::ActiveModel {
                account_id: ActiveValue::Set(account_id),
                status: ActiveValue::Set(SyncStatus::Error.as_str().to_string()),
                last_error: ActiveValue::Set(Some(message)),
                updated_at: ActiveValue::Set(Utc::now()),
                ..Default::default()
            };
            active.update(&db_tx).await?;
            Ok(())
        })
    }
}

async fn load_state<C: ConnectionTrait>(db: &C, account_id: Uuid) -> ResultEngine<sync_states::Model> {
    sync_states::Entity::find_by_id(account_id)
        .one(db)
        .await?
        .ok_or_else(|| EngineError::KeyNotFound(format!("sync state for account {account_id}")))
}
