//! Per-account synchronization state.
//!
//! One row per account holding the provider cursor and the status of the
//! last run. The cursor is only ever advanced after a page has been stored,
//! so a crashed sync resumes from the last completed page.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EngineError, ResultEngine};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    NeverSynced,
    Syncing,
    Synced,
    Error,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NeverSynced => "never_synced",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Error => "error",
        }
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// Any state may (re)enter `syncing`: a row left in `syncing` by a crash
    /// is resumed by the next run. `synced` and `error` are only reachable
    /// from `syncing`.
    pub fn can_transition_to(self, next: SyncStatus) -> bool {
        match next {
            SyncStatus::Syncing => true,
            SyncStatus::Synced | SyncStatus::Error => self == SyncStatus::Syncing,
            SyncStatus::NeverSynced => false,
        }
    }

    pub(crate) fn ensure_transition(self, next: SyncStatus) -> ResultEngine<()> {
        if self.can_transition_to(next) {
            return Ok(());
        }
        Err(EngineError::InvalidState(format!(
            "sync state cannot move from {} to {}",
            self.as_str(),
            next.as_str()
        )))
    }
}

impl TryFrom<&str> for SyncStatus {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, EngineError> {
        match value {
            "never_synced" => Ok(SyncStatus::NeverSynced),
            "syncing" => Ok(SyncStatus::Syncing),
            "synced" => Ok(SyncStatus::Synced),
            "error" => Ok(SyncStatus::Error),
            other => Err(EngineError::InvalidState(format!(
                "invalid sync status: {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub account_id: Uuid,
    /// Opaque provider cursor; `None` means the next run pulls full history.
    pub cursor: Option<String>,
    pub status: SyncStatus,
    /// Distinct transactions first stored by syncs of this account.
    pub total_synced: i64,
    pub last_error: Option<String>,
    pub last_attempted_at: Option<DateTime<Utc>>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "sync_states")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub account_id: Uuid,
    pub cursor: Option<String>,
    pub status: String,
    pub total_synced: i64,
    pub last_error: Option<String>,
    pub last_attempted_at: Option<DateTimeUtc>,
    pub last_synced_at: Option<DateTimeUtc>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::accounts::Entity",
        from = "Column::AccountId",
        to = "super::accounts::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Account,
}

impl Related<super::accounts::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Account.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for SyncState {
    type Error = EngineError;

    fn try_from(model: Model) -> ResultEngine<Self> {
        Ok(Self {
            account_id: model.account_id,
            cursor: model.cursor,
            status: SyncStatus::try_from(model.status.as_str())?,
            total_synced: model.total_synced,
            last_error: model.last_error,
            last_attempted_at: model.last_attempted_at,
            last_synced_at: model.last_synced_at,
            updated_at: model.updated_at,
        })
    }
}
