//! Accounts behind a connection, refreshed on every balance fetch.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::MoneyCents;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub user_id: String,
    pub connection_id: Uuid,
    /// Provider account id; unique per user.
    pub external_id: String,
    pub name: String,
    pub account_type: String,
    pub subtype: Option<String>,
    pub current_balance: Option<MoneyCents>,
    pub available_balance: Option<MoneyCents>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "accounts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: String,
    pub connection_id: Uuid,
    pub external_id: String,
    pub name: String,
    pub account_type: String,
    pub subtype: Option<String>,
    pub current_balance: Option<i64>,
    pub available_balance: Option<i64>,
    pub last_synced_at: Option<DateTimeUtc>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::connections::Entity",
        from = "Column::ConnectionId",
        to = "super::connections::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Connection,
    #[sea_orm(has_one = "super::sync_states::Entity")]
    SyncState,
    #[sea_orm(has_many = "super::transactions::Entity")]
    Transactions,
}

impl Related<super::connections::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Connection.def()
    }
}

impl Related<super::sync_states::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SyncState.def()
    }
}

impl Related<super::transactions::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Transactions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for Account {
    fn from(model: Model) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            connection_id: model.connection_id,
            external_id: model.external_id,
            name: model.name,
            account_type: model.account_type,
            subtype: model.subtype,
            current_balance: model.current_balance.map(MoneyCents::new),
            available_balance: model.available_balance.map(MoneyCents::new),
            last_synced_at: model.last_synced_at,
        }
    }
}
