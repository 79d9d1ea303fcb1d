//! Canonical transaction records.
//!
//! Rows are keyed by the provider transaction id and written with upserts,
//! so replaying a page is harmless. `category` is sticky: upserts merge it
//! with `COALESCE(existing, incoming)` and only a reclassification pass
//! replaces it.

use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{FeedTransaction, MoneyCents};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub user_id: String,
    pub connection_id: Uuid,
    pub account_id: Uuid,
    pub date: NaiveDate,
    pub name: String,
    pub merchant_name: Option<String>,
    /// Signed; positive is money leaving the account.
    pub amount: MoneyCents,
    pub provider_category: Option<String>,
    pub pending: bool,
    pub category: Option<String>,
    pub categorized_at: Option<DateTime<Utc>>,
    pub account_name: Option<String>,
    pub institution_name: Option<String>,
    pub removed_at: Option<DateTime<Utc>>,
}

/// Where a feed transaction lands once stored.
pub(crate) struct Placement<'a> {
    pub user_id: &'a str,
    pub connection_id: Uuid,
    pub account_id: Uuid,
    pub account_name: &'a str,
    pub institution_name: &'a str,
}

impl Transaction {
    pub(crate) fn from_feed(entry: &FeedTransaction, placement: &Placement<'_>) -> Self {
        Self {
            id: entry.transaction_id.clone(),
            user_id: placement.user_id.to_string(),
            connection_id: placement.connection_id,
            account_id: placement.account_id,
            date: entry.date,
            name: entry.name.clone(),
            merchant_name: entry.merchant_name.clone(),
            amount: entry.amount,
            provider_category: entry.provider_category.clone(),
            pending: entry.pending,
            category: None,
            categorized_at: None,
            account_name: Some(placement.account_name.to_string()),
            institution_name: Some(placement.institution_name.to_string()),
            removed_at: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "transactions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub user_id: String,
    pub connection_id: Uuid,
    pub account_id: Uuid,
    pub date: Date,
    pub name: String,
    pub merchant_name: Option<String>,
    pub amount: i64,
    pub provider_category: Option<String>,
    pub pending: bool,
    pub category: Option<String>,
    pub categorized_at: Option<DateTimeUtc>,
    pub account_name: Option<String>,
    pub institution_name: Option<String>,
    pub removed_at: Option<DateTimeUtc>,
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
    #[sea_orm(has_many = "super::transaction_budgets::Entity")]
    TransactionBudgets,
}

impl Related<super::accounts::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Account.def()
    }
}

impl Related<super::transaction_budgets::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TransactionBudgets.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl ActiveModel {
    /// Builds the row written by a sync upsert.
    pub(crate) fn for_upsert(tx: &Transaction, now: DateTime<Utc>) -> Self {
        Self {
            id: ActiveValue::Set(tx.id.clone()),
            user_id: ActiveValue::Set(tx.user_id.clone()),
            connection_id: ActiveValue::Set(tx.connection_id),
            account_id: ActiveValue::Set(tx.account_id),
            date: ActiveValue::Set(tx.date),
            name: ActiveValue::Set(tx.name.clone()),
            merchant_name: ActiveValue::Set(tx.merchant_name.clone()),
            amount: ActiveValue::Set(tx.amount.cents()),
            provider_category: ActiveValue::Set(tx.provider_category.clone()),
            pending: ActiveValue::Set(tx.pending),
            category: ActiveValue::Set(tx.category.clone()),
            categorized_at: ActiveValue::Set(tx.categorized_at),
            account_name: ActiveValue::Set(tx.account_name.clone()),
            institution_name: ActiveValue::Set(tx.institution_name.clone()),
            removed_at: ActiveValue::Set(None),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
        }
    }
}

impl From<Model> for Transaction {
    fn from(model: Model) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            connection_id: model.connection_id,
            account_id: model.account_id,
            date: model.date,
            name: model.name,
            merchant_name: model.merchant_name,
            amount: MoneyCents::new(model.amount),
            provider_category: model.provider_category,
            pending: model.pending,
            category: model.category,
            categorized_at: model.categorized_at,
            account_name: model.account_name,
            institution_name: model.institution_name,
            removed_at: model.removed_at,
        }
    }
}
