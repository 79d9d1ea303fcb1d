//! User-defined spending budgets.

use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{BudgetPeriod, EngineError, MoneyCents, PeriodDefinition, ResultEngine};

/// Progress of the background labeling pass for a budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Processing,
    Ready,
    Error,
}

impl ProcessingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Error => "error",
        }
    }
}

impl TryFrom<&str> for ProcessingStatus {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, EngineError> {
        match value {
            "processing" => Ok(ProcessingStatus::Processing),
            "ready" => Ok(ProcessingStatus::Ready),
            "error" => Ok(ProcessingStatus::Error),
            other => Err(EngineError::InvalidState(format!(
                "invalid processing status: {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    /// Natural-language filter handed to the classifier.
    pub description: String,
    /// Bumped whenever `description` changes. Labeling passes started on an
    /// older revision store nothing.
    pub filter_revision: i32,
    pub amount: MoneyCents,
    pub period: PeriodDefinition,
    pub archived: bool,
    pub processing_status: ProcessingStatus,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// User-provided fields for creating or updating a budget.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BudgetInput {
    pub name: String,
    pub description: String,
    pub amount: MoneyCents,
    pub period: PeriodDefinition,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "budgets")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    pub description: String,
    pub filter_revision: i32,
    pub amount: i64,
    pub period: String,
    pub rolling_days: Option<i32>,
    pub anchor_date: Option<Date>,
    pub archived: bool,
    pub processing_status: String,
    pub last_error: Option<String>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::transaction_budgets::Entity")]
    TransactionBudgets,
}

impl Related<super::transaction_budgets::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TransactionBudgets.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for Budget {
    type Error = EngineError;

    fn try_from(model: Model) -> ResultEngine<Self> {
        let rolling_days = model
            .rolling_days
            .map(|days| {
                u32::try_from(days).map_err(|_| {
                    EngineError::InvalidState(format!("invalid rolling day count: {days}"))
                })
            })
            .transpose()?;

        Ok(Self {
            id: model.id,
            user_id: model.user_id,
            name: model.name,
            description: model.description,
            filter_revision: model.filter_revision,
            amount: MoneyCents::new(model.amount),
            period: PeriodDefinition {
                period: BudgetPeriod::try_from(model.period.as_str())?,
                rolling_days,
                anchor_date: model.anchor_date,
            },
            archived: model.archived,
            processing_status: ProcessingStatus::try_from(model.processing_status.as_str())?,
            last_error: model.last_error,
            updated_at: model.updated_at,
        })
    }
}

pub(crate) fn anchor_column(period: &PeriodDefinition) -> Option<NaiveDate> {
    match period.period {
        BudgetPeriod::Rolling => None,
        _ => period.anchor_date,
    }
}

pub(crate) fn rolling_days_column(period: &PeriodDefinition) -> ResultEngine<Option<i32>> {
    match period.period {
        BudgetPeriod::Rolling => period
            .rolling_days
            .map(|days| {
                i32::try_from(days).map_err(|_| {
                    EngineError::Configuration(format!("rolling day count too large: {days}"))
                })
            })
            .transpose(),
        _ => Ok(None),
    }
}
