use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveValue, JoinType, QueryFilter, QueryOrder, QuerySelect, RelationTrait, prelude::*,
    sea_query::Expr,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    Budget, BudgetInput, DateWindow, EngineError, MoneyCents, ProcessingStatus, ResultEngine,
    budgets::{self, anchor_column, rolling_days_column},
    resolve_window, transaction_budgets, transactions,
    util::{ensure_positive_amount, error_message, normalize_required_text},
};

use super::{Engine, Job, with_tx};

/// Spending tier of a budget within its current window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetStatus {
    /// Below 70% of the amount.
    Under,
    /// From 70% up to, not including, 100%.
    Near,
    Over,
}

/// Spend of a budget over its current window.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetSummary {
    pub budget_id: Uuid,
    pub window: DateWindow,
    pub amount: MoneyCents,
    pub spent: MoneyCents,
    pub remaining: MoneyCents,
    /// `spent / amount` as a whole percentage, rounded half away from zero.
    pub percentage: i64,
    pub status: BudgetStatus,
}

impl Engine {
    /// Creates a budget and schedules its labeling pass in the background.
    ///
    /// The budget starts as `processing`; it becomes `ready` once every live
    /// transaction has been matched against it.
    pub async fn create_budget(&self, user_id: &str, input: BudgetInput) -> ResultEngine<Uuid> {
        let input = validate_input(input)?;
        let now = Utc::now();
        let budget_id = Uuid::new_v4();

        let active = budgets::ActiveModel {
            id: ActiveValue::Set(budget_id),
            user_id: ActiveValue::Set(user_id.to_string()),
            name: ActiveValue::Set(input.name),
            description: ActiveValue::Set(input.description),
            filter_revision: ActiveValue::Set(0),
            amount: ActiveValue::Set(input.amount.cents()),
            period: ActiveValue::Set(input.period.period.as_str().to_string()),
            rolling_days: ActiveValue::Set(rolling_days_column(&input.period)?),
            anchor_date: ActiveValue::Set(anchor_column(&input.period)),
            archived: ActiveValue::Set(false),
            processing_status: ActiveValue::Set(ProcessingStatus::Processing.as_str().to_string()),
            last_error: ActiveValue::Set(None),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
        };
        active.insert(&self.database).await?;

        self.schedule_relabel(user_id, budget_id).await?;
        Ok(budget_id)
    }

    /// Replaces the budget's fields and schedules a fresh labeling pass.
    ///
    /// When the filter text changes the old associations no longer apply and
    /// are dropped first, and the filter revision moves on so passes still
    /// running against the old text cannot add to the set.
    pub async fn update_budget(
        &self,
        budget_id: Uuid,
        user_id: &str,
        input: BudgetInput,
    ) -> ResultEngine<()> {
        let input = validate_input(input)?;
        let current = self.budget(budget_id, user_id).await?;
        let filter_changed = current.description != input.description;

        let rolling_days = rolling_days_column(&input.period)?;
        let updated: ResultEngine<()> = with_tx!(self, |db_tx| {
            if filter_changed {
                transaction_budgets::Entity::delete_many()
                    .filter(transaction_budgets::Column::BudgetId.eq(budget_id))
                    .exec(&db_tx)
                    .await?;
                budgets::Entity::update_many()
                    .col_expr(
                        budgets::Column::FilterRevision,
                        Expr::col(budgets::Column::FilterRevision).add(1),
                    )
                    .filter(budgets::Column::Id.eq(budget_id))
                    .exec(&db_tx)
                    .await?;
            }

            let active = budgets::ActiveModel {
                id: ActiveValue::Set(budget_id),
                name: ActiveValue::Set(input.name),
                description: ActiveValue::Set(input.description),
                amount: ActiveValue::Set(input.amount.cents()),
                period: ActiveValue::Set(input.period.period.as_str().to_string()),
                rolling_days: ActiveValue::Set(rolling_days),
                anchor_date: ActiveValue::Set(anchor_column(&input.period)),
                processing_status: ActiveValue::Set(
                    ProcessingStatus::Processing.as_str().to_string(),
                ),
                last_error: ActiveValue::Set(None),
                updated_at: ActiveValue::Set(Utc::now()),
                ..Default::default()
            };
            active.update(&db_tx).await?;
            Ok(())
        });
        updated?;

        if filter_changed {
            tracing::debug!(budget_id = %budget_id, "filter changed, associations cleared");
        }
        self.schedule_relabel(user_id, budget_id).await
    }

    /// Archived budgets keep their associations but are skipped by labeling.
    /// Unarchiving schedules a labeling pass to catch up.
    pub async fn set_budget_archived(
        &self,
        budget_id: Uuid,
        user_id: &str,
        archived: bool,
    ) -> ResultEngine<()> {
        let current = self.budget(budget_id, user_id).await?;
        if current.archived == archived {
            return Ok(());
        }

        let mut active = budgets::ActiveModel {
            id: ActiveValue::Set(budget_id),
            archived: ActiveValue::Set(archived),
            updated_at: ActiveValue::Set(Utc::now()),
            ..Default::default()
        };
        if !archived {
            active.processing_status =
                ActiveValue::Set(ProcessingStatus::Processing.as_str().to_string());
            active.last_error = ActiveValue::Set(None);
        }
        active.update(&self.database).await?;

        if archived {
            Ok(())
        } else {
            self.schedule_relabel(user_id, budget_id).await
        }
    }

    pub async fn delete_budget(&self, budget_id: Uuid, user_id: &str) -> ResultEngine<()> {
        with_tx!(self, |db_tx| {
            let deleted = budgets::Entity::delete_many()
                .filter(budgets::Column::Id.eq(budget_id))
                .filter(budgets::Column::UserId.eq(user_id))
                .exec(&db_tx)
                .await?;
            if deleted.rows_affected == 0 {
                return Err(EngineError::KeyNotFound("budget not exists".to_string()));
            }
            transaction_budgets::Entity::delete_many()
                .filter(transaction_budgets::Column::BudgetId.eq(budget_id))
                .exec(&db_tx)
                .await?;
            Ok(())
        })
    }

    pub async fn budget(&self, budget_id: Uuid, user_id: &str) -> ResultEngine<Budget> {
        let model = budgets::Entity::find_by_id(budget_id)
            .filter(budgets::Column::UserId.eq(user_id))
            .one(&self.database)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound("budget not exists".to_string()))?;
        Budget::try_from(model)
    }

    /// Lists every budget of the user, archived ones included.
    pub async fn list_budgets(&self, user_id: &str) -> ResultEngine<Vec<Budget>> {
        budgets::Entity::find()
            .filter(budgets::Column::UserId.eq(user_id))
            .order_by_asc(budgets::Column::CreatedAt)
            .order_by_asc(budgets::Column::Id)
            .all(&self.database)
            .await?
            .into_iter()
            .map(Budget::try_from)
            .collect()
    }

    /// Sums the labeled spend of the budget over the window containing
    /// `now`. Reads the association set only; the classifier is never
    /// called.
    pub async fn budget_summary(
        &self,
        budget_id: Uuid,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> ResultEngine<BudgetSummary> {
        let budget = self.budget(budget_id, user_id).await?;
        let window = resolve_window(&budget.period, now)?;

        let amounts: Vec<i64> = transactions::Entity::find()
            .select_only()
            .column(transactions::Column::Amount)
            .join(
                JoinType::InnerJoin,
                transactions::Relation::TransactionBudgets.def(),
            )
            .filter(transaction_budgets::Column::BudgetId.eq(budget.id))
            .filter(transactions::Column::UserId.eq(user_id))
            .filter(transactions::Column::Date.between(window.start, window.end))
            .filter(transactions::Column::RemovedAt.is_null())
            .into_tuple()
            .all(&self.database)
            .await?;
        let spent = amounts
            .into_iter()
            .try_fold(MoneyCents::ZERO, |total, cents| {
                total.checked_add(MoneyCents::new(cents))
            })
            .ok_or_else(|| {
                EngineError::InvalidState(format!("spend of budget {} overflows", budget.id))
            })?;

        summarize(budget.id, window, budget.amount, spent)
    }

    async fn schedule_relabel(&self, user_id: &str, budget_id: Uuid) -> ResultEngine<()> {
        let job = Job::RelabelBudget {
            user_id: user_id.to_string(),
            budget_id,
        };
        if let Err(err) = self.submit(job).await {
            self.set_processing_status(budget_id, ProcessingStatus::Error, Some(error_message(&err)))
                .await?;
        }
        Ok(())
    }
}

fn validate_input(input: BudgetInput) -> ResultEngine<BudgetInput> {
    let name = normalize_required_text(&input.name, "name")?;
    let description = normalize_required_text(&input.description, "description")?;
    ensure_positive_amount(input.amount)?;
    input.period.validate()?;
    Ok(BudgetInput {
        name,
        description,
        amount: input.amount,
        period: input.period,
    })
}

fn summarize(
    budget_id: Uuid,
    window: DateWindow,
    amount: MoneyCents,
    spent: MoneyCents,
) -> ResultEngine<BudgetSummary> {
    let total = i128::from(amount.cents());
    let used = i128::from(spent.cents());

    let status = if used >= total {
        BudgetStatus::Over
    } else if used * 100 >= total * 70 {
        BudgetStatus::Near
    } else {
        BudgetStatus::Under
    };

    let remaining = amount.checked_sub(spent).ok_or_else(|| {
        EngineError::InvalidState(format!("remaining amount of budget {budget_id} overflows"))
    })?;

    Ok(BudgetSummary {
        budget_id,
        window,
        amount,
        spent,
        remaining,
        percentage: rounded_percentage(used, total),
        status,
    })
}

fn rounded_percentage(used: i128, total: i128) -> i64 {
    if total <= 0 {
        return 0;
    }
    let scaled = used * 100;
    let mut whole = scaled / total;
    let rest = scaled % total;
    if rest.abs() * 2 >= total {
        whole += scaled.signum();
    }
    i64::try_from(whole).unwrap_or(if whole.is_negative() { i64::MIN } else { i64::MAX })
}
