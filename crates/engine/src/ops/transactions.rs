use std::collections::{HashMap, HashSet};

use chrono::{NaiveDate, Utc};
use sea_orm::{
    ActiveValue, ConnectionTrait, QueryFilter, QueryOrder, QuerySelect,
    prelude::*,
    sea_query::{Expr, OnConflict},
};
use uuid::Uuid;

use crate::{
    EngineError, ResultEngine, Transaction, TransactionFacts, categorization_rules,
    transaction_budgets, transactions, util::normalize_category,
};

use super::{Engine, Job};

/// Rows per multi-row upsert statement.
const UPSERT_CHUNK: usize = 100;

/// Filters for listing transactions.
///
/// `from` and `to` are inclusive calendar dates (UTC).
#[derive(Clone, Debug, Default)]
pub struct TransactionListFilter {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub account_id: Option<Uuid>,
    /// If true, includes transactions the provider has removed.
    pub include_removed: bool,
}

impl Engine {
    /// Returns a transaction owned by `user_id`, removed or not.
    pub async fn transaction(&self, transaction_id: &str, user_id: &str) -> ResultEngine<Transaction> {
        let model = transactions::Entity::find_by_id(transaction_id.to_string())
            .filter(transactions::Column::UserId.eq(user_id))
            .one(&self.database)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound("transaction not exists".to_string()))?;
        Ok(Transaction::from(model))
    }

    /// Lists a user's transactions, newest first.
    pub async fn list_transactions(
        &self,
        user_id: &str,
        filter: &TransactionListFilter,
    ) -> ResultEngine<Vec<Transaction>> {
        if let (Some(from), Some(to)) = (filter.from, filter.to)
            && from > to
        {
            return Err(EngineError::Configuration(
                "invalid range: from must be <= to".to_string(),
            ));
        }

        let mut query = transactions::Entity::find().filter(transactions::Column::UserId.eq(user_id));
        if let Some(from) = filter.from {
            query = query.filter(transactions::Column::Date.gte(from));
        }
        if let Some(to) = filter.to {
            query = query.filter(transactions::Column::Date.lte(to));
        }
        if let Some(account_id) = filter.account_id {
            query = query.filter(transactions::Column::AccountId.eq(account_id));
        }
        if !filter.include_removed {
            query = query.filter(transactions::Column::RemovedAt.is_null());
        }

        let models = query
            .order_by_desc(transactions::Column::Date)
            .order_by_asc(transactions::Column::Id)
            .all(&self.database)
            .await?;
        Ok(models.into_iter().map(Transaction::from).collect())
    }

    /// Returns the budget association set of a transaction.
    pub async fn budget_ids_for_transaction(&self, transaction_id: &str) -> ResultEngine<Vec<Uuid>> {
        let rows = transaction_budgets::Entity::find()
            .filter(transaction_budgets::Column::TransactionId.eq(transaction_id))
            .order_by_asc(transaction_budgets::Column::BudgetId)
            .all(&self.database)
            .await?;
        Ok(rows.into_iter().map(|row| row.budget_id).collect())
    }

    /// Stores the user's categorization rules and schedules a fresh
    /// classification of their history.
    pub async fn set_categorization_rules(&self, user_id: &str, rules: &str) -> ResultEngine<()> {
        let active = categorization_rules::ActiveModel {
            user_id: ActiveValue::Set(user_id.to_string()),
            rules: ActiveValue::Set(rules.trim().to_string()),
            updated_at: ActiveValue::Set(Utc::now()),
        };
        categorization_rules::Entity::insert(active)
            .on_conflict(
                OnConflict::column(categorization_rules::Column::UserId)
                    .update_columns([
                        categorization_rules::Column::Rules,
                        categorization_rules::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.database)
            .await?;

        self.submit(Job::Reclassify {
            user_id: user_id.to_string(),
        })
        .await
    }

    /// Classifies every live transaction of the user again, replacing the
    /// stored categories. This is the only path that overwrites a category.
    ///
    /// Batches the classifier fails on keep their previous categories.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn reclassify_transactions(&self, user_id: &str) -> ResultEngine<usize> {
        let mut live = self
            .list_transactions(user_id, &TransactionListFilter::default())
            .await?;
        for tx in &mut live {
            tx.category = None;
            tx.categorized_at = None;
        }
        self.classify_transactions(user_id, &mut live).await?;

        let now = Utc::now();
        let mut updated = 0;
        for tx in live.iter().filter(|tx| tx.category.is_some()) {
            transactions::Entity::update_many()
                .col_expr(transactions::Column::Category, Expr::value(tx.category.clone()))
                .col_expr(transactions::Column::CategorizedAt, Expr::value(tx.categorized_at))
                .col_expr(transactions::Column::UpdatedAt, Expr::value(now))
                .filter(transactions::Column::Id.eq(tx.id.as_str()))
                .exec(&self.database)
                .await?;
            updated += 1;
        }
        tracing::info!(user_id, updated, "reclassified transactions");
        Ok(updated)
    }

    /// Fills `category` on the given transactions using the classifier.
    ///
    /// Classifier failures are logged and leave the batch uncategorized;
    /// only storage errors are returned.
    pub(super) async fn classify_transactions(
        &self,
        user_id: &str,
        items: &mut [Transaction],
    ) -> ResultEngine<usize> {
        if items.is_empty() {
            return Ok(0);
        }

        let rules = categorization_rules::Entity::find_by_id(user_id.to_string())
            .one(&self.database)
            .await?
            .map(|row| row.rules)
            .filter(|rules| !rules.is_empty());

        let mut classified = 0;
        for chunk in items.chunks_mut(self.classifier_batch_size()) {
            let facts: Vec<TransactionFacts> = chunk.iter().map(TransactionFacts::from).collect();
            let answer = self
                .classifier_call(
                    "classify",
                    self.classifier.classify(&facts, rules.as_deref()),
                )
                .await;
            let labels = match answer {
                Ok(labels) => labels,
                Err(err) => {
                    tracing::warn!(user_id, batch = chunk.len(), "classification failed: {err}");
                    continue;
                }
            };

            let by_id: HashMap<String, String> = labels
                .into_iter()
                .filter_map(|label| {
                    normalize_category(&label.category).map(|category| (label.transaction_id, category))
                })
                .collect();
            let now = Utc::now();
            for tx in chunk.iter_mut() {
                if let Some(category) = by_id.get(&tx.id) {
                    tx.category = Some(category.clone());
                    tx.categorized_at = Some(now);
                    classified += 1;
                }
            }
        }
        Ok(classified)
    }

    /// Upserts transactions by provider id and returns how many were not
    /// stored before.
    ///
    /// Existing categories are never overwritten and a re-delivered
    /// transaction is un-removed.
    pub(super) async fn upsert_transactions<C: ConnectionTrait>(
        db: &C,
        items: &[Transaction],
    ) -> ResultEngine<i64> {
        let now = Utc::now();
        let mut newly_stored = 0;

        for chunk in items.chunks(UPSERT_CHUNK) {
            let ids: Vec<String> = chunk.iter().map(|tx| tx.id.clone()).collect();
            let existing: HashSet<String> = transactions::Entity::find()
                .select_only()
                .column(transactions::Column::Id)
                .filter(transactions::Column::Id.is_in(ids.clone()))
                .into_tuple::<String>()
                .all(db)
                .await?
                .into_iter()
                .collect();
            let fresh: HashSet<&String> = ids.iter().filter(|id| !existing.contains(*id)).collect();
            newly_stored += fresh.len() as i64;

            let rows = chunk
                .iter()
                .map(|tx| transactions::ActiveModel::for_upsert(tx, now));
            transactions::Entity::insert_many(rows)
                .on_conflict(
                    OnConflict::column(transactions::Column::Id)
                        .update_columns([
                            transactions::Column::AccountId,
                            transactions::Column::ConnectionId,
                            transactions::Column::Date,
                            transactions::Column::Name,
                            transactions::Column::MerchantName,
                            transactions::Column::Amount,
                            transactions::Column::ProviderCategory,
                            transactions::Column::Pending,
                            transactions::Column::AccountName,
                            transactions::Column::InstitutionName,
                            transactions::Column::RemovedAt,
                            transactions::Column::UpdatedAt,
                        ])
                        .values([
                            (
                                transactions::Column::Category,
                                Expr::cust(
                                    r#"COALESCE("transactions"."category", "excluded"."category")"#,
                                ),
                            ),
                            (
                                transactions::Column::CategorizedAt,
                                Expr::cust(
                                    r#"COALESCE("transactions"."categorized_at", "excluded"."categorized_at")"#,
                                ),
                            ),
                        ])
                        .to_owned(),
                )
                .exec_without_returning(db)
                .await?;
        }

        Ok(newly_stored)
    }

    /// Marks transactions the provider removed. Rows are kept so budget
    /// history stays auditable; reads skip them.
    pub(super) async fn soft_delete_transactions<C: ConnectionTrait>(
        db: &C,
        user_id: &str,
        ids: &[String],
    ) -> ResultEngine<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let now = Utc::now();
        let result = transactions::Entity::update_many()
            .col_expr(transactions::Column::RemovedAt, Expr::value(Some(now)))
            .col_expr(transactions::Column::UpdatedAt, Expr::value(now))
            .filter(transactions::Column::UserId.eq(user_id))
            .filter(transactions::Column::Id.is_in(ids.iter().cloned()))
            .filter(transactions::Column::RemovedAt.is_null())
            .exec(db)
            .await?;
        Ok(result.rows_affected)
    }
}
