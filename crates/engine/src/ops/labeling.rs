use std::collections::HashSet;

use chrono::Utc;
use sea_orm::{ConnectionTrait, QueryFilter, Statement, prelude::*, sea_query::Expr};
use uuid::Uuid;

use crate::{
    Budget, EngineError, ProcessingStatus, ResultEngine, Transaction, TransactionFacts, budgets,
    util::error_message,
};

use super::{Engine, TransactionListFilter, with_tx};

/// Stores a pair only while the budget still carries the filter revision
/// the match was made for.
const APPEND_ASSOCIATION: &str = "INSERT INTO transaction_budgets (transaction_id, budget_id) \
     SELECT ?, ? WHERE EXISTS (SELECT 1 FROM budgets WHERE id = ? AND filter_revision = ?) \
     ON CONFLICT DO NOTHING;";

/// How a matching pass over one budget ended.
#[derive(Debug, PartialEq, Eq)]
enum Pass {
    Stored(usize),
    /// The budget's filter changed while the pass ran; nothing more was
    /// stored and the pass queued by the change takes over.
    Superseded,
}

/// Outcome of labeling a set of transactions against the user's budgets.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelingReport {
    /// Budgets the transactions were matched against.
    pub budgets: usize,
    /// Associations reported by the classifier.
    pub matched: usize,
    /// Budgets left in `error` by this pass.
    pub failed_budgets: usize,
}

impl Engine {
    /// Matches freshly synced transactions against every non-archived budget
    /// of the user and appends the matches to the association set.
    ///
    /// Never fails: classifier errors mark the budget as `error` and are
    /// counted in the report.
    #[tracing::instrument(level = "info", skip(self, transactions), fields(count = transactions.len()))]
    pub async fn label_for_new_transactions(
        &self,
        user_id: &str,
        transactions: &[Transaction],
    ) -> LabelingReport {
        let mut report = LabelingReport::default();
        if transactions.is_empty() {
            return report;
        }

        let budgets = match self.list_budgets(user_id).await {
            Ok(budgets) => budgets,
            Err(err) => {
                tracing::warn!("cannot load budgets for labeling: {err}");
                return report;
            }
        };

        for budget in budgets.iter().filter(|budget| !budget.archived) {
            report.budgets += 1;
            match self.match_and_store(budget, transactions).await {
                Ok(Pass::Stored(matched)) => report.matched += matched,
                Ok(Pass::Superseded) => {
                    tracing::debug!(budget_id = %budget.id, "filter changed during labeling");
                }
                Err(err) => {
                    tracing::warn!(budget_id = %budget.id, "labeling failed: {err}");
                    report.failed_budgets += 1;
                    self.record_labeling_failure(budget, &err).await;
                }
            }
        }
        report
    }

    /// Full labeling pass of one budget over the user's live transactions.
    ///
    /// Success moves the budget to `ready`; any failure moves it to `error`
    /// with the message and is returned. Both only apply while `budget`
    /// still has the stored filter revision: a pass made stale by an update
    /// stops storing and leaves the status to the newer pass.
    #[tracing::instrument(level = "info", skip(self, budget), fields(budget_id = %budget.id))]
    pub async fn label_for_budget(&self, user_id: &str, budget: &Budget) -> ResultEngine<usize> {
        if budget.user_id != user_id {
            return Err(EngineError::KeyNotFound("budget not exists".to_string()));
        }
        if budget.archived {
            self.set_processing_status(budget.id, ProcessingStatus::Ready, None)
                .await?;
            return Ok(0);
        }

        let outcome = async {
            let live = self
                .list_transactions(user_id, &TransactionListFilter::default())
                .await?;
            self.match_and_store(budget, &live).await
        }
        .await;

        match outcome {
            Ok(Pass::Stored(matched)) => {
                self.finish_pass(budget, ProcessingStatus::Ready, None).await?;
                Ok(matched)
            }
            Ok(Pass::Superseded) => {
                tracing::info!("filter changed during labeling, pass dropped");
                Ok(0)
            }
            Err(err) => {
                self.record_labeling_failure(budget, &err).await;
                Err(err)
            }
        }
    }

    /// Runs a full labeling pass for every non-archived budget of the user.
    /// Per-budget failures are left on the budgets.
    pub async fn relabel_all_budgets(&self, user_id: &str) -> ResultEngine<()> {
        let budgets = self.list_budgets(user_id).await?;
        for budget in budgets.iter().filter(|budget| !budget.archived) {
            if let Err(err) = self.label_for_budget(user_id, budget).await {
                tracing::warn!(budget_id = %budget.id, "relabel failed: {err}");
            }
        }
        Ok(())
    }

    pub(super) async fn set_processing_status(
        &self,
        budget_id: Uuid,
        status: ProcessingStatus,
        last_error: Option<String>,
    ) -> ResultEngine<()> {
        budgets::Entity::update_many()
            .col_expr(budgets::Column::ProcessingStatus, Expr::value(status.as_str()))
            .col_expr(budgets::Column::LastError, Expr::value(last_error))
            .col_expr(budgets::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(budgets::Column::Id.eq(budget_id))
            .exec(&self.database)
            .await?;
        Ok(())
    }

    /// Sets the outcome of a pass unless the budget's filter has moved on.
    async fn finish_pass(
        &self,
        budget: &Budget,
        status: ProcessingStatus,
        last_error: Option<String>,
    ) -> ResultEngine<()> {
        budgets::Entity::update_many()
            .col_expr(budgets::Column::ProcessingStatus, Expr::value(status.as_str()))
            .col_expr(budgets::Column::LastError, Expr::value(last_error))
            .col_expr(budgets::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(budgets::Column::Id.eq(budget.id))
            .filter(budgets::Column::FilterRevision.eq(budget.filter_revision))
            .exec(&self.database)
            .await?;
        Ok(())
    }

    async fn record_labeling_failure(&self, budget: &Budget, err: &EngineError) {
        if let Err(store_err) = self
            .finish_pass(budget, ProcessingStatus::Error, Some(error_message(err)))
            .await
        {
            tracing::error!(budget_id = %budget.id, "cannot record labeling failure: {store_err}");
        }
    }

    /// Sends the transactions to the matcher in chunks and appends every
    /// match. Chunks after a failed one are still attempted; the first
    /// failure is returned at the end.
    async fn match_and_store(&self, budget: &Budget, items: &[Transaction]) -> ResultEngine<Pass> {
        let mut matched = 0;
        let mut failure = None;

        for chunk in items.chunks(self.classifier_batch_size()) {
            let facts: Vec<TransactionFacts> = chunk.iter().map(TransactionFacts::from).collect();
            let answers = match self
                .classifier_call(
                    "match budget",
                    self.classifier.match_budget(&facts, &budget.description),
                )
                .await
            {
                Ok(answers) => answers,
                Err(err) => {
                    tracing::warn!(budget_id = %budget.id, batch = chunk.len(), "budget matching failed: {err}");
                    failure.get_or_insert(err);
                    continue;
                }
            };

            let asked: HashSet<&str> = chunk.iter().map(|tx| tx.id.as_str()).collect();
            let ids: HashSet<String> = answers
                .into_iter()
                .filter(|answer| answer.matches && asked.contains(answer.transaction_id.as_str()))
                .map(|answer| answer.transaction_id)
                .collect();
            if !self.append_associations(budget, ids.iter()).await? {
                return Ok(Pass::Superseded);
            }
            matched += ids.len();
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(Pass::Stored(matched)),
        }
    }

    /// Adds `(transaction, budget)` pairs in one DB transaction; pairs
    /// already present are kept as is. Returns `false`, storing nothing, when
    /// the budget no longer has `budget.filter_revision`.
    async fn append_associations<'a>(
        &self,
        budget: &Budget,
        transaction_ids: impl Iterator<Item = &'a String>,
    ) -> ResultEngine<bool> {
        let transaction_ids: Vec<&String> = transaction_ids.collect();
        if transaction_ids.is_empty() {
            return Ok(true);
        }

        with_tx!(self, |db_tx| {
            let current = budgets::Entity::find_by_id(budget.id)
                .filter(budgets::Column::FilterRevision.eq(budget.filter_revision))
                .one(&db_tx)
                .await?;
            if current.is_none() {
                return Ok(false);
            }

            let backend = db_tx.get_database_backend();
            for transaction_id in transaction_ids {
                db_tx
                    .execute(Statement::from_sql_and_values(
                        backend,
                        APPEND_ASSOCIATION,
                        [
                            transaction_id.clone().into(),
                            budget.id.into(),
                            budget.id.into(),
                            budget.filter_revision.into(),
                        ],
                    ))
                    .await?;
            }
            Ok(true)
        })
    }
}
