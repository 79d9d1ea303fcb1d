//! Background work scheduled by the engine.
//!
//! Jobs go through bounded channels, one per lane, each consumed by its own
//! worker task. Labeling jobs and connection syncs use separate lanes so a
//! slow provider never holds up budget labeling. Submitting never waits for
//! room: a full queue is reported to the caller, which records it on the
//! affected budget or connection.

use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::{EngineError, ResultEngine};

use super::Engine;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Job {
    /// Full labeling pass of one budget over the user's history.
    RelabelBudget { user_id: String, budget_id: Uuid },
    /// Fresh classification of the user's history, then a re-label of every
    /// budget.
    Reclassify { user_id: String },
    /// Post-link sync of a connection using its stored credential.
    SyncConnection { user_id: String, connection_id: Uuid },
}

impl Job {
    fn kind(&self) -> &'static str {
        match self {
            Self::RelabelBudget { .. } => "relabel_budget",
            Self::Reclassify { .. } => "reclassify",
            Self::SyncConnection { .. } => "sync_connection",
        }
    }

    fn lane(&self) -> Lane {
        match self {
            Self::RelabelBudget { .. } | Self::Reclassify { .. } => Lane::Labeling,
            Self::SyncConnection { .. } => Lane::Sync,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum Lane {
    Labeling,
    Sync,
}

impl Lane {
    fn as_str(self) -> &'static str {
        match self {
            Self::Labeling => "labeling",
            Self::Sync => "sync",
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct JobQueue {
    labeling: mpsc::Sender<Job>,
    sync: mpsc::Sender<Job>,
}

impl JobQueue {
    pub(crate) fn new(labeling: mpsc::Sender<Job>, sync: mpsc::Sender<Job>) -> Self {
        Self { labeling, sync }
    }

    fn sender(&self, lane: Lane) -> &mpsc::Sender<Job> {
        match lane {
            Lane::Labeling => &self.labeling,
            Lane::Sync => &self.sync,
        }
    }
}

impl Engine {
    /// Hands a job to the worker of its lane, or runs it in place when the
    /// engine was built without background workers.
    pub(super) async fn submit(&self, job: Job) -> ResultEngine<()> {
        let Some(queue) = &self.jobs else {
            self.run_job(job).await;
            return Ok(());
        };

        let lane = job.lane();
        match queue.sender(lane).try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(job)) => {
                tracing::warn!(job = job.kind(), lane = lane.as_str(), "job queue is full");
                Err(EngineError::InvalidState("job queue is full".to_string()))
            }
            Err(TrySendError::Closed(job)) => {
                tracing::error!(job = job.kind(), lane = lane.as_str(), "job queue is closed");
                Err(EngineError::InvalidState("job queue is closed".to_string()))
            }
        }
    }

    async fn run_job(&self, job: Job) {
        let kind = job.kind();
        let outcome = match job {
            Job::RelabelBudget { user_id, budget_id } => {
                self.run_relabel(&user_id, budget_id).await
            }
            Job::Reclassify { user_id } => self.run_reclassify(&user_id).await,
            Job::SyncConnection {
                user_id,
                connection_id,
            } => self.run_post_link_sync(&user_id, connection_id).await,
        };

        match outcome {
            Ok(()) => tracing::info!(job = kind, "job completed"),
            Err(err) => tracing::error!(job = kind, "job failed: {err}"),
        }
    }

    async fn run_reclassify(&self, user_id: &str) -> ResultEngine<()> {
        self.reclassify_transactions(user_id).await?;
        self.relabel_all_budgets(user_id).await
    }

    async fn run_post_link_sync(&self, user_id: &str, connection_id: Uuid) -> ResultEngine<()> {
        let connection = self.connection(connection_id, user_id).await?;
        let report = self
            .sync_connection(connection_id, user_id, &connection.credential)
            .await?;
        tracing::info!(
            connection_id = %connection_id,
            accounts = report.accounts.len(),
            failed = report.failed(),
            "post-link sync finished"
        );
        Ok(())
    }

    async fn run_relabel(&self, user_id: &str, budget_id: Uuid) -> ResultEngine<()> {
        let budget = match self.budget(budget_id, user_id).await {
            Ok(budget) => budget,
            // Deleted before the worker got to it.
            Err(EngineError::KeyNotFound(_)) => return Ok(()),
            Err(err) => return Err(err),
        };
        let matched = self.label_for_budget(user_id, &budget).await?;
        tracing::info!(budget_id = %budget_id, matched, "budget labeled");
        Ok(())
    }
}

/// Drains one lane until every sender is gone.
pub(super) async fn run_worker(engine: Engine, lane: Lane, mut receiver: mpsc::Receiver<Job>) {
    tracing::debug!(lane = lane.as_str(), "job worker started");
    while let Some(job) = receiver.recv().await {
        engine.run_job(job).await;
    }
    tracing::debug!(lane = lane.as_str(), "job worker stopped");
}
