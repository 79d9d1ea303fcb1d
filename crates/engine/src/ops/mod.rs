use std::{future::Future, sync::Arc, time::Duration};

use sea_orm::DatabaseConnection;
use tokio::sync::mpsc;

use crate::{
    ClassifierGateway, EngineError, ResultEngine, TransactionFeed, feed::MAX_PAGE_SIZE,
    locks::AccountLocks,
};

mod accounts;
mod budgets;
mod connections;
mod driver;
mod jobs;
mod labeling;
mod sync;
mod sync_state;
mod transactions;

pub use budgets::{BudgetStatus, BudgetSummary};
pub use connections::{AccountOutcome, ConnectionSyncReport};
pub use driver::BatchSyncReport;
pub use jobs::Job;
pub use labeling::LabelingReport;
pub use sync::AccountSyncReport;
pub use transactions::TransactionListFilter;

use jobs::{JobQueue, Lane};

/// Run a block inside a DB transaction, committing on success and rolling back on error.
macro_rules! with_tx {
    ($self:expr, |$tx:ident| $body:expr) => {{
        let $tx = sea_orm::TransactionTrait::begin(&$self.database).await?;
        let result = $body;
        match result {
            Ok(value) => {
                $tx.commit().await?;
                Ok(value)
            }
            Err(err) => Err(err),
        }
    }};
}

pub(crate) use with_tx;

/// Tunables for the sync loop and its external calls.
#[derive(Clone, Debug)]
pub struct EngineSettings {
    /// Requested page size; capped at the provider maximum (500).
    pub page_size: u32,
    pub feed_timeout: Duration,
    pub classifier_timeout: Duration,
    /// Transactions per classifier request.
    pub classifier_batch_size: usize,
    /// Pending background jobs per lane before new submissions are rejected.
    pub queue_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            page_size: MAX_PAGE_SIZE,
            feed_timeout: Duration::from_secs(30),
            classifier_timeout: Duration::from_secs(60),
            classifier_batch_size: 100,
            queue_capacity: 64,
        }
    }
}

/// Handle to the engine. Cloning is cheap and clones share the database
/// pool, the per-account locks and the background queue.
#[derive(Clone)]
pub struct Engine {
    database: DatabaseConnection,
    feed: Arc<dyn TransactionFeed>,
    classifier: Arc<dyn ClassifierGateway>,
    settings: EngineSettings,
    locks: Arc<AccountLocks>,
    jobs: Option<JobQueue>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("settings", &self.settings)
            .field("background_jobs", &self.jobs.is_some())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Return a builder for `Engine`. Help to build the struct.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    fn page_size(&self) -> u32 {
        self.settings.page_size.clamp(1, MAX_PAGE_SIZE)
    }

    /// Await a feed call, turning a timeout into a feed error.
    async fn feed_call<T>(
        &self,
        what: &str,
        call: impl Future<Output = ResultEngine<T>>,
    ) -> ResultEngine<T> {
        match tokio::time::timeout(self.settings.feed_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Feed(format!(
                "{what} timed out after {}s",
                self.settings.feed_timeout.as_secs_f32()
            ))),
        }
    }

    /// Await a classifier call, turning a timeout into a classifier error.
    async fn classifier_call<T>(
        &self,
        what: &str,
        call: impl Future<Output = ResultEngine<T>>,
    ) -> ResultEngine<T> {
        match tokio::time::timeout(self.settings.classifier_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Classifier(format!(
                "{what} timed out after {}s",
                self.settings.classifier_timeout.as_secs_f32()
            ))),
        }
    }

    fn classifier_batch_size(&self) -> usize {
        self.settings.classifier_batch_size.max(1)
    }
}

/// The builder for `Engine`
pub struct EngineBuilder {
    database: DatabaseConnection,
    feed: Option<Arc<dyn TransactionFeed>>,
    classifier: Option<Arc<dyn ClassifierGateway>>,
    settings: EngineSettings,
    background_jobs: bool,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            database: DatabaseConnection::default(),
            feed: None,
            classifier: None,
            settings: EngineSettings::default(),
            background_jobs: true,
        }
    }
}

impl EngineBuilder {
    /// Pass the required database
    pub fn database(mut self, db: DatabaseConnection) -> EngineBuilder {
        self.database = db;
        self
    }

    /// Pass the required aggregation feed
    pub fn feed(mut self, feed: Arc<dyn TransactionFeed>) -> EngineBuilder {
        self.feed = Some(feed);
        self
    }

    /// Pass the required classifier gateway
    pub fn classifier(mut self, classifier: Arc<dyn ClassifierGateway>) -> EngineBuilder {
        self.classifier = Some(classifier);
        self
    }

    pub fn settings(mut self, settings: EngineSettings) -> EngineBuilder {
        self.settings = settings;
        self
    }

    /// When disabled, jobs run inline in the calling task instead of on the
    /// background worker.
    pub fn background_jobs(mut self, enabled: bool) -> EngineBuilder {
        self.background_jobs = enabled;
        self
    }

    /// Construct `Engine`. With background jobs enabled this spawns the
    /// workers, so it must run inside a tokio runtime.
    pub async fn build(self) -> ResultEngine<Engine> {
        let feed = self
            .feed
            .ok_or_else(|| EngineError::Configuration("missing transaction feed".to_string()))?;
        let classifier = self
            .classifier
            .ok_or_else(|| EngineError::Configuration("missing classifier gateway".to_string()))?;
        if self.settings.queue_capacity == 0 {
            return Err(EngineError::Configuration(
                "queue capacity must be > 0".to_string(),
            ));
        }

        let mut engine = Engine {
            database: self.database,
            feed,
            classifier,
            settings: self.settings,
            locks: Arc::new(AccountLocks::default()),
            jobs: None,
        };

        if self.background_jobs {
            let capacity = engine.settings.queue_capacity;
            let (labeling, labeling_rx) = mpsc::channel(capacity);
            let (sync, sync_rx) = mpsc::channel(capacity);
            // The workers' own handles have no queue, so jobs they run never
            // enqueue more work and the channels close with the last caller.
            tokio::spawn(jobs::run_worker(engine.clone(), Lane::Labeling, labeling_rx));
            tokio::spawn(jobs::run_worker(engine.clone(), Lane::Sync, sync_rx));
            engine.jobs = Some(JobQueue::new(labeling, sync));
        }

        Ok(engine)
    }
}
