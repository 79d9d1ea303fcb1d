//! Incremental synchronization and labeling engine.
//!
//! The engine pulls transactions from an aggregation provider page by page,
//! keeps a resumable cursor per account, classifies new transactions and
//! labels them against the user's budgets so that budget reads never need
//! the classifier.

pub use accounts::Account;
pub use budgets::{Budget, BudgetInput, ProcessingStatus};
pub use classifier::{BudgetMatch, Classification, ClassifierGateway, TransactionFacts};
pub use connections::{Connection, ConnectionStatus};
pub use error::EngineError;
pub use feed::{Credential, FeedAccount, FeedPage, FeedTransaction, PageRequest, TransactionFeed};
pub use money::MoneyCents;
pub use ops::{
    AccountOutcome, AccountSyncReport, BatchSyncReport, BudgetStatus, BudgetSummary,
    ConnectionSyncReport, Engine, EngineBuilder, EngineSettings, Job, LabelingReport,
    TransactionListFilter,
};
pub use period::{BudgetPeriod, DateWindow, PeriodDefinition, resolve_window};
pub use sync_states::{SyncState, SyncStatus};
pub use transactions::Transaction;

mod accounts;
mod budgets;
mod categorization_rules;
mod classifier;
mod connections;
mod error;
mod feed;
mod locks;
mod money;
mod ops;
mod period;
mod sync_states;
mod transaction_budgets;
mod transactions;
mod util;

type ResultEngine<T> = Result<T, EngineError>;
