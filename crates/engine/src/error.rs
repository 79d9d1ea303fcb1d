//! The module contains the errors the engine can return.
//!
//! The errors are:
//!
//! - [`Feed`] the aggregation provider failed or timed out mid-page.
//! - [`Classifier`] the classifier gateway failed. Callers that only need it
//!   for categorization or labeling log and swallow it.
//! - [`Database`] persistence failed; fatal for the current account sync.
//! - [`Configuration`] a budget or setting is malformed (missing anchor date,
//!   missing day count, non-positive amount). Never retried.
//!
//!  [`Feed`]: EngineError::Feed
//!  [`Classifier`]: EngineError::Classifier
//!  [`Database`]: EngineError::Database
//!  [`Configuration`]: EngineError::Configuration
use sea_orm::DbErr;
use thiserror::Error;

/// Engine custom errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Feed error: {0}")]
    Feed(String),
    #[error("Classifier error: {0}")]
    Classifier(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("\"{0}\" key not found!")]
    KeyNotFound(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error(transparent)]
    Database(#[from] DbErr),
}

impl PartialEq for EngineError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Feed(a), Self::Feed(b)) => a == b,
            (Self::Classifier(a), Self::Classifier(b)) => a == b,
            (Self::Configuration(a), Self::Configuration(b)) => a == b,
            (Self::KeyNotFound(a), Self::KeyNotFound(b)) => a == b,
            (Self::InvalidState(a), Self::InvalidState(b)) => a == b,
            (Self::Database(a), Self::Database(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}
