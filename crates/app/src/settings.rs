//! Handles settings for the application. Configuration is read from an
//! optional `settings.toml` and overridden by `TALLY__<SECTION>__<KEY>`
//! environment variables.
//!
//! See `settings.toml` for the configuration.
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use engine::EngineSettings;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct App {
    pub level: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Database {
    Memory,
    Sqlite(String),
}

#[derive(Debug, Deserialize)]
pub struct SyncSettings {
    /// Connections with this tag are synced by the scheduler.
    pub environment: String,
    pub interval_secs: u64,
    pub page_size: Option<u32>,
    pub feed_timeout_secs: Option<u64>,
    pub classifier_timeout_secs: Option<u64>,
    pub classifier_batch_size: Option<usize>,
    pub queue_capacity: Option<usize>,
}

impl SyncSettings {
    pub fn engine_settings(&self) -> EngineSettings {
        let defaults = EngineSettings::default();
        EngineSettings {
            page_size: self.page_size.unwrap_or(defaults.page_size),
            feed_timeout: self
                .feed_timeout_secs
                .map_or(defaults.feed_timeout, Duration::from_secs),
            classifier_timeout: self
                .classifier_timeout_secs
                .map_or(defaults.classifier_timeout, Duration::from_secs),
            classifier_batch_size: self
                .classifier_batch_size
                .unwrap_or(defaults.classifier_batch_size),
            queue_capacity: self.queue_capacity.unwrap_or(defaults.queue_capacity),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Plaid {
    pub base_url: String,
    pub client_id: String,
    pub secret: String,
}

#[derive(Debug, Deserialize)]
pub struct Classifier {
    pub base_url: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub app: App,
    pub database: Database,
    pub sync: SyncSettings,
    pub plaid: Plaid,
    pub classifier: Classifier,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .set_default("app.level", "info")?
            .set_default("sync.interval_secs", 3600)?
            .add_source(File::with_name("settings").required(false))
            .add_source(Environment::with_prefix("TALLY").separator("__"))
            .build()?;

        settings.try_deserialize()
    }
}
