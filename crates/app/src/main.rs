use std::{sync::Arc, time::Duration};

use migration::{Migrator, MigratorTrait};
use settings::Database;
use tokio::time::MissedTickBehavior;

mod classifier;
mod http;
mod plaid;
mod settings;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let settings = settings::Settings::new()?;

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "tally={level},engine={level}",
            level = settings.app.level
        ))
        .init();

    let db = parse_database(&settings.database).await?;
    let client = reqwest::Client::builder()
        .user_agent(concat!("tally/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let engine = engine::Engine::builder()
        .database(db)
        .feed(Arc::new(plaid::PlaidFeed::new(client.clone(), &settings.plaid)))
        .classifier(Arc::new(classifier::HttpClassifier::new(
            client,
            &settings.classifier,
        )))
        .settings(settings.sync.engine_settings())
        .build()
        .await?;

    let environment = settings.sync.environment.as_str();
    let mut ticker = tokio::time::interval(Duration::from_secs(settings.sync.interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!(environment, "scheduler started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match engine.sync_environment(environment).await {
                    Ok(report) => tracing::info!(
                        connections = report.connections,
                        succeeded = report.succeeded,
                        failed = report.failed.len(),
                        "scheduled sync finished"
                    ),
                    Err(err) => tracing::error!("scheduled sync failed: {err}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
        }
    }

    Ok(())
}

async fn parse_database(
    config: &settings::Database,
) -> Result<sea_orm::DatabaseConnection, Box<dyn std::error::Error + Send + Sync>> {
    let url = match config {
        Database::Memory => String::from("sqlite::memory:"),
        Database::Sqlite(path) => format!("sqlite:{}?mode=rwc", path),
    };

    let database = sea_orm::Database::connect(url).await?;
    Migrator::up(&database, None).await?;
    Ok(database)
}
