use std::future::Future;

use uuid::Uuid;

use crate::{Connection, EngineError, ResultEngine, util::error_message};

use super::Engine;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchSyncReport {
    pub connections: usize,
    pub succeeded: usize,
    /// `(connection id, error)` for every connection that failed.
    pub failed: Vec<(Uuid, String)>,
}

impl Engine {
    /// Runs `sync_fn` for every connection tagged with `environment`.
    ///
    /// Connections are processed one at a time; a failing connection is
    /// logged and counted and the batch moves on.
    pub async fn sync_all_users<F, Fut>(
        &self,
        environment: &str,
        sync_fn: F,
    ) -> ResultEngine<BatchSyncReport>
    where
        F: Fn(Connection) -> Fut,
        Fut: Future<Output = ResultEngine<()>>,
    {
        let connections = self.connections_in_environment(environment).await?;
        let mut report = BatchSyncReport {
            connections: connections.len(),
            ..Default::default()
        };

        for connection in connections {
            let connection_id = connection.id;
            match sync_fn(connection).await {
                Ok(()) => report.succeeded += 1,
                Err(err) => {
                    tracing::warn!(connection_id = %connection_id, "batch sync failed: {err}");
                    report.failed.push((connection_id, error_message(&err)));
                }
            }
        }

        tracing::info!(
            environment,
            connections = report.connections,
            failed = report.failed.len(),
            "batch sync finished"
        );
        Ok(report)
    }

    /// Batch sync with the connection coordinator and each connection's
    /// stored credential.
    pub async fn sync_environment(&self, environment: &str) -> ResultEngine<BatchSyncReport> {
        self.sync_all_users(environment, |connection| self.sync_stored_connection(connection))
            .await
    }

    /// A connection counts as failed when its balance refresh or any of its
    /// accounts failed.
    async fn sync_stored_connection(&self, connection: Connection) -> ResultEngine<()> {
        let report = self
            .sync_connection(connection.id, &connection.user_id, &connection.credential)
            .await?;
        if let Some(error) = report.connection_error {
            return Err(EngineError::InvalidState(format!(
                "connection sync incomplete: {error}"
            )));
        }
        match report.failed() {
            0 => Ok(()),
            failed => Err(EngineError::InvalidState(format!(
                "connection sync incomplete: {failed} of {} accounts failed",
                report.accounts.len()
            ))),
        }
    }
}
