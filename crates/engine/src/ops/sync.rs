use std::collections::HashSet;

use uuid::Uuid;

use crate::{
    Account, Credential, EngineError, FeedPage, FeedTransaction, PageRequest, ResultEngine, Transaction,
    transactions::Placement, util::error_message,
};

use super::{Engine, LabelingReport, with_tx};

/// What one account sync did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccountSyncReport {
    pub pages: u32,
    pub added: usize,
    pub modified: usize,
    pub removed: u64,
    /// Transactions stored for the first time.
    pub newly_stored: i64,
    pub labeling: LabelingReport,
}

impl Engine {
    /// Pulls the account's delta from the feed and stores it page by page.
    ///
    /// The cursor is persisted after every page together with that page's
    /// writes, so an interrupted run resumes at the next page. Any feed or
    /// storage error aborts the run, is recorded on the sync state and is
    /// returned; the caller owns retries. Labeling of the touched
    /// transactions happens after completion and never fails the sync.
    ///
    /// Concurrent calls for the same account wait for each other.
    #[tracing::instrument(level = "info", skip(self, credential))]
    pub async fn sync_account(
        &self,
        account_id: Uuid,
        credential: &Credential,
        user_id: &str,
        connection_id: Uuid,
    ) -> ResultEngine<AccountSyncReport> {
        let _guard = self.locks.acquire(account_id).await;

        let account = self.account(account_id, user_id).await?;
        if account.connection_id != connection_id {
            return Err(EngineError::KeyNotFound(format!(
                "account {account_id} in connection {connection_id}"
            )));
        }
        let connection = self.connection(connection_id, user_id).await?;

        let state = self.begin_sync(account_id).await?;
        tracing::info!(resuming = state.cursor.is_some(), "sync started");

        let mut touched = Vec::new();
        let outcome = self
            .pull_pages(
                &account,
                &connection.institution_name,
                credential,
                state.cursor,
                &mut touched,
            )
            .await;

        let mut report = match outcome {
            Ok(report) => report,
            Err(err) => {
                tracing::warn!("sync failed: {err}");
                if let Err(record_err) = self.fail_sync(account_id, error_message(&err)).await {
                    tracing::error!("failed to record sync error: {record_err}");
                }
                return Err(err);
            }
        };

        self.complete_sync(account_id).await?;
        tracing::info!(
            pages = report.pages,
            added = report.added,
            modified = report.modified,
            removed = report.removed,
            "sync completed"
        );

        report.labeling = self.label_for_new_transactions(user_id, &touched).await;
        Ok(report)
    }

    /// Is a sync of `account_id` in flight in this process?
    pub fn is_syncing(&self, account_id: Uuid) -> bool {
        self.locks.is_locked(account_id)
    }

    async fn pull_pages(
        &self,
        account: &Account,
        institution_name: &str,
        credential: &Credential,
        start_cursor: Option<String>,
        touched: &mut Vec<Transaction>,
    ) -> ResultEngine<AccountSyncReport> {
        let placement = Placement {
            user_id: &account.user_id,
            connection_id: account.connection_id,
            account_id: account.id,
            account_name: &account.name,
            institution_name,
        };
        let mut report = AccountSyncReport::default();
        let mut cursor = start_cursor;

        loop {
            let request = PageRequest {
                cursor: cursor.as_deref(),
                page_size: self.page_size(),
                account_filter: Some(account.external_id.as_str()),
            };
            let FeedPage {
                added,
                modified,
                removed,
                next_cursor,
                has_more,
            } = self
                .feed_call("transactions page", self.feed.fetch_page(credential, request))
                .await?;
            report.pages += 1;

            let belongs = |entry: &&FeedTransaction| {
                let ours = entry.account_id == account.external_id;
                if !ours {
                    tracing::debug!(
                        transaction_id = entry.transaction_id.as_str(),
                        "skipping transaction of another account"
                    );
                }
                ours
            };
            let mut added: Vec<Transaction> = added
                .iter()
                .filter(belongs)
                .map(|entry| Transaction::from_feed(entry, &placement))
                .collect();
            let modified: Vec<Transaction> = modified
                .iter()
                .filter(belongs)
                .map(|entry| Transaction::from_feed(entry, &placement))
                .collect();

            // Only new transactions are classified; modified ones keep the
            // category they already have.
            self.classify_transactions(&account.user_id, &mut added).await?;

            let next_cursor = next_cursor.or_else(|| cursor.clone());
            if has_more && next_cursor == cursor {
                return Err(EngineError::Feed(
                    "feed reported more pages without advancing the cursor".to_string(),
                ));
            }

            report.added += added.len();
            report.modified += modified.len();
            let mut upserts = added;
            upserts.extend(modified);

            let stored: ResultEngine<(i64, u64)> = with_tx!(self, |db_tx| {
                let newly_stored = Self::upsert_transactions(&db_tx, &upserts).await?;
                let removed_count =
                    Self::soft_delete_transactions(&db_tx, &account.user_id, &removed).await?;
                Self::record_page(&db_tx, account.id, next_cursor.as_deref(), newly_stored)
                    .await?;
                Ok((newly_stored, removed_count))
            });
            let (newly_stored, removed_count) = stored?;
            report.newly_stored += newly_stored;
            report.removed += removed_count;

            {
                let gone: HashSet<&str> = removed.iter().map(String::as_str).collect();
                let fresh: HashSet<&str> = upserts.iter().map(|tx| tx.id.as_str()).collect();
                touched.retain(|tx| {
                    !gone.contains(tx.id.as_str()) && !fresh.contains(tx.id.as_str())
                });
            }
            touched.extend(upserts.into_iter().filter(|tx| !removed.contains(&tx.id)));

            cursor = next_cursor;
            if !has_more {
                break;
            }
        }

        Ok(report)
    }
}
