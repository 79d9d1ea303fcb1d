//! Boundary with the account-aggregation provider.
//!
//! The provider is seen as a paginated feed of transaction deltas keyed by
//! an opaque cursor, plus a balance endpoint listing the accounts behind a
//! credential. Concrete transports live outside the engine.

use std::fmt;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{MoneyCents, ResultEngine};

/// Maximum page size accepted by the provider.
pub const MAX_PAGE_SIZE: u32 = 500;

/// Opaque credential handle for one connection.
///
/// The engine never inspects it; decrypting or exchanging it is the feed
/// implementation's business. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// A transaction as delivered by the provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedTransaction {
    /// Provider-assigned id, stable across modifications.
    pub transaction_id: String,
    /// Provider account id (matches [`FeedAccount::account_id`]).
    pub account_id: String,
    pub date: NaiveDate,
    pub name: String,
    pub merchant_name: Option<String>,
    pub amount: MoneyCents,
    pub provider_category: Option<String>,
    pub pending: bool,
}

/// One page of deltas.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FeedPage {
    pub added: Vec<FeedTransaction>,
    pub modified: Vec<FeedTransaction>,
    /// Ids of transactions the provider no longer reports.
    pub removed: Vec<String>,
    /// Cursor to request the next page with. `None` keeps the current one.
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct PageRequest<'a> {
    /// `None` requests the full history.
    pub cursor: Option<&'a str>,
    pub page_size: u32,
    /// Restrict the page to one provider account.
    pub account_filter: Option<&'a str>,
}

/// An account with its current balances.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedAccount {
    pub account_id: String,
    pub name: String,
    pub account_type: String,
    pub subtype: Option<String>,
    pub current_balance: Option<MoneyCents>,
    pub available_balance: Option<MoneyCents>,
}

#[async_trait]
pub trait TransactionFeed: Send + Sync {
    /// Fetches the page following `request.cursor`.
    async fn fetch_page(
        &self,
        credential: &Credential,
        request: PageRequest<'_>,
    ) -> ResultEngine<FeedPage>;

    /// Lists the accounts reachable with `credential`, with fresh balances.
    async fn fetch_accounts(&self, credential: &Credential) -> ResultEngine<Vec<FeedAccount>>;
}
