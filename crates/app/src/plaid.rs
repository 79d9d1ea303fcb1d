//! Plaid-style aggregation feed over `/transactions/sync` and
//! `/accounts/balance/get`.
//!
//! The connection's credential handle is sent as the access token. Amounts
//! arrive as decimal major units and are converted to cents here.

use async_trait::async_trait;
use chrono::NaiveDate;
use engine::{
    Credential, EngineError, FeedAccount, FeedPage, FeedTransaction, MoneyCents, PageRequest,
    TransactionFeed,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::{http::JsonClient, settings};

pub struct PlaidFeed {
    api: JsonClient,
    client_id: String,
    secret: String,
}

impl PlaidFeed {
    pub fn new(client: Client, config: &settings::Plaid) -> Self {
        Self {
            api: JsonClient::new(client, &config.base_url, None),
            client_id: config.client_id.clone(),
            secret: config.secret.clone(),
        }
    }
}

#[derive(Serialize)]
struct SyncRequest<'a> {
    client_id: &'a str,
    secret: &'a str,
    access_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    cursor: Option<&'a str>,
    count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<SyncOptions<'a>>,
}

#[derive(Serialize)]
struct SyncOptions<'a> {
    account_id: &'a str,
}

#[derive(Deserialize)]
struct SyncResponse {
    #[serde(default)]
    added: Vec<PlaidTransaction>,
    #[serde(default)]
    modified: Vec<PlaidTransaction>,
    #[serde(default)]
    removed: Vec<RemovedTransaction>,
    next_cursor: Option<String>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Deserialize)]
struct PlaidTransaction {
    transaction_id: String,
    account_id: String,
    date: NaiveDate,
    name: String,
    merchant_name: Option<String>,
    amount: f64,
    personal_finance_category: Option<PersonalFinanceCategory>,
    #[serde(default)]
    pending: bool,
}

#[derive(Deserialize)]
struct PersonalFinanceCategory {
    primary: String,
}

#[derive(Deserialize)]
struct RemovedTransaction {
    transaction_id: String,
}

#[derive(Serialize)]
struct BalanceRequest<'a> {
    client_id: &'a str,
    secret: &'a str,
    access_token: &'a str,
}

#[derive(Deserialize)]
struct BalanceResponse {
    accounts: Vec<PlaidAccount>,
}

#[derive(Deserialize)]
struct PlaidAccount {
    account_id: String,
    name: String,
    #[serde(rename = "type")]
    account_type: String,
    subtype: Option<String>,
    balances: Balances,
}

#[derive(Deserialize)]
struct Balances {
    current: Option<f64>,
    available: Option<f64>,
}

impl TryFrom<PlaidTransaction> for FeedTransaction {
    type Error = EngineError;

    fn try_from(value: PlaidTransaction) -> Result<Self, Self::Error> {
        Ok(Self {
            transaction_id: value.transaction_id,
            account_id: value.account_id,
            date: value.date,
            name: value.name,
            merchant_name: value.merchant_name,
            amount: MoneyCents::from_major(value.amount)?,
            provider_category: value.personal_finance_category.map(|category| category.primary),
            pending: value.pending,
        })
    }
}

fn optional_cents(value: Option<f64>) -> Result<Option<MoneyCents>, EngineError> {
    value.map(MoneyCents::from_major).transpose()
}

#[async_trait]
impl TransactionFeed for PlaidFeed {
    async fn fetch_page(
        &self,
        credential: &Credential,
        request: PageRequest<'_>,
    ) -> Result<FeedPage, EngineError> {
        let body = SyncRequest {
            client_id: &self.client_id,
            secret: &self.secret,
            access_token: credential.expose(),
            cursor: request.cursor,
            count: request.page_size,
            options: request
                .account_filter
                .map(|account_id| SyncOptions { account_id }),
        };
        let response: SyncResponse = self
            .api
            .post_json("/transactions/sync", &body)
            .await
            .map_err(|err| EngineError::Feed(err.to_string()))?;

        let convert = |items: Vec<PlaidTransaction>| {
            items
                .into_iter()
                .map(FeedTransaction::try_from)
                .collect::<Result<Vec<_>, _>>()
        };
        Ok(FeedPage {
            added: convert(response.added)?,
            modified: convert(response.modified)?,
            removed: response
                .removed
                .into_iter()
                .map(|removed| removed.transaction_id)
                .collect(),
            next_cursor: response.next_cursor.filter(|cursor| !cursor.is_empty()),
            has_more: response.has_more,
        })
    }

    async fn fetch_accounts(&self, credential: &Credential) -> Result<Vec<FeedAccount>, EngineError> {
        let body = BalanceRequest {
            client_id: &self.client_id,
            secret: &self.secret,
            access_token: credential.expose(),
        };
        let response: BalanceResponse = self
            .api
            .post_json("/accounts/balance/get", &body)
            .await
            .map_err(|err| EngineError::Feed(err.to_string()))?;

        response
            .accounts
            .into_iter()
            .map(|account| -> Result<FeedAccount, EngineError> {
                Ok(FeedAccount {
                    account_id: account.account_id,
                    name: account.name,
                    account_type: account.account_type,
                    subtype: account.subtype,
                    current_balance: optional_cents(account.balances.current)?,
                    available_balance: optional_cents(account.balances.available)?,
                })
            })
            .collect()
    }
}
