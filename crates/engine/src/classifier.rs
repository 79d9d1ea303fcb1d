//! Boundary with the text classifier.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{MoneyCents, ResultEngine, Transaction};

/// The facts about a transaction the classifier is allowed to see.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionFacts {
    pub transaction_id: String,
    pub date: NaiveDate,
    pub name: String,
    pub merchant_name: Option<String>,
    pub amount: MoneyCents,
    pub provider_category: Option<String>,
    pub account_name: Option<String>,
}

impl From<&Transaction> for TransactionFacts {
    fn from(tx: &Transaction) -> Self {
        Self {
            transaction_id: tx.id.clone(),
            date: tx.date,
            name: tx.name.clone(),
            merchant_name: tx.merchant_name.clone(),
            amount: tx.amount,
            provider_category: tx.provider_category.clone(),
            account_name: tx.account_name.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub transaction_id: String,
    pub category: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetMatch {
    pub transaction_id: String,
    pub matches: bool,
}

#[async_trait]
pub trait ClassifierGateway: Send + Sync {
    /// Assigns a category to each transaction, optionally steered by the
    /// user's free-text categorization rules.
    ///
    /// Transactions missing from the answer stay uncategorized.
    async fn classify(
        &self,
        transactions: &[TransactionFacts],
        rules: Option<&str>,
    ) -> ResultEngine<Vec<Classification>>;

    /// Decides which transactions fall under a budget's natural-language
    /// filter.
    async fn match_budget(
        &self,
        transactions: &[TransactionFacts],
        filter: &str,
    ) -> ResultEngine<Vec<BudgetMatch>>;
}
