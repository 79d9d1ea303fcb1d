//! JSON client for the text classification service.

use async_trait::async_trait;
use engine::{BudgetMatch, Classification, ClassifierGateway, EngineError, TransactionFacts};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::{http::JsonClient, settings};

pub struct HttpClassifier {
    api: JsonClient,
}

impl HttpClassifier {
    pub fn new(client: Client, config: &settings::Classifier) -> Self {
        Self {
            api: JsonClient::new(client, &config.base_url, config.api_key.clone()),
        }
    }
}

#[derive(Serialize)]
struct ClassifyRequest<'a> {
    transactions: &'a [TransactionFacts],
    #[serde(skip_serializing_if = "Option::is_none")]
    rules: Option<&'a str>,
}

#[derive(Serialize)]
struct MatchRequest<'a> {
    transactions: &'a [TransactionFacts],
    filter: &'a str,
}

#[derive(Deserialize)]
struct Results<T> {
    results: Vec<T>,
}

#[async_trait]
impl ClassifierGateway for HttpClassifier {
    async fn classify(
        &self,
        transactions: &[TransactionFacts],
        rules: Option<&str>,
    ) -> Result<Vec<Classification>, EngineError> {
        let response: Results<Classification> = self
            .api
            .post_json("/classify", &ClassifyRequest { transactions, rules })
            .await
            .map_err(|err| EngineError::Classifier(err.to_string()))?;
        Ok(response.results)
    }

    async fn match_budget(
        &self,
        transactions: &[TransactionFacts],
        filter: &str,
    ) -> Result<Vec<BudgetMatch>, EngineError> {
        let response: Results<BudgetMatch> = self
            .api
            .post_json("/match", &MatchRequest { transactions, filter })
            .await
            .map_err(|err| EngineError::Classifier(err.to_string()))?;
        Ok(response.results)
    }
}
