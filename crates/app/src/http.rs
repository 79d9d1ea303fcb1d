use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(alias = "error_message")]
    error: String,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum HttpError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("{status}: {message}")]
    Server { status: StatusCode, message: String },
}

/// JSON-over-HTTP client bound to one service.
#[derive(Clone, Debug)]
pub(crate) struct JsonClient {
    client: Client,
    base_url: String,
    bearer: Option<String>,
}

impl JsonClient {
    pub(crate) fn new(client: Client, base_url: &str, bearer: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.to_string(),
            bearer,
        }
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub(crate) async fn post_json<TReq: Serialize + ?Sized, TResp: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TResp, HttpError> {
        let mut req = self.client.post(self.url(path)).json(body);
        if let Some(token) = &self.bearer {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json::<TResp>().await?);
        }

        let message = match resp.json::<ErrorBody>().await {
            Ok(err) => err.error,
            Err(_) => "server error".to_string(),
        };
        Err(HttpError::Server { status, message })
    }
}
