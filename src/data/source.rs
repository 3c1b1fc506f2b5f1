// Remote data source - one GET against the training-data endpoint

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;

/// Failure to obtain training text from the remote endpoint.
///
/// Every variant is fatal for a training run: there is no retry.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Failed to fetch data from {url}: HTTP status code {status}")]
    Status { url: String, status: u16 },

    #[error("Request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Malformed payload from {url}: {source}")]
    Malformed {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl FetchError {
    /// HTTP status code, when the server answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            FetchError::Transport { source, .. } => source.status().map(|s| s.as_u16()),
            FetchError::Malformed { .. } => None,
        }
    }
}

/// Wire format: `{"data": [{"value": "<text>"}, ...]}`
#[derive(Debug, Deserialize)]
struct LoadResponse {
    data: Vec<Record>,
}

#[derive(Debug, Deserialize)]
struct Record {
    value: String,
}

/// HTTP endpoint serving training records
#[derive(Clone)]
pub struct RemoteSource {
    client: Client,
    url: String,
}

impl RemoteSource {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch every record's `value`, in payload order
    pub async fn fetch_texts(&self) -> Result<Vec<String>, FetchError> {
        tracing::debug!(url = %self.url, "Fetching training data");

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|source| self.transport(source))?;

        // Anything but 200 is fatal, other 2xx included
        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| self.transport(source))?;

        let payload: LoadResponse =
            serde_json::from_slice(&body).map_err(|source| FetchError::Malformed {
                url: self.url.clone(),
                source,
            })?;

        let texts: Vec<String> = payload.data.into_iter().map(|r| r.value).collect();

        tracing::info!(url = %self.url, records = texts.len(), "Fetched training data");
        Ok(texts)
    }

    fn transport(&self, source: reqwest::Error) -> FetchError {
        FetchError::Transport {
            url: self.url.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_parses_values_in_order() {
        let payload: LoadResponse =
            serde_json::from_str(r#"{"data":[{"value":"a"},{"value":"b","id":3}]}"#).unwrap();
        let values: Vec<_> = payload.data.into_iter().map(|r| r.value).collect();
        assert_eq!(values, vec!["a", "b"]);
    }

    #[test]
    fn test_payload_missing_value_is_error() {
        let result: Result<LoadResponse, _> = serde_json::from_str(r#"{"data":[{"text":"a"}]}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_status_error_message_embeds_code() {
        let err = FetchError::Status {
            url: "http://localhost:8000/api/v1/load".to_string(),
            status: 503,
        };
        assert_eq!(err.status(), Some(503));
        assert!(err.to_string().contains("503"));
    }
}
