//! REST client for the CONVAL recalculation endpoints.
//!
//! [`ConvalBackend`] is the seam the session driver talks to; [`ConvalApi`]
//! implements it over HTTP using [`reqwest`].

use async_trait::async_trait;
use quotation_core::job::{JobRequest, JobSubmissionResult, QueueStatus};
use quotation_core::types::SheetIndex;
use serde::de::DeserializeOwned;

use crate::config::RecalcConfig;
use crate::messages::{RetryResponse, StatusResponse};

/// Errors from the CONVAL API layer.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConvalError {
    /// The request never produced a response (network, DNS, TLS, timeout).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The response body was not the JSON shape we expected.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The backend returned a non-2xx status code.
    #[error("CONVAL API error ({status}): {body}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Raw response body for diagnostics.
        body: String,
    },
}

/// Operations the recalculation workflow needs from the backend.
#[async_trait]
pub trait ConvalBackend: Send + Sync {
    /// Submit a recalculation job.
    async fn submit(&self, request: &JobRequest) -> Result<JobSubmissionResult, ConvalError>;

    /// Read the state of the shared compute queue.
    async fn queue_status(&self) -> Result<QueueStatus, ConvalError>;

    /// Customer/context data for one estimate sheet.
    async fn customer_data(
        &self,
        correlation_key: &str,
        sheet_index: SheetIndex,
    ) -> Result<serde_json::Value, ConvalError>;

    /// Engine result data for one estimate sheet.
    async fn engine_data(
        &self,
        correlation_key: &str,
        sheet_index: SheetIndex,
    ) -> Result<serde_json::Value, ConvalError>;
}

/// HTTP client for one quotation backend.
pub struct ConvalApi {
    client: reqwest::Client,
    api_url: String,
}

impl ConvalApi {
    /// Create a new API client.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8080/api`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self { client, api_url }
    }

    /// Build a client with the request timeout from `config`.
    pub fn from_config(config: &RecalcConfig) -> Result<Self, ConvalError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ConvalError::Transport(e.to_string()))?;
        Ok(Self::with_client(client, &config.api_url))
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    // ---- private helpers ----

    async fn get_sheet_data(
        &self,
        path: &str,
        correlation_key: &str,
        sheet_index: SheetIndex,
    ) -> Result<serde_json::Value, ConvalError> {
        let response = self
            .client
            .get(format!("{}{path}", self.api_url))
            .query(&[
                ("correlationKey", correlation_key.to_string()),
                ("sheetIndex", sheet_index.to_string()),
            ])
            .send()
            .await
            .map_err(transport)?;

        Self::parse_response(response).await
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ConvalError::Server`]
    /// containing the status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ConvalError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ConvalError::Server {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    ///
    /// The body is read as text first so that a malformed payload is
    /// reported as [`ConvalError::Protocol`] rather than a transport error.
    async fn parse_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ConvalError> {
        let response = Self::ensure_success(response).await?;
        let body = response.text().await.map_err(transport)?;
        serde_json::from_str(&body).map_err(|e| ConvalError::Protocol(e.to_string()))
    }
}

fn transport(e: reqwest::Error) -> ConvalError {
    ConvalError::Transport(e.to_string())
}

#[async_trait]
impl ConvalBackend for ConvalApi {
    /// `POST /conval/retry`
    async fn submit(&self, request: &JobRequest) -> Result<JobSubmissionResult, ConvalError> {
        let response = self
            .client
            .post(format!("{}/conval/retry", self.api_url))
            .json(request)
            .send()
            .await
            .map_err(transport)?;

        let raw: RetryResponse = Self::parse_response(response).await?;
        Ok(raw.into())
    }

    /// `GET /conval/status`
    async fn queue_status(&self) -> Result<QueueStatus, ConvalError> {
        let response = self
            .client
            .get(format!("{}/conval/status", self.api_url))
            .send()
            .await
            .map_err(transport)?;

        let raw: StatusResponse = Self::parse_response(response).await?;
        Ok(raw.into())
    }

    /// `GET /conval/customer-data?correlationKey=..&sheetIndex=..`
    async fn customer_data(
        &self,
        correlation_key: &str,
        sheet_index: SheetIndex,
    ) -> Result<serde_json::Value, ConvalError> {
        self.get_sheet_data("/conval/customer-data", correlation_key, sheet_index)
            .await
    }

    /// `GET /conval/engine-data?correlationKey=..&sheetIndex=..`
    async fn engine_data(
        &self,
        correlation_key: &str,
        sheet_index: SheetIndex,
    ) -> Result<serde_json::Value, ConvalError> {
        self.get_sheet_data("/conval/engine-data", correlation_key, sheet_index)
            .await
    }
}
