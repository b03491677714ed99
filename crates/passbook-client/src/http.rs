//! HTTP station client
//!
//! Endpoints (JSON bodies):
//! - `POST {base}/v1/tickets/sign`
//! - `POST {base}/v1/access/exchange`
//! - `POST {base}/v1/tickets/split`
//!
//! Error bodies look like `{"error": "<kind>", "message": "..."}`. A 409
//! with kind `ticket_already_used` is the conflict the broker recovers
//! from; every other status is mapped to a terminal [`StationError`].

use crate::station::{
    ExchangeRequest, ExchangeResponse, SignRequest, SignResponse, SplitRequest, SplitResponse,
    Station,
};
use async_trait::async_trait;
use passbook_core::StationError;
use reqwest::{header, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const SIGN_PATH: &str = "/v1/tickets/sign";
const EXCHANGE_PATH: &str = "/v1/access/exchange";
const SPLIT_PATH: &str = "/v1/tickets/split";

const TICKET_USED_KIND: &str = "ticket_already_used";

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
    /// Request positions of the already-used tickets in a batch
    #[serde(default)]
    used: Vec<usize>,
}

/// Station reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpStation {
    base_url: String,
    http: reqwest::Client,
}

impl HttpStation {
    /// Client for the station at `base_url`
    ///
    /// `timeout` bounds every request at the transport level; callers
    /// usually also wrap calls in their own deadline.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, StationError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("passbook/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StationError::Network(e.to_string()))?;
        Ok(Self::with_client(base_url, http))
    }

    /// Use a preconfigured reqwest client
    #[must_use]
    pub fn with_client(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, http }
    }

    #[inline]
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, StationError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{path}", self.base_url);
        tracing::debug!(%url, "Calling station");

        let resp = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if status.is_success() {
            let bytes = resp.bytes().await.map_err(transport_error)?;
            return serde_json::from_slice(&bytes)
                .map_err(|e| StationError::Malformed(e.to_string()));
        }

        let retry_after = resp
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body: ErrorBody = resp.json().await.unwrap_or_default();
        let err = status_error(status, body, retry_after);
        tracing::warn!(%url, status = status.as_u16(), error = %err, "Station call failed");
        Err(err)
    }
}

#[async_trait]
impl Station for HttpStation {
    async fn sign(&self, request: SignRequest) -> Result<SignResponse, StationError> {
        self.post(SIGN_PATH, &request).await
    }

    async fn exchange(&self, request: ExchangeRequest) -> Result<ExchangeResponse, StationError> {
        self.post(EXCHANGE_PATH, &request).await
    }

    async fn split(&self, request: SplitRequest) -> Result<SplitResponse, StationError> {
        self.post(SPLIT_PATH, &request).await
    }
}

fn transport_error(err: reqwest::Error) -> StationError {
    if err.is_timeout() {
        StationError::Timeout(Duration::ZERO)
    } else if err.is_decode() {
        StationError::Malformed(err.to_string())
    } else {
        StationError::Network(err.to_string())
    }
}

fn status_error(status: StatusCode, body: ErrorBody, retry_after: Option<u64>) -> StationError {
    let kind = body.error.unwrap_or_default();
    let message = body
        .message
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string());

    match status {
        StatusCode::CONFLICT if kind == TICKET_USED_KIND => {
            if body.used.is_empty() {
                StationError::TicketUsed
            } else {
                StationError::TicketsUsed {
                    positions: body.used,
                }
            }
        }
        StatusCode::TOO_MANY_REQUESTS => StationError::RateLimited {
            retry_after_secs: retry_after,
        },
        s if s.is_client_error() => {
            if kind.is_empty() {
                StationError::Rejected(message)
            } else {
                StationError::Rejected(format!("{kind}: {message}"))
            }
        }
        s => StationError::Server {
            status: s.as_u16(),
            message,
        },
    }
}
