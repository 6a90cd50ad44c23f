//! # API Client Abstraction
//!
//! The load generator talks to the system under test through the
//! [`ApiClient`] trait: one call per [`OperationKind`], returning the
//! response status or a [`CallError::Transport`] when no response arrived.
//! [`HttpApiClient`] is the default implementation, posting JSON bodies with
//! `reqwest`.

use crate::error::CallError;
use crate::operation::OperationKind;
use crate::payload::Payload;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Response metadata the load generator cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
}

impl ApiResponse {
    pub fn new(status: u16) -> Self {
        Self { status }
    }

    /// 2xx statuses count as success.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Capability exposing one call per operation kind.
///
/// Implementations must be cheap to share across many concurrent
/// invocations and must not retry internally.
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Issue the request for `operation` with `payload`.
    async fn call(&self, operation: OperationKind, payload: &Payload) -> Result<ApiResponse, CallError>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Path of the endpoint backing each operation kind.
pub fn endpoint_path(operation: OperationKind) -> &'static str {
    match operation {
        OperationKind::SensorUpload => "/api/sensor-data",
        OperationKind::ReadWrite => "/api/sensor-rw",
        OperationKind::BatchReadWrite => "/api/batch-sensor-rw",
        OperationKind::Query => "/api/get-sensor-data",
    }
}

/// JSON-over-HTTP client for the sensor API.
#[derive(Debug, Clone)]
pub struct HttpApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CallError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .pool_max_idle_per_host(1024)
            .build()
            .map_err(|e| CallError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn url_for(&self, operation: OperationKind) -> String {
        format!("{}{}", self.base_url, endpoint_path(operation))
    }
}

#[async_trait]
impl ApiClient for HttpApiClient {
    async fn call(&self, operation: OperationKind, payload: &Payload) -> Result<ApiResponse, CallError> {
        let response = self
            .client
            .post(self.url_for(operation))
            .json(&payload.body)
            .send()
            .await
            .map_err(|e| CallError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        // Drain the body so the connection can go back to the pool
        if let Err(e) = response.bytes().await {
            debug!("Failed to read response body for {}: {}", operation.as_str(), e);
            return Err(CallError::Transport(e.to_string()));
        }

        Ok(ApiResponse::new(status))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
