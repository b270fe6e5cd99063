//! Transports and response classification
//!
//! A [`Transport`] performs exactly one attempt. Timeouts, retries and status
//! interpretation belong to the retry coordinator, so transports never retry
//! and never enforce their own deadline.

use super::types::{HttpMethod, NetworkRequest, TransportResponse};
use crate::core::error::TransportError;
use async_trait::async_trait;
use reqwest::Client;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Sends a single request attempt
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &NetworkRequest) -> Result<TransportResponse, TransportError>;
}

/// Shared transport handle
pub type SharedTransport = Arc<dyn Transport>;

/// How a received status code is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// Deliver to the caller
    Success,
    /// Retry per policy
    Retryable,
    /// Fail immediately without retrying
    Fatal,
}

/// Caller-supplied status classification
pub type StatusClassifier = Arc<dyn Fn(u16) -> StatusClass + Send + Sync>;

/// Default classification: 2xx succeed, 408/429/5xx retry, anything else fails
pub fn default_status_class(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        408 | 429 | 500..=599 => StatusClass::Retryable,
        _ => StatusClass::Fatal,
    }
}

pub fn default_classifier() -> StatusClassifier {
    Arc::new(default_status_class)
}

/// HTTP transport backed by reqwest
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = Client::builder()
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(Self { client })
    }

    /// Wrap a preconfigured client (proxies, TLS, default headers)
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

fn to_reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
        HttpMethod::Head => reqwest::Method::HEAD,
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_builder() {
        TransportError::InvalidRequest(err.to_string())
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Request(err.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &NetworkRequest) -> Result<TransportResponse, TransportError> {
        debug!("HTTP {} {} id={}", request.method, request.url, request.id);

        let mut builder = self
            .client
            .request(to_reqwest_method(request.method), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();

        let mut headers = BTreeMap::new();
        for (name, value) in response.headers() {
            // Non-UTF-8 header values are dropped
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str().to_string(), value.to_string());
            }
        }

        let body = response.bytes().await.map_err(map_reqwest_error)?;
        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}
