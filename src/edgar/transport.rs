// src/edgar/transport.rs
//! The HTTP boundary. `EdgarClient` only ever talks to a `Transport`, so a
//! cache-backed or in-memory implementation can stand in for the network.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

/// Raw result of one GET.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        TransportResponse { status: StatusCode::OK, body: body.into() }
    }

    pub fn with_status(status: StatusCode) -> Self {
        TransportResponse { status, body: Vec::new() }
    }
}

/// Failures below the HTTP status layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Other(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, headers: &[(String, String)]) -> Result<TransportResponse, TransportError>;
}

/// Production transport on top of a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a reqwest client configured for EDGAR interaction.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(ReqwestTransport { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        ReqwestTransport { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str, headers: &[(String, String)]) -> Result<TransportResponse, TransportError> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(classify_reqwest_error)?;
        let status = response.status();
        let body = response.bytes().await.map_err(classify_reqwest_error)?;
        tracing::trace!("GET {} -> {} ({} bytes)", url, status, body.len());

        Ok(TransportResponse { status, body: body.to_vec() })
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_constructors() {
        let ok = TransportResponse::ok("hello");
        assert_eq!(ok.status, StatusCode::OK);
        assert_eq!(ok.body, b"hello");

        let missing = TransportResponse::with_status(StatusCode::NOT_FOUND);
        assert!(missing.body.is_empty());
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::Timeout("operation timed out".into());
        assert_eq!(err.to_string(), "request timed out: operation timed out");
        assert_eq!(TransportError::Connect("refused".into()).to_string(), "connection failed: refused");
    }

    #[test]
    fn test_reqwest_transport_builds() {
        assert!(ReqwestTransport::new(Duration::from_secs(5)).is_ok());
    }
}
