// src/edgar/client.rs
use std::sync::Arc;

use reqwest::{header, StatusCode};

use crate::config::FetchConfig;
use crate::edgar::rate_limiter::{RateLimiter, RetryPolicy};
use crate::edgar::transport::{ReqwestTransport, Transport, TransportError, TransportResponse};
use crate::utils::error::{ConfigError, FetchError};

/// Fetches archive documents through the shared throttle with retries.
/// Cloning is cheap; clones share the transport and the rate limiter.
#[derive(Clone)]
pub struct EdgarClient {
    transport: Arc<dyn Transport>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    user_agent: String,
}

impl EdgarClient {
    /// Validates the contact identifier before anything can reach the network.
    pub fn new(
        config: &FetchConfig,
        limiter: Arc<RateLimiter>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(EdgarClient {
            transport,
            limiter,
            retry: RetryPolicy::from_config(config),
            user_agent: config.user_agent.trim().to_string(),
        })
    }

    /// Builds a client on top of the production reqwest transport.
    pub fn with_reqwest(config: &FetchConfig, limiter: Arc<RateLimiter>) -> Result<Self, ConfigError> {
        config.validate()?;
        let transport = ReqwestTransport::new(config.request_timeout)
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Self::new(config, limiter, Arc::new(transport))
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Downloads `url` and returns its body as text.
    /// Includes mandatory User-Agent; every attempt waits on the shared limiter.
    pub async fn fetch(&self, url: &str, extra_headers: &[(String, String)]) -> Result<String, FetchError> {
        let headers = self.request_headers(extra_headers);

        tracing::debug!("Downloading document from: {}", url);
        let body = self
            .retry
            .run(|attempt| {
                let headers = &headers;
                async move {
                    self.limiter.acquire().await;
                    tracing::debug!("GET {} (attempt {})", url, attempt);
                    let response = self.transport.get(url, headers).await;
                    classify_response(url, response)
                }
            })
            .await?;

        tracing::debug!("Successfully downloaded {} bytes from {}", body.len(), url);
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    fn request_headers(&self, extra_headers: &[(String, String)]) -> Vec<(String, String)> {
        let mut headers = vec![
            (header::USER_AGENT.as_str().to_string(), self.user_agent.clone()),
            (
                header::ACCEPT.as_str().to_string(),
                "application/xml,text/html,text/plain,*/*".to_string(),
            ),
        ];
        for (name, value) in extra_headers {
            if name.eq_ignore_ascii_case(header::USER_AGENT.as_str()) {
                continue;
            }
            headers.push((name.clone(), value.clone()));
        }
        headers
    }
}

/// Maps one transport outcome onto the fetch error taxonomy.
fn classify_response(
    url: &str,
    response: Result<TransportResponse, TransportError>,
) -> Result<Vec<u8>, FetchError> {
    let response = match response {
        Ok(response) => response,
        Err(TransportError::Timeout(detail)) | Err(TransportError::Connect(detail)) => {
            return Err(FetchError::Timeout { url: url.to_string(), detail });
        }
        Err(TransportError::Other(reason)) => {
            return Err(FetchError::Malformed { url: url.to_string(), reason });
        }
    };

    let status = response.status;
    if status.is_success() {
        return Ok(response.body);
    }

    tracing::warn!("HTTP error status: {} for URL: {}", status, url);
    let url = url.to_string();
    Err(match status {
        StatusCode::NOT_FOUND => FetchError::NotFound { url },
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited { url },
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => FetchError::Timeout {
            url,
            detail: format!("HTTP {}", status.as_u16()),
        },
        s if s.is_server_error() => FetchError::ServerError { url, status: s.as_u16() },
        s => FetchError::Malformed { url, reason: format!("HTTP {}", s) },
    })
}
