// src/utils/error.rs
use serde::Serialize;
use thiserror::Error;

// Define specific error types for different parts of the application

/// Invalid or missing configuration. Always fatal, never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("a contact identifier (user agent) is required by the archive's fair-access policy")]
    MissingUserAgent,

    #[error("user agent {0:?} cannot be sent as an HTTP header value")]
    InvalidUserAgent(String),

    #[error("max retry attempts must be at least 1")]
    ZeroAttempts,

    #[error("invalid year range {start}..={end}")]
    InvalidYearRange { start: i32, end: i32 },

    #[error("environment variable {name} = {value:?} could not be parsed")]
    InvalidEnvVar { name: String, value: String },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Network/HTTP-layer failures surfaced by the fetcher.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FetchError {
    #[error("document not found: {url}")]
    NotFound { url: String },

    #[error("rate limited by the archive (HTTP 429): {url}")]
    RateLimited { url: String },

    #[error("server error (HTTP {status}): {url}")]
    ServerError { url: String, status: u16 },

    #[error("request timed out or connection failed: {url} ({detail})")]
    Timeout { url: String, detail: String },

    #[error("malformed request or response for {url}: {reason}")]
    Malformed { url: String, reason: String },
}

impl FetchError {
    /// Whether the retry policy should try this request again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::RateLimited { .. } | FetchError::ServerError { .. } | FetchError::Timeout { .. }
        )
    }

    /// 404s never count toward a fatal abort.
    pub fn counts_toward_abort(&self) -> bool {
        !matches!(self, FetchError::NotFound { .. })
    }

    pub fn url(&self) -> &str {
        match self {
            FetchError::NotFound { url }
            | FetchError::RateLimited { url }
            | FetchError::ServerError { url, .. }
            | FetchError::Timeout { url, .. }
            | FetchError::Malformed { url, .. } => url,
        }
    }
}

/// Failures locating or reading the SGML header block.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum HeaderError {
    #[error("no SEC-HEADER block found in filing body")]
    HeaderNotFound,

    #[error("header block has no entity with both a CIK and a company name")]
    NoCompanyInfo,

    #[error("header block has no ACCESSION NUMBER")]
    MissingAccessionNumber,

    #[error("accession number {0:?} does not match NNNNNNNNNN-NN-NNNNNN")]
    InvalidAccessionNumber(String),
}

/// One malformed holdings row. The row is skipped and parsing continues.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowParseError {
    #[error("missing required field {field}")]
    MissingField { field: &'static str },

    #[error("field {field} is negative: {value:?}")]
    Negative { field: &'static str, value: String },

    #[error("field {field} is not a whole number: {value:?}")]
    NotNumeric { field: &'static str, value: String },

    #[error("CUSIP {value:?} is {len} characters, expected 9")]
    InvalidCusip { value: String, len: usize },

    #[error("field {field} has unrecognised value {value:?}")]
    UnknownValue { field: &'static str, value: String },

    #[error("row has {found} columns, expected at least {expected}")]
    ColumnCount { found: usize, expected: usize },
}

/// Failures that prevent reading a holdings table at all.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum HoldingsError {
    #[error("information table XML could not be parsed: {0}")]
    MalformedXml(String),
}

/// Why one filing was left out of a run's output.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", content = "error", rename_all = "snake_case")]
pub enum FilingError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("header parse failed: {0}")]
    Header(#[from] HeaderError),

    #[error("holdings table unreadable: {0}")]
    Holdings(#[from] HoldingsError),
}

/// Raised when consecutive fetch failures indicate the archive is unreachable.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("aborting after {consecutive_failures} consecutive fetch failures; last: {last_error}")]
pub struct FatalAbort {
    pub consecutive_failures: usize,
    pub last_error: FetchError,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Run aborted: {0}")]
    Aborted(#[from] FatalAbort),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        let url = "https://www.sec.gov/x".to_string();
        assert!(FetchError::RateLimited { url: url.clone() }.is_retryable());
        assert!(FetchError::ServerError { url: url.clone(), status: 503 }.is_retryable());
        assert!(FetchError::Timeout { url: url.clone(), detail: "t".into() }.is_retryable());
        assert!(!FetchError::NotFound { url: url.clone() }.is_retryable());
        assert!(!FetchError::Malformed { url: url.clone(), reason: "HTTP 403".into() }.is_retryable());
    }

    #[test]
    fn test_not_found_does_not_count_toward_abort() {
        let url = "https://www.sec.gov/x".to_string();
        assert!(!FetchError::NotFound { url: url.clone() }.counts_toward_abort());
        assert!(FetchError::Malformed { url, reason: "bad".into() }.counts_toward_abort());
    }

    #[test]
    fn test_filing_error_serializes_with_stage() {
        let err = FilingError::from(HeaderError::HeaderNotFound);
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["stage"], "header");
        assert_eq!(json["error"]["kind"], "header_not_found");

        let err = FilingError::from(FetchError::NotFound { url: "u".into() });
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["stage"], "fetch");
        assert_eq!(json["error"]["kind"], "not_found");
        assert_eq!(json["error"]["url"], "u");
    }

    #[test]
    fn test_row_error_reason_text() {
        let err = RowParseError::Negative { field: "sshPrnamt", value: "-5".into() };
        assert_eq!(err.to_string(), "field sshPrnamt is negative: \"-5\"");
    }
}
