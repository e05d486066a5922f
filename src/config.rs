// src/config.rs
//! Configuration for fetching and for a harvest run.
//!
//! Values come from the caller (the CLI) with environment-variable overlays
//! for the fetch settings. Nothing here touches the network.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;

use reqwest::header::HeaderValue;

use crate::utils::error::ConfigError;

// SEC asks for 10 requests/second max. Be conservative. >100ms delay.
pub const DEFAULT_MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(150);
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 4;
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(500);
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(30);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: usize = 10;

/// The full-index archive starts in 1993.
pub const FIRST_INDEX_YEAR: i32 = 1993;

/// Which quarterly index file to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexKind {
    /// `master.idx`, pipe-delimited.
    #[default]
    Master,
    /// `form.idx`, fixed-width and sorted by form type.
    Form,
}

impl IndexKind {
    pub fn file_name(&self) -> &'static str {
        match self {
            IndexKind::Master => "master.idx",
            IndexKind::Form => "form.idx",
        }
    }
}

/// Settings shared by every outbound request.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Contact identifier sent as the User-Agent, e.g. "Acme Research ops@acme.example".
    pub user_agent: String,
    pub min_request_interval: Duration,
    pub max_retry_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub request_timeout: Duration,
}

impl FetchConfig {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            min_request_interval: DEFAULT_MIN_REQUEST_INTERVAL,
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_cap: DEFAULT_BACKOFF_CAP,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Overlay `EDGAR_*` environment variables on top of `self`.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Ok(agent) = std::env::var("EDGAR_USER_AGENT") {
            if self.user_agent.trim().is_empty() {
                self.user_agent = agent;
            }
        }
        if let Some(ms) = parse_env_var::<u64>("EDGAR_MIN_INTERVAL_MS")? {
            self.min_request_interval = Duration::from_millis(ms);
        }
        if let Some(attempts) = parse_env_var::<u32>("EDGAR_MAX_RETRIES")? {
            self.max_retry_attempts = attempts;
        }
        if let Some(ms) = parse_env_var::<u64>("EDGAR_BACKOFF_BASE_MS")? {
            self.backoff_base = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_env_var::<u64>("EDGAR_TIMEOUT_SECS")? {
            self.request_timeout = Duration::from_secs(secs);
        }
        Ok(self)
    }

    /// Fails fast, before any network call, when the contact identifier is unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_user_agent(&self.user_agent)?;
        if self.max_retry_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        Ok(())
    }
}

/// Only non-emptiness and header-safety are checked, not email format.
pub fn validate_user_agent(user_agent: &str) -> Result<HeaderValue, ConfigError> {
    let trimmed = user_agent.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::MissingUserAgent);
    }
    HeaderValue::from_str(trimmed).map_err(|_| ConfigError::InvalidUserAgent(user_agent.to_string()))
}

/// Everything a single pipeline run needs.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub fetch: FetchConfig,
    pub start_year: i32,
    pub end_year: i32,
    pub index_kind: IndexKind,
    pub cik_filter: Option<BTreeSet<String>>,
    pub form_type_filter: Option<BTreeSet<String>>,
    /// Let a "13F-HR" filter also match "13F-HR/A".
    pub include_amendments: bool,
    /// The run aborts once more than this many fetches fail in a row; 0 disables the abort.
    pub max_consecutive_failures: usize,
}

impl HarvestConfig {
    pub fn new(fetch: FetchConfig, start_year: i32, end_year: i32) -> Self {
        Self {
            fetch,
            start_year,
            end_year,
            index_kind: IndexKind::default(),
            cik_filter: None,
            form_type_filter: None,
            include_amendments: false,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.fetch.validate()?;
        validate_year_range(self.start_year, self.end_year)
    }
}

pub fn validate_year_range(start: i32, end: i32) -> Result<(), ConfigError> {
    if start > end || start < FIRST_INDEX_YEAR {
        return Err(ConfigError::InvalidYearRange { start, end });
    }
    Ok(())
}

/// Helper function to parse environment variable as a specific type
fn parse_env_var<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnvVar { name: name.to_string(), value }),
        Err(_) => Ok(None),
    }
}
