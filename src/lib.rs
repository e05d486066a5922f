// src/lib.rs
//! Rate-limited retrieval of quarterly EDGAR indexes and 13F filings, parsed
//! into company, accession and holdings records.

pub mod config;
pub mod edgar;
pub mod parsers;
pub mod pipeline;
pub mod storage;
pub mod utils;

pub use config::{FetchConfig, HarvestConfig, IndexKind};
pub use edgar::{EdgarClient, RateLimiter};
pub use pipeline::{CancelFlag, Pipeline, RecordSets, RunOutcome, RunReport};
pub use utils::AppError;
