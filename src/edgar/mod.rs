// src/edgar/mod.rs
pub mod client;
pub mod index;
pub mod models;
pub mod rate_limiter;
pub mod transport;

pub use client::EdgarClient;
pub use index::{IndexFilter, IndexResolver, QuarterIndex};
pub use rate_limiter::{RateLimiter, RetryPolicy};
pub use transport::{ReqwestTransport, Transport, TransportError, TransportResponse};
