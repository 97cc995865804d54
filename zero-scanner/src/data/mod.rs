//! Market data access for the scanner.
//!
//! - `provider`: the `DataProvider` trait and its error type
//! - `gateway`: breaker + rate limit + timeout wrapper every caller goes through
//! - `snapshot`: HTTP provider for the all-tickers market snapshot

mod gateway;
mod provider;
mod rate_limiter;
mod snapshot;

pub use gateway::ProviderGateway;
pub use provider::{DataProvider, ProviderError, RankedSymbol};
pub use rate_limiter::{shared_limiter, RateLimiter, SharedRateLimiter};
pub use snapshot::SnapshotProvider;
