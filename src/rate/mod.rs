//! Token-bucket rate limiting.
//!
//! [`TokenBucket`] is the lazily replenished bucket; [`RateLimiter`] keeps one
//! per client key and evicts idle clients in the background.

mod bucket;
mod limiter;

pub use bucket::TokenBucket;
pub use limiter::RateLimiter;

use thiserror::Error;

/// The bucket holds fewer tokens than requested. Retryable once it refills.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("insufficient tokens: {remaining} remaining")]
pub struct InsufficientTokens {
    /// Floor of the tokens still in the bucket.
    pub remaining: u64,
}
