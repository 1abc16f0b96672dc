//! Shared pipeline state.
//!
//! Holds what outlives a single request: the configuration, the session
//! manager and the rate limiter together with its eviction task.
//!
//! # Structured Concurrency
//!
//! The limiter sweep runs on a `tokio_util::task::TaskTracker` and stops when
//! the `CancellationToken` fires. Call [`AppState::shutdown`] before exit to
//! stop it and wait for it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use crate::config::Config;
use crate::error::CoreResult;
use crate::middleware::ip::TrustedProxyConfig;
use crate::rate::RateLimiter;
use crate::session::{SessionManager, SessionRepository};

pub struct AppState<R> {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionManager<R>>,
    /// `None` when rate limiting is disabled.
    pub rate_limiter: Option<Arc<RateLimiter>>,
    pub trusted_proxies: Arc<TrustedProxyConfig>,
    pub started_at: Instant,
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl<R> Clone for AppState<R> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            sessions: self.sessions.clone(),
            rate_limiter: self.rate_limiter.clone(),
            trusted_proxies: self.trusted_proxies.clone(),
            started_at: self.started_at,
            task_tracker: self.task_tracker.clone(),
            cancellation_token: self.cancellation_token.clone(),
        }
    }
}

impl<R: SessionRepository> AppState<R> {
    /// Build the state and start the limiter sweep, if limiting is enabled.
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when the rate limit settings are invalid.
    pub fn new(config: Config, repository: R) -> CoreResult<Self> {
        let task_tracker = TaskTracker::new();
        let cancellation_token = CancellationToken::new();

        let rate_limiter = if config.rate_limiting_enabled() {
            let mut limiter = RateLimiter::new(config.rate_limit_capacity, config.rate_limit_replenish)?;
            if let Some(interval) = config.rate_limit_sweep_interval {
                limiter = limiter.with_eviction_interval(interval);
            }
            let limiter = Arc::new(limiter);
            limiter.spawn_sweeper(&task_tracker, cancellation_token.clone());
            Some(limiter)
        } else {
            None
        };

        Ok(Self {
            trusted_proxies: Arc::new(TrustedProxyConfig::new(&config.trusted_proxies)),
            config: Arc::new(config),
            sessions: Arc::new(SessionManager::new(repository)),
            rate_limiter,
            started_at: Instant::now(),
            task_tracker,
            cancellation_token,
        })
    }
}

impl<R> AppState<R> {
    /// Stop background tasks and wait for them to finish.
    pub async fn shutdown(&self) {
        info!("Stopping background tasks");
        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;
        info!("All background tasks have completed");
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.uptime().as_secs()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::session::MemoryStore;

    #[tokio::test]
    async fn test_limiter_follows_config() {
        let state = AppState::new(Config::default(), MemoryStore::new()).unwrap();
        assert!(state.rate_limiter.is_some());
        state.shutdown().await;

        let config = Config {
            rate_limit_capacity: 0.0,
            ..Config::default()
        };
        let state = AppState::new(config, MemoryStore::new()).unwrap();
        assert!(state.rate_limiter.is_none());
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_sweep_interval_override() {
        let config = Config {
            rate_limit_sweep_interval: Some(Duration::from_secs(7)),
            ..Config::default()
        };
        let state = AppState::new(config, MemoryStore::new()).unwrap();
        let limiter = state.rate_limiter.clone().unwrap();
        assert_eq!(limiter.eviction_interval(), Duration::from_secs(7));
        state.shutdown().await;
    }
}
