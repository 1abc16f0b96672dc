//! Per-client token buckets with idle eviction.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace};

use super::{InsufficientTokens, TokenBucket};
use crate::error::{CoreResult, Error};

const MIN_EVICTION_INTERVAL: Duration = Duration::from_secs(1);
const MAX_EVICTION_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug)]
struct Client {
    bucket: Arc<TokenBucket>,
    seen_at: Instant,
}

/// Token-bucket limiter keyed by client address.
///
/// Buckets are created lazily on first sight of a key. A sweep started with
/// [`RateLimiter::spawn_sweeper`] evicts clients idle for longer than the
/// eviction interval.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    replenish: f64,
    eviction_interval: Duration,
    clients: Mutex<HashMap<String, Client>>,
}

impl RateLimiter {
    /// Create a limiter handing each client `capacity` tokens refilled at
    /// `replenish` tokens per second.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if either value is not a positive finite number.
    pub fn new(capacity: f64, replenish: f64) -> CoreResult<Self> {
        if !capacity.is_finite() || capacity <= 0.0 {
            return Err(Error::Config(format!(
                "rate limit capacity must be positive, got {capacity}"
            )));
        }
        if !replenish.is_finite() || replenish <= 0.0 {
            return Err(Error::Config(format!(
                "rate limit replenish rate must be positive, got {replenish}"
            )));
        }

        Ok(Self {
            capacity,
            replenish,
            eviction_interval: default_eviction_interval(capacity, replenish),
            clients: Mutex::new(HashMap::new()),
        })
    }

    /// Override the idle eviction interval.
    pub fn with_eviction_interval(mut self, interval: Duration) -> Self {
        self.eviction_interval = interval.max(MIN_EVICTION_INTERVAL);
        self
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn eviction_interval(&self) -> Duration {
        self.eviction_interval
    }

    /// Take one token from the bucket of `key`, creating the bucket if needed.
    ///
    /// Returns the floor of the tokens left.
    pub fn take(&self, key: &str, now: Instant) -> Result<u64, InsufficientTokens> {
        self.bucket(key, now).take(1.0, now)
    }

    /// Time until a client holding `remaining` tokens has a full bucket again.
    pub fn time_until_full(&self, remaining: u64) -> Duration {
        let missing = (self.capacity - remaining as f64).max(0.0);
        Duration::try_from_secs_f64((missing / self.replenish).round()).unwrap_or(Duration::MAX)
    }

    fn bucket(&self, key: &str, now: Instant) -> Arc<TokenBucket> {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(client) = clients.get_mut(key) {
            client.seen_at = now;
            return client.bucket.clone();
        }

        let bucket = Arc::new(TokenBucket::new(self.capacity, self.replenish));
        clients.insert(
            key.to_string(),
            Client {
                bucket: bucket.clone(),
                seen_at: now,
            },
        );
        bucket
    }

    /// Remove clients not seen within the eviction interval. Returns how many
    /// were removed.
    pub fn evict_idle(&self, now: Instant) -> usize {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        let before = clients.len();

        clients.retain(|_, client| {
            now.checked_duration_since(client.seen_at)
                .is_none_or(|idle| idle <= self.eviction_interval)
        });

        before - clients.len()
    }

    /// Number of clients currently tracked.
    pub fn client_count(&self) -> usize {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Spawn the idle-client sweep on `tracker`; it stops when `cancel` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, tracker: &TaskTracker, cancel: CancellationToken) {
        let limiter = self.clone();
        let period = self.eviction_interval;

        tracker.spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await; // Skip first immediate tick

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Rate limit sweep received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let evicted = limiter.evict_idle(Instant::now());
                        crate::metrics::set_rate_limit_clients(limiter.client_count());
                        if evicted > 0 {
                            debug!(evicted, remaining = limiter.client_count(), "Evicted idle rate limit clients");
                        } else {
                            trace!("Rate limit sweep found no idle clients");
                        }
                    }
                }
            }

            debug!("Rate limit sweep shutting down");
        });
    }
}

/// Twice the time an empty bucket needs to fill, clamped to a sane range.
fn default_eviction_interval(capacity: f64, replenish: f64) -> Duration {
    let secs = 2.0 * capacity / replenish;
    Duration::try_from_secs_f64(secs)
        .unwrap_or(MAX_EVICTION_INTERVAL)
        .clamp(MIN_EVICTION_INTERVAL, MAX_EVICTION_INTERVAL)
}
