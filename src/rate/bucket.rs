//! Lazily replenished token bucket.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use super::InsufficientTokens;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last: Option<Instant>,
}

/// A token bucket holding at most `capacity` tokens, refilled at `replenish`
/// tokens per second.
///
/// Elapsed time is applied on each access; there is no ticking clock. Buckets
/// start full.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    replenish: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(capacity: f64, replenish: f64) -> Self {
        Self {
            capacity,
            replenish,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last: None,
            }),
        }
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn replenish_rate(&self) -> f64 {
        self.replenish
    }

    /// Replenish up to `now`, then take `n` tokens.
    ///
    /// Returns the floor of the tokens left. A zero or negative `n` only
    /// reports. When fewer than `n` tokens are available nothing is taken and
    /// the error carries the current floor.
    ///
    /// A `now` earlier than the previous access adds nothing and leaves the
    /// replenish timestamp where it was.
    pub fn take(&self, n: f64, now: Instant) -> Result<u64, InsufficientTokens> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        match state.last {
            None => state.last = Some(now),
            Some(last) => {
                if let Some(elapsed) = now.checked_duration_since(last) {
                    let refill = elapsed.as_secs_f64() * self.replenish;
                    state.tokens = (state.tokens + refill).min(self.capacity);
                    state.last = Some(now);
                }
            }
        }

        if n > 0.0 {
            if state.tokens < n {
                return Err(InsufficientTokens {
                    remaining: floor(state.tokens),
                });
            }
            state.tokens -= n;
        }

        Ok(floor(state.tokens))
    }
}

fn floor(tokens: f64) -> u64 {
    tokens.max(0.0).floor() as u64
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_take_and_replenish() {
        let mut now = Instant::now();
        let bucket = TokenBucket::new(50.0, 1.0);

        assert_eq!(bucket.take(0.0, now).unwrap(), 50);
        assert_eq!(bucket.take(5.0, now).unwrap(), 45);
        assert_eq!(bucket.take(-5.0, now).unwrap(), 45);

        now += secs(2);
        assert_eq!(bucket.take(0.0, now).unwrap(), 47);
        assert_eq!(bucket.take(7.0, now).unwrap(), 40);

        now += secs(3);
        assert_eq!(bucket.take(0.0, now).unwrap(), 43);

        now += secs(20);
        assert_eq!(bucket.take(0.0, now).unwrap(), 50);
        assert_eq!(bucket.take(30.0, now).unwrap(), 20);
    }

    #[test]
    fn test_earlier_timestamp_adds_nothing() {
        let mut now = Instant::now() + secs(100);
        let bucket = TokenBucket::new(50.0, 1.0);

        assert_eq!(bucket.take(30.0, now).unwrap(), 20);

        now -= secs(20);
        assert_eq!(bucket.take(0.0, now).unwrap(), 20);

        // The timestamp was not moved back, so only 10s count from here.
        now += secs(30);
        assert_eq!(bucket.take(0.0, now).unwrap(), 30);
    }

    #[test]
    fn test_sub_second_replenish_is_floored() {
        let mut now = Instant::now();
        let bucket = TokenBucket::new(50.0, 1.0);
        assert_eq!(bucket.take(18.0, now).unwrap(), 32);

        now += Duration::from_millis(500);
        assert_eq!(bucket.take(0.0, now).unwrap(), 32);

        now += Duration::from_millis(500);
        assert_eq!(bucket.take(0.0, now).unwrap(), 33);
    }

    #[test]
    fn test_insufficient_tokens() {
        let mut now = Instant::now();
        let bucket = TokenBucket::new(50.0, 1.0);
        assert_eq!(bucket.take(17.0, now).unwrap(), 33);

        let err = bucket.take(133.0, now).unwrap_err();
        assert_eq!(err.remaining, 33);
        assert_eq!(bucket.take(33.0, now).unwrap(), 0);

        now += secs(1);
        assert_eq!(bucket.take(0.0, now).unwrap(), 1);
        assert_eq!(bucket.take(1.0, now).unwrap(), 0);
        assert_eq!(bucket.take(1.0, now).unwrap_err().remaining, 0);

        now += secs(5);
        assert_eq!(bucket.take(3.0, now).unwrap(), 2);
        assert!(bucket.take(3.0, now).is_err());
    }

    #[test]
    fn test_replenish_more_than_one_token() {
        let mut now = Instant::now();
        let bucket = TokenBucket::new(50.0, 3.0);

        assert_eq!(bucket.take(10.0, now).unwrap(), 40);
        now += secs(1);
        assert_eq!(bucket.take(0.0, now).unwrap(), 43);
    }

    #[test]
    fn test_fractional_tokens() {
        let mut now = Instant::now();
        let bucket = TokenBucket::new(50.0, 0.5);

        assert_eq!(bucket.take(7.7, now).unwrap(), 42);

        now += secs(1);
        assert_eq!(bucket.take(0.0, now).unwrap(), 42);
        now += secs(1);
        assert_eq!(bucket.take(0.0, now).unwrap(), 43);
        now += secs(1);
        assert_eq!(bucket.take(0.0, now).unwrap(), 43);
        now += secs(1);
        assert_eq!(bucket.take(0.0, now).unwrap(), 44);
    }

    #[test]
    fn test_concurrent_take_and_replenish() {
        let full = 1000.0;
        let start = Instant::now();
        let bucket = Arc::new(TokenBucket::new(full, 1.0));

        assert_eq!(bucket.take(full / 2.0, start).unwrap(), 500);

        let granted = Arc::new(AtomicU64::new(0));
        let handles: Vec<_> = (1..=400_u64)
            .map(|i| {
                let bucket = bucket.clone();
                let granted = granted.clone();
                std::thread::spawn(move || {
                    if bucket.take(1.0, start + secs(i)).is_ok() {
                        granted.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // Never more than the initial half plus what 400s of refill allows.
        let granted = granted.load(Ordering::SeqCst);
        assert!(granted <= 900, "granted {granted}");
        let remaining = bucket.take(0.0, start + secs(400)).unwrap();
        assert!(remaining <= 1000, "bucket overflowed: {remaining}");
    }
}
