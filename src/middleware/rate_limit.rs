//! Per-client rate limiting middleware.
//!
//! Each request takes one token from the bucket of its client (see
//! [`client_ip`]). Responses carry the current limit state:
//!
//! | Header                  | Value                                   |
//! |-------------------------|-----------------------------------------|
//! | `x-ratelimit-limit`     | bucket capacity                         |
//! | `x-ratelimit-remaining` | whole tokens left                       |
//! | `x-ratelimit-reset`     | unix time at which the bucket is full   |
//!
//! Rejected requests also get `retry-after` and `connection: close`, and the
//! 429 itself is rendered by the injected error handler.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Request, Response, header};
use tower::{Layer, Service};
use tracing::{error, warn};

use super::ip::{TrustedProxyConfig, client_ip};
use crate::error::{Error, ErrorHandler, RequestInfo, default_error_handler};
use crate::metrics;
use crate::rate::RateLimiter;
use crate::router::BoxFuture;

type ConsumePredicate = Arc<dyn Fn(&Request<Body>) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<RateLimiter>,
    trusted_proxies: Arc<TrustedProxyConfig>,
    consume: Option<ConsumePredicate>,
    error_handler: ErrorHandler,
}

impl RateLimitLayer {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            trusted_proxies: Arc::new(TrustedProxyConfig::default()),
            consume: None,
            error_handler: default_error_handler(),
        }
    }

    pub fn with_trusted_proxies(mut self, trusted_proxies: Arc<TrustedProxyConfig>) -> Self {
        self.trusted_proxies = trusted_proxies;
        self
    }

    /// Only requests for which `consume` returns true take a token; the rest
    /// pass through untouched.
    pub fn with_consume<F>(mut self, consume: F) -> Self
    where
        F: Fn(&Request<Body>) -> bool + Send + Sync + 'static,
    {
        self.consume = Some(Arc::new(consume));
        self
    }

    pub fn with_error_handler(mut self, error_handler: ErrorHandler) -> Self {
        self.error_handler = error_handler;
        self
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            layer: self.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    layer: RateLimitLayer,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = BoxFuture<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();
        let layer = self.layer.clone();

        if let Some(consume) = &layer.consume
            && !consume(&req)
        {
            return Box::pin(async move { inner.call(req).await });
        }

        let info = RequestInfo::from_request(&req);
        let key = match client_ip(&req, &layer.trusted_proxies) {
            Ok(ip) => ip.into_owned(),
            Err(e) => {
                error!(error = %e, "Could not derive client address");
                let response = (layer.error_handler)(&info, &Error::RealIp(e));
                return Box::pin(async move { Ok(response) });
            }
        };

        let limiter = layer.limiter.clone();
        let outcome = limiter.take(&key, Instant::now());

        Box::pin(async move {
            match outcome {
                Ok(remaining) => {
                    let mut response = inner.call(req).await?;
                    limit_headers(response.headers_mut(), &limiter, remaining);
                    Ok(response)
                }
                Err(insufficient) => {
                    let wait = limiter.time_until_full(insufficient.remaining);
                    warn!(
                        client_ip = %key,
                        path = %info.uri.path(),
                        "Rate limit exceeded for client"
                    );
                    metrics::record_rate_limited();

                    let mut response = (layer.error_handler)(&info, &Error::from(insufficient));
                    let headers = response.headers_mut();
                    limit_headers(headers, &limiter, insufficient.remaining);
                    headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
                    headers.insert(header::RETRY_AFTER, HeaderValue::from(wait.as_secs().max(1)));
                    Ok(response)
                }
            }
        })
    }
}

fn limit_headers(headers: &mut HeaderMap, limiter: &RateLimiter, remaining: u64) {
    let reset = unix_now().saturating_add(limiter.time_until_full(remaining));

    // Shortest exact form: 100 stays "100", 2.5 stays "2.5".
    if let Ok(limit) = HeaderValue::from_str(&limiter.capacity().to_string()) {
        headers.insert("x-ratelimit-limit", limit);
    }
    headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(reset.as_secs()));
}

fn unix_now() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
}
