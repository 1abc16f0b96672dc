//! Assembly of the full request pipeline.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │   Request ID     │ ← assigns/propagates x-request-id
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← per-request span
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Recover      │ ← 500 on fault, reported once
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Timeout      │ ← 504, worker output discarded
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Rate Limiting   │ ← 429 if exceeded (when enabled)
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Session      │ ← load, commit on the way out
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │      CSRF        │ ← 400/403 on unsafe methods
//! └────────┬─────────┘
//!          ▼
//!       Router
//! ```

use axum::body::Body;
use axum::http::Request;
use tower_http::trace::TraceLayer;
use tracing::{Span, info, info_span};

use crate::error::ErrorHandler;
use crate::middleware::{
    CsrfLayer, RateLimitLayer, RecoverLayer, RequestId, RequestIdLayer, SessionLayer, TimeoutLayer,
};
use crate::router::Router;
use crate::session::SessionRepository;
use crate::state::AppState;

/// Wrap `router` in the full middleware stack configured by `state`.
///
/// Every failing layer reports through `error_handler`; the router keeps the
/// handler it was built with.
///
/// Serve the result with
/// `into_make_service_with_connect_info::<SocketAddr>()` so the rate limiter
/// sees the peer address.
pub fn build_app<R: SessionRepository>(
    state: &AppState<R>,
    router: Router,
    error_handler: ErrorHandler,
) -> axum::Router {
    let config = &state.config;
    let mut app = axum::Router::new().fallback_service(router.into_service());

    // Layers are added innermost first.

    info!(
        insecure_cookies = config.insecure_cookies,
        form_limit = config.max_form_body_size,
        "CSRF protection enabled"
    );
    app = app.layer(
        CsrfLayer::new()
            .insecure(config.insecure_cookies)
            .with_form_limit(config.max_form_body_size)
            .with_error_handler(error_handler.clone()),
    );

    app = app.layer(
        SessionLayer::new(state.sessions.clone())
            .insecure(config.insecure_cookies)
            .with_error_handler(error_handler.clone()),
    );

    if let Some(limiter) = &state.rate_limiter {
        info!(
            capacity = config.rate_limit_capacity,
            replenish = config.rate_limit_replenish,
            sweep_secs = limiter.eviction_interval().as_secs(),
            trusted_proxies = config.trusted_proxies.len(),
            "Rate limiting enabled"
        );
        app = app.layer(
            RateLimitLayer::new(limiter.clone())
                .with_trusted_proxies(state.trusted_proxies.clone())
                .with_error_handler(error_handler.clone()),
        );
    } else {
        info!("Rate limiting disabled (RATE_LIMIT_CAPACITY=0)");
    }

    info!(
        timeout_ms = config.request_timeout.as_millis() as u64,
        "Request deadline configured"
    );
    app = app.layer(TimeoutLayer::new(config.request_timeout).with_error_handler(error_handler.clone()));

    app = app.layer(RecoverLayer::new().with_error_handler(error_handler));

    app = app.layer(TraceLayer::new_for_http().make_span_with(request_span));

    app.layer(RequestIdLayer::new())
}

fn request_span(req: &Request<Body>) -> Span {
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .map(RequestId::as_str)
        .unwrap_or("-");

    info_span!(
        "request",
        method = %req.method(),
        uri = %req.uri(),
        request_id = %request_id,
    )
}
