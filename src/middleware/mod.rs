//! Tower layers making up the request pipeline.
//!
//! Listed outermost first, as assembled by [`crate::pipeline::build_app`]:
//!
//! ```text
//! RequestId → Trace → Recover → Timeout → RateLimit → Session → Csrf → Router
//!                        ↓         ↓          ↓          ↓        ↓
//!                      Fault      504        429     store err  400/403
//! ```
//!
//! Every layer that can fail takes an [`crate::error::ErrorHandler`] through
//! `with_error_handler`; without one the JSON default is used.
//!
//! The HTTP helpers [`etag`], [`method_override`], [`remove_trailing_slash`]
//! and [`max_bytes`] are router middleware instead, registered with
//! `Router::wrap` so they run before a route is resolved.

pub(crate) mod body;
pub(crate) mod cookie;
pub mod csrf;
pub mod etag;
pub mod ip;
pub mod max_bytes;
pub mod method_override;
pub mod rate_limit;
pub mod recover;
pub mod request_id;
pub mod session;
pub mod slash;
pub mod timeout;

pub use csrf::CsrfLayer;
pub use etag::etag;
pub use ip::{CidrRange, RealIpError, TrustedProxyConfig, UNKNOWN_IP, client_ip};
pub use max_bytes::max_bytes;
pub use method_override::{METHOD_FIELD, METHOD_OVERRIDE_HEADER, method_override};
pub use rate_limit::RateLimitLayer;
pub use recover::RecoverLayer;
pub use request_id::{REQUEST_ID_HEADER, RequestId, RequestIdLayer};
pub use session::SessionLayer;
pub use slash::remove_trailing_slash;
pub use timeout::{RequestDeadline, TimeoutLayer};
