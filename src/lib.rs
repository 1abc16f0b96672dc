//! # webcore
//!
//! The request-processing core beneath a web application, built on Axum:
//!
//! - **Router**: `{param}` and trailing `{rest...}` patterns, route groups
//!   with before-hooks, named routes with reverse lookup
//! - **Sessions**: monotonic status tracking, deferred commit, renewal and
//!   global sign-out
//! - **CSRF**: double-submit cookie with masked tokens
//! - **Rate limiting**: per-client token buckets with idle eviction
//! - **Fault isolation**: per-request deadline on a worker task, panics
//!   reported exactly once
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Request ID → Trace → Recover → Timeout → Rate Limit        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Session → CSRF                                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Router (global middleware, group before-hooks, handlers)   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::net::SocketAddr;
//!
//! use webcore::error::default_error_handler;
//! use webcore::router::{Handler, Router};
//! use webcore::session::MemoryStore;
//! use webcore::{AppState, Config, RequestExt, build_app};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let state = AppState::new(config, MemoryStore::new())?;
//!
//!     let mut router = Router::new();
//!     router.get("/hello/{name}", Handler::new(|req| async move {
//!         format!("hello {}", req.param("name").unwrap_or_default())
//!     }));
//!
//!     let app = build_app(&state, router, default_error_handler());
//!     let listener = tokio::net::TcpListener::bind(state.config.server_addr()).await?;
//!     axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod csrf;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod pipeline;
pub mod rate;
pub mod request;
pub mod router;
pub mod session;
pub mod state;
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use error::{CoreResult, Error, ErrorHandler};
pub use pipeline::build_app;
pub use request::RequestExt;
pub use state::AppState;
