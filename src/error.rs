//! Pipeline errors and the hook through which they become responses.
//!
//! Layers never render failures themselves: they build an [`Error`] and pass
//! it with a [`RequestInfo`] to the injected [`ErrorHandler`]. Handler panics
//! become a [`Fault`], whose backtrace is recorded by [`install_panic_hook`]
//! while the panicking frames are still on the stack.

use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::sync::{Arc, Once};
use std::time::Duration;

use axum::http::{HeaderValue, Method, Request, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

use crate::middleware::ip::RealIpError;
use crate::middleware::request_id::RequestId;
use crate::rate::InsufficientTokens;
use crate::session::StoreError;

/// Errors surfaced by the request pipeline.
///
/// Every middleware that can fail hands one of these to the injected
/// [`ErrorHandler`]; the default handler renders it through
/// [`IntoResponse`].
#[derive(Error, Debug)]
pub enum Error {
    #[error("empty CSRF token")]
    EmptyCsrfToken,

    #[error("invalid CSRF token")]
    InvalidCsrfToken,

    #[error("malformed {name} cookie: {reason}")]
    MalformedCookie { name: &'static str, reason: String },

    #[error(transparent)]
    InsufficientTokens(#[from] InsufficientTokens),

    #[error("deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("no route matches {0}")]
    NotFound(String),

    #[error("method {method} not allowed")]
    MethodNotAllowed { method: Method, allowed: String },

    #[error(transparent)]
    Fault(#[from] Fault),

    #[error("session store: {0}")]
    SessionStore(#[from] StoreError),

    #[error("client address: {0}")]
    RealIp(#[from] RealIpError),

    #[error("read request body: {0}")]
    Body(String),

    #[error("request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// HTTP status code that represents this error to the client.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::EmptyCsrfToken | Error::MalformedCookie { .. } | Error::Body(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::InvalidCsrfToken => StatusCode::FORBIDDEN,
            Error::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Error::InsufficientTokens(_) => StatusCode::TOO_MANY_REQUESTS,
            Error::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Error::Fault(_) | Error::SessionStore(_) | Error::RealIp(_) | Error::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::EmptyCsrfToken => "empty_csrf_token",
            Error::InvalidCsrfToken => "invalid_csrf_token",
            Error::MalformedCookie { .. } => "malformed_cookie",
            Error::InsufficientTokens(_) => "rate_limited",
            Error::DeadlineExceeded(_) => "deadline_exceeded",
            Error::NotFound(_) => "not_found",
            Error::MethodNotAllowed { .. } => "method_not_allowed",
            Error::Fault(_) => "fault",
            Error::SessionStore(_) => "session_store",
            Error::RealIp(_) => "client_address",
            Error::Body(_) => "bad_body",
            Error::PayloadTooLarge(_) => "payload_too_large",
            Error::Config(_) => "config_error",
        }
    }

    /// Message that is safe to show to a client.
    fn public_message(&self) -> String {
        match self {
            Error::EmptyCsrfToken => "CSRF token missing from request.".to_string(),
            Error::InvalidCsrfToken => "CSRF token is invalid.".to_string(),
            Error::MalformedCookie { .. } => "A request cookie is malformed.".to_string(),
            Error::InsufficientTokens(_) => "Rate limit exceeded. Please retry later.".to_string(),
            Error::DeadlineExceeded(_) => "Request timed out. Please try again.".to_string(),
            Error::NotFound(path) => format!("No route matches {path}"),
            Error::MethodNotAllowed { method, .. } => {
                format!("Method {method} is not allowed for this resource")
            }
            Error::Fault(fault) => format!(
                "An internal error occurred (reference {}). Please contact support if the issue persists.",
                fault.id
            ),
            Error::Body(_) => "Request body could not be read.".to_string(),
            Error::PayloadTooLarge(limit) => format!("Request body exceeds {limit} bytes."),
            Error::SessionStore(_) | Error::RealIp(_) | Error::Config(_) => {
                "An internal error occurred. Please contact support if the issue persists."
                    .to_string()
            }
        }
    }
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
}

impl IntoResponse for &Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Full detail stays in the logs; clients only get the sanitized message.
        if status.is_server_error() {
            error!(error = %self, kind = self.kind(), "Request failed");
        } else {
            warn!(error = %self, kind = self.kind(), "Request rejected");
        }

        let body = ErrorResponse {
            error: self.kind(),
            message: self.public_message(),
        };
        let mut response = (status, axum::Json(body)).into_response();

        if let Error::MethodNotAllowed { allowed, .. } = self
            && let Ok(value) = HeaderValue::from_str(allowed)
        {
            response.headers_mut().insert(header::ALLOW, value);
        }

        response
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (&self).into_response()
    }
}

/// A captured handler fault.
///
/// Created by the recovery layer (or by the timeout worker before it forwards
/// the fault outward) so the failure can be traced to a single log line.
#[derive(Error, Debug, Clone)]
#[error("fault {id}: {message}")]
pub struct Fault {
    pub id: Uuid,
    pub message: String,
    pub request_id: Option<String>,
    /// Backtrace of the panicking thread at the panic site, or of the
    /// catcher when no panic hook recorded one.
    pub backtrace: String,
}

impl Fault {
    pub fn new(message: impl Into<String>, request_id: Option<String>) -> Self {
        Self::with_backtrace(message, request_id, Backtrace::force_capture().to_string())
    }

    /// Build a fault from a panic payload.
    ///
    /// Must run on the thread that caught the panic, before it panics again.
    pub fn from_panic(payload: &(dyn std::any::Any + Send), request_id: Option<String>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "handler panicked with a non-string payload".to_string()
        };

        match take_panic_backtrace() {
            Some(backtrace) => Self::with_backtrace(message, request_id, backtrace),
            None => Self::new(message, request_id),
        }
    }

    fn with_backtrace(
        message: impl Into<String>,
        request_id: Option<String>,
        backtrace: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            message: message.into(),
            request_id,
            backtrace,
        }
    }
}

thread_local! {
    static PANIC_BACKTRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// Chain a panic hook that records the backtrace of every panic for
/// [`Fault::from_panic`]. The previous hook still runs afterwards.
///
/// Idempotent; the recovery and timeout layers call it when built.
pub fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let backtrace = Backtrace::force_capture().to_string();
            let _ = PANIC_BACKTRACE.try_with(|slot| {
                if let Ok(mut slot) = slot.try_borrow_mut() {
                    *slot = Some(backtrace);
                }
            });
            previous(info);
        }));
    });
}

fn take_panic_backtrace() -> Option<String> {
    PANIC_BACKTRACE
        .try_with(|slot| slot.try_borrow_mut().ok().and_then(|mut slot| slot.take()))
        .ok()
        .flatten()
}

/// Panic payload that aborts the request without being converted into a
/// [`Fault`]. The recovery layer re-raises it unchanged.
#[derive(Debug, Clone, Copy)]
pub struct AbortRequest;

/// What the error handler is told about the failing request.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: Method,
    pub uri: Uri,
    pub request_id: Option<String>,
}

impl RequestInfo {
    pub fn from_request<B>(req: &Request<B>) -> Self {
        Self {
            method: req.method().clone(),
            uri: req.uri().clone(),
            request_id: req
                .extensions()
                .get::<RequestId>()
                .map(|id| id.as_str().to_string()),
        }
    }
}

/// Callback turning a pipeline error into the client-visible response.
pub type ErrorHandler = Arc<dyn Fn(&RequestInfo, &Error) -> Response + Send + Sync>;

/// The handler used when none is injected: the sanitized JSON body.
pub fn default_error_handler() -> ErrorHandler {
    Arc::new(|info: &RequestInfo, err: &Error| {
        if let Some(request_id) = &info.request_id {
            tracing::debug!(request_id = %request_id, method = %info.method, uri = %info.uri, "Rendering error response");
        }
        err.into_response()
    })
}

/// Convenience type alias for Results with [`Error`].
pub type CoreResult<T> = Result<T, Error>;
