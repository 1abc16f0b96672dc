//! Handlers of the demo server.
//!
//! They stand in for the application code the pipeline is built for: each
//! one reads or mutates the request-scoped session and CSRF state through
//! [`RequestExt`].

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{FromRequest, Request};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::csrf::CsrfToken;
use crate::request::RequestExt;
use crate::router::Next;
use crate::session::{Session, SessionManager, SessionRepository};

/// Session key holding the signed-in user name.
pub const USER_KEY: &str = "user";

const VISITS_KEY: &str = "visits";
const SIGNED_IN_AT_KEY: &str = "signed_in_at";

#[derive(Debug, Serialize)]
pub struct IndexResponse {
    pub visits: i64,
    pub user: Option<String>,
    /// Masked token to send back in `x-csrf-token` or the `_csrf` field.
    pub csrf_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SignIn {
    pub user: String,
}

fn session_of(req: &Request) -> Result<Session, Response> {
    req.session().cloned().ok_or_else(|| {
        warn!("Session layer missing from the pipeline");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })
}

fn see_other(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(location) => (StatusCode::SEE_OTHER, [(header::LOCATION, location)]).into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// `GET /`: counts visits in the session and hands out a CSRF token.
pub async fn index(req: Request) -> Response {
    let session = match session_of(&req) {
        Ok(session) => session,
        Err(response) => return response,
    };

    let visits = session.get_i64(VISITS_KEY).unwrap_or(0) + 1;
    session.set(VISITS_KEY, visits);

    Json(IndexResponse {
        visits,
        user: session.get_string(USER_KEY),
        csrf_token: req.csrf().map(CsrfToken::masked_encoded),
    })
    .into_response()
}

/// `POST /sign-in` with a `user` form field.
///
/// Rotates both the session id and the CSRF secret.
pub async fn sign_in(req: Request) -> Response {
    let session = match session_of(&req) {
        Ok(session) => session,
        Err(response) => return response,
    };
    let csrf = req.csrf().cloned();

    let Form(form) = match Form::<SignIn>::from_request(req, &()).await {
        Ok(form) => form,
        Err(rejection) => return rejection.into_response(),
    };
    let user = form.user.trim();
    if user.is_empty() {
        return (StatusCode::BAD_REQUEST, "user must not be empty").into_response();
    }

    session.renew();
    session.set(USER_KEY, user);
    session.set_time(SIGNED_IN_AT_KEY, Utc::now());
    if let Some(csrf) = csrf {
        csrf.renew();
    }

    info!(user = %user, "User signed in");
    see_other("/")
}

/// `POST /sign-out`: destroys the session.
pub async fn sign_out(req: Request) -> Response {
    match session_of(&req) {
        Ok(session) => {
            session.destroy();
            see_other("/")
        }
        Err(response) => response,
    }
}

/// `GET /users/{id}`.
pub async fn user(req: Request) -> Response {
    match req.param_as::<u64>("id") {
        Ok(id) => Json(serde_json::json!({ "id": id })).into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

/// `GET /files/{path...}`: echoes the captured remainder of the path.
pub async fn file(req: Request) -> String {
    req.param("path").unwrap_or_default().to_string()
}

/// `GET /slow?ms=N`: sleeps, stopping early when the deadline passes.
pub async fn slow(req: Request) -> Response {
    let ms = req
        .uri()
        .query()
        .and_then(|q| q.strip_prefix("ms="))
        .and_then(|ms| ms.parse().ok())
        .unwrap_or(1_000);
    let sleep = tokio::time::sleep(Duration::from_millis(ms));

    match req.deadline() {
        Some(deadline) => {
            tokio::select! {
                _ = deadline.cancelled() => StatusCode::SERVICE_UNAVAILABLE.into_response(),
                _ = sleep => format!("slept {ms}ms").into_response(),
            }
        }
        None => {
            sleep.await;
            format!("slept {ms}ms").into_response()
        }
    }
}

/// `GET /boom`: a handler bug, caught by the recovery layer.
pub async fn boom(_req: Request) -> Response {
    panic!("demo handler panicked");
}

/// `GET /admin`: only reachable through [`require_user`].
pub async fn admin(req: Request) -> Response {
    let user = req.session().and_then(|s| s.get_string(USER_KEY));
    Json(serde_json::json!({ "admin": user })).into_response()
}

/// `POST /admin/sign-out-everywhere`: invalidates every session.
pub async fn sign_out_everywhere<R: SessionRepository>(
    sessions: Arc<SessionManager<R>>,
    req: Request,
) -> Response {
    sessions.renew_key();
    info!(request_id = req.request_id().unwrap_or("-"), "Rotated session key");
    see_other("/")
}

/// Before-hook halting with 401 unless a user is signed in.
pub async fn require_user(req: Request, next: Next) -> Response {
    let signed_in = req.session().is_some_and(|s| s.has(USER_KEY));
    if !signed_in {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    next.run(req).await
}

/// Global middleware adding headers every response should carry.
pub async fn security_headers(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    response
}
