//! Routes of the demo server.
//!
//! | Route                              | Name     | Handler                 |
//! |------------------------------------|----------|-------------------------|
//! | `GET /`                            | `home`   | session counter, token  |
//! | `GET /health`                      | `health` | liveness                |
//! | `POST /sign-in`                    |          | renews session and CSRF |
//! | `POST /sign-out`                   |          | destroys the session    |
//! | `DELETE /session`                  |          | destroys the session    |
//! | `GET /users/{id}`                  | `user`   | typed parameter         |
//! | `GET /u/{id}`                      |          | redirect to `user`      |
//! | `GET /files/{path...}`             | `file`   | greedy parameter        |
//! | `GET /slow`                        |          | honours the deadline    |
//! | `GET /boom`                        |          | panics                  |
//! | `GET /admin`                       | `admin`  | requires a user         |
//! | `POST /admin/sign-out-everywhere`  |          | rotates the session key |
//!
//! Global middleware, in order: security headers, trailing-slash redirect,
//! body cap, method override (so forms can reach `DELETE /session`), ETag.

pub mod demo;
mod health;

pub use health::{HealthResponse, health_check};

use axum::http::{Method, StatusCode};

use crate::error::ErrorHandler;
use crate::middleware::{etag, max_bytes, method_override, remove_trailing_slash};
use crate::router::{Handler, Middleware, Router};
use crate::session::SessionRepository;
use crate::state::AppState;

/// Build the demo router.
pub fn routes<R: SessionRepository>(state: &AppState<R>, error_handler: ErrorHandler) -> Router {
    let body_limit = state.config.max_form_body_size;
    let mut router = Router::with_error_handler(error_handler.clone());
    router.wrap(Middleware::from_fn(demo::security_headers));
    router.wrap(remove_trailing_slash());
    router.wrap(max_bytes(move |_req| body_limit, error_handler.clone()));
    router.wrap(method_override(body_limit, error_handler));
    router.wrap(etag());

    let health_state = state.clone();
    router
        .get(
            "/health",
            Handler::new(move |_req| health_check(health_state.clone())),
        )
        .name("health");

    router.get("/", Handler::new(demo::index)).name("home");
    router.post("/sign-in", Handler::new(demo::sign_in));
    router.post("/sign-out", Handler::new(demo::sign_out));
    router.delete("/session", Handler::new(demo::sign_out));

    router.get("/users/{id}", Handler::new(demo::user)).name("user");
    router.redirect(
        Method::GET,
        "/u/{id}",
        "/users/{id}",
        StatusCode::MOVED_PERMANENTLY,
    );
    router.get("/files/{path...}", Handler::new(demo::file)).name("file");

    router.get("/slow", Handler::new(demo::slow));
    router.get("/boom", Handler::new(demo::boom));

    let sessions = state.sessions.clone();
    router.prefix("/admin", move |r| {
        r.before(Middleware::from_fn(demo::require_user));
        r.get("/", Handler::new(demo::admin)).name("admin");
        r.post(
            "/sign-out-everywhere",
            Handler::new(move |req| demo::sign_out_everywhere(sessions.clone(), req)),
        );
    });

    router
}
