//! Canonical paths without a trailing slash.

use axum::extract::Request;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::IntoResponse;

use crate::router::{Middleware, Next};

/// Router middleware redirecting `/foo/` to `/foo`, keeping the query.
///
/// `GET` and `HEAD` get `301 Moved Permanently`; other methods get
/// `308 Permanent Redirect` so the client repeats the method and body.
pub fn remove_trailing_slash() -> Middleware {
    Middleware::from_fn(|req: Request, next: Next| async move {
        let Some(location) = canonical(req.uri().path(), req.uri().query()) else {
            return next.run(req).await;
        };
        let Ok(location) = HeaderValue::from_str(&location) else {
            return next.run(req).await;
        };

        let status = if matches!(*req.method(), Method::GET | Method::HEAD) {
            StatusCode::MOVED_PERMANENTLY
        } else {
            StatusCode::PERMANENT_REDIRECT
        };
        (status, [(header::LOCATION, location)]).into_response()
    })
}

/// Target of the redirect, or `None` when `path` is already canonical.
fn canonical(path: &str, query: Option<&str>) -> Option<String> {
    if path == "/" || !path.ends_with('/') {
        return None;
    }

    // Collapse leading slashes too: `//host/` must not become a
    // protocol-relative `//host`.
    let trimmed = path.trim_matches('/');
    let mut location = format!("/{trimmed}");
    if let Some(query) = query {
        location.push('?');
        location.push_str(query);
    }
    Some(location)
}
