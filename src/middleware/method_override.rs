//! Method override for HTML forms, which can only send `GET` and `POST`.
//!
//! A `POST` may ask to be routed as `PUT`, `PATCH` or `DELETE` through the
//! `_method` field of a urlencoded body or the `x-http-method-override`
//! header. The form field wins when both are present. Any other requested
//! method is ignored.

use axum::extract::Request;
use axum::http::Method;
use tracing::debug;

use super::body::{buffer_body, form_field, media_type};
use crate::error::{ErrorHandler, RequestInfo};
use crate::router::{Middleware, Next};

pub const METHOD_OVERRIDE_HEADER: &str = "x-http-method-override";
pub const METHOD_FIELD: &str = "_method";

/// Router middleware rewriting the method of overridden `POST` requests
/// before routing.
///
/// Urlencoded bodies are buffered up to `form_limit` to read the field and
/// restored for the handler.
pub fn method_override(form_limit: usize, error_handler: ErrorHandler) -> Middleware {
    Middleware::from_fn(move |req: Request, next: Next| {
        let error_handler = error_handler.clone();
        async move {
            if req.method() != Method::POST {
                return next.run(req).await;
            }

            let mut req = req;
            let mut requested = None;
            let (media_type, _) = media_type(req.headers());
            if media_type == "application/x-www-form-urlencoded" {
                let info = RequestInfo::from_request(&req);
                let field = match buffer_body(req, form_limit).await {
                    Ok((restored, bytes)) => {
                        req = restored;
                        form_field(bytes, METHOD_FIELD).await
                    }
                    Err(e) => return error_handler(&info, &e),
                };
                match field {
                    Ok(field) => requested = field,
                    Err(e) => return error_handler(&info, &e),
                }
            }

            let requested = requested.or_else(|| {
                req.headers()
                    .get(METHOD_OVERRIDE_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            });
            if let Some(method) = requested.as_deref().and_then(overridable) {
                debug!(method = %method, uri = %req.uri(), "Overriding POST method");
                *req.method_mut() = method;
            }

            next.run(req).await
        }
    })
}

fn overridable(requested: &str) -> Option<Method> {
    match requested.trim().to_ascii_uppercase().as_str() {
        "PUT" => Some(Method::PUT),
        "PATCH" => Some(Method::PATCH),
        "DELETE" => Some(Method::DELETE),
        _ => None,
    }
}
