//! Per-request body size caps.

use axum::body::Body;
use axum::extract::Request;
use axum::http::header;
use http_body_util::Limited;
use tracing::warn;

use crate::error::{Error, ErrorHandler, RequestInfo};
use crate::router::{Middleware, Next};

/// Router middleware capping request bodies at `limit(&req)` bytes.
///
/// A declared `content-length` over the cap is rejected with 413 through
/// `error_handler` before the handler runs. Otherwise the body is wrapped so
/// that reading past the cap fails; axum's body extractors turn that
/// failure into 413 as well. A cap of 0 forbids any body; return
/// `usize::MAX` to leave a request uncapped.
pub fn max_bytes<F>(limit: F, error_handler: ErrorHandler) -> Middleware
where
    F: Fn(&Request) -> usize + Send + Sync + 'static,
{
    Middleware::from_fn(move |req: Request, next: Next| {
        let limit = limit(&req);
        let error_handler = error_handler.clone();
        async move {
            if limit == usize::MAX {
                return next.run(req).await;
            }

            let declared = req
                .headers()
                .get(header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            if declared.is_some_and(|len| len > limit as u64) {
                let info = RequestInfo::from_request(&req);
                warn!(limit, declared = ?declared, uri = %info.uri, "Request body too large");
                return error_handler(&info, &Error::PayloadTooLarge(limit));
            }

            next.run(req.map(|body| Body::new(Limited::new(body, limit))))
                .await
        }
    })
}
