//! Entity tags for `GET` responses.
//!
//! The response body is buffered and hashed with SHA-256 unless the handler
//! already set an `ETag`. A request whose `If-None-Match` lists the tag gets
//! an empty `304 Not Modified` instead. Only `200 OK` responses with a
//! non-empty body are tagged; a handler can opt out by setting an empty
//! `ETag` header.

use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use http_body_util::BodyExt;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::router::{Middleware, Next};

/// Router middleware adding `ETag` and answering conditional `GET`s.
pub fn etag() -> Middleware {
    Middleware::from_fn(|req: Request, next: Next| async move {
        if req.method() != Method::GET {
            return next.run(req).await;
        }

        let if_none_match = req.headers().get(header::IF_NONE_MATCH).cloned();
        let response = next.run(req).await;
        if response.status() != StatusCode::OK {
            return response;
        }

        let (mut parts, body) = response.into_parts();
        let bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!(error = %e, "Failed to buffer response body for ETag");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };
        if bytes.is_empty() {
            return Response::from_parts(parts, Body::empty());
        }

        let tag = match parts.headers.get(header::ETAG) {
            Some(existing) if existing.is_empty() => {
                parts.headers.remove(header::ETAG);
                return Response::from_parts(parts, Body::from(bytes));
            }
            Some(existing) => existing.clone(),
            None => {
                let tag = format!("\"{}\"", hex::encode(Sha256::digest(&bytes)));
                match HeaderValue::from_str(&tag) {
                    Ok(tag) => tag,
                    Err(_) => return Response::from_parts(parts, Body::from(bytes)),
                }
            }
        };
        parts.headers.insert(header::ETAG, tag.clone());

        if if_none_match.is_some_and(|candidates| matches(&candidates, &tag)) {
            debug!(etag = ?tag, "Client copy is current");
            parts.status = StatusCode::NOT_MODIFIED;
            parts.headers.remove(header::CONTENT_LENGTH);
            parts.headers.remove(header::CONTENT_TYPE);
            return Response::from_parts(parts, Body::empty());
        }

        Response::from_parts(parts, Body::from(bytes))
    })
}

/// Weak comparison against each tag in an `If-None-Match` list.
fn matches(candidates: &HeaderValue, tag: &HeaderValue) -> bool {
    let (Ok(candidates), Ok(tag)) = (candidates.to_str(), tag.to_str()) else {
        return false;
    };
    let tag = strip_weak(tag);

    candidates
        .split(',')
        .map(str::trim)
        .any(|candidate| candidate == "*" || strip_weak(candidate) == tag)
}

fn strip_weak(tag: &str) -> &str {
    tag.strip_prefix("W/").unwrap_or(tag)
}
