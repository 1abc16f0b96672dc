//! Body buffering for the layers that peek at form fields before the handler.

use std::collections::HashMap;
use std::error::Error as StdError;

use axum::Form;
use axum::body::{Body, Bytes};
use axum::extract::FromRequest;
use axum::http::{HeaderMap, Method, Request, header};
use http_body_util::LengthLimitError;

use crate::error::{CoreResult, Error};

/// Read the body up to `limit` and put the bytes back into the request.
pub(crate) async fn buffer_body(
    req: Request<Body>,
    limit: usize,
) -> CoreResult<(Request<Body>, Bytes)> {
    let (parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, limit)
        .await
        .map_err(|e| body_error(limit, &e))?;
    Ok((Request::from_parts(parts, Body::from(bytes.clone())), bytes))
}

/// `PayloadTooLarge` when a length limit anywhere in the chain was hit.
pub(crate) fn body_error(limit: usize, err: &(dyn StdError + 'static)) -> Error {
    let too_large =
        std::iter::successors(Some(err), |&e| e.source()).any(|e| e.is::<LengthLimitError>());
    if too_large {
        Error::PayloadTooLarge(limit)
    } else {
        Error::Body(err.to_string())
    }
}

/// Lowercased media type and the raw parameters after it.
pub(crate) fn media_type(headers: &HeaderMap) -> (String, String) {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let (media_type, params) = content_type.split_once(';').unwrap_or((content_type, ""));
    (media_type.trim().to_ascii_lowercase(), params.to_string())
}

/// Value of `name` in a urlencoded body. Empty values count as absent.
pub(crate) async fn form_field(bytes: Bytes, name: &str) -> CoreResult<Option<String>> {
    let form_req = Request::builder()
        .method(Method::POST)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(bytes))
        .map_err(|e| Error::Body(e.to_string()))?;
    let Form(mut fields) = Form::<HashMap<String, String>>::from_request(form_req, &())
        .await
        .map_err(|e| Error::Body(e.body_text()))?;

    Ok(fields.remove(name).filter(|v| !v.is_empty()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use http_body_util::BodyExt;

    use super::*;

    #[tokio::test]
    async fn test_buffer_restores_body() {
        let req = Request::post("/").body(Body::from("a=1&b=2")).unwrap();
        let (req, bytes) = buffer_body(req, 64).await.unwrap();

        assert_eq!(bytes, "a=1&b=2");
        let body = req.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, "a=1&b=2");
    }

    #[tokio::test]
    async fn test_buffer_over_limit() {
        let req = Request::post("/").body(Body::from("x".repeat(32))).unwrap();
        let err = buffer_body(req, 8).await.unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge(8)));
    }

    #[tokio::test]
    async fn test_form_field() {
        let bytes = Bytes::from_static(b"_method=PUT&name=a%20b&empty=");
        assert_eq!(form_field(bytes.clone(), "name").await.unwrap().as_deref(), Some("a b"));
        assert_eq!(form_field(bytes.clone(), "_method").await.unwrap().as_deref(), Some("PUT"));
        assert!(form_field(bytes.clone(), "empty").await.unwrap().is_none());
        assert!(form_field(bytes, "missing").await.unwrap().is_none());
    }

    #[test]
    fn test_media_type() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            "Multipart/Mixed; boundary=AbC".parse().unwrap(),
        );
        let (media_type, params) = media_type(&headers);
        assert_eq!(media_type, "multipart/mixed");
        assert_eq!(params, " boundary=AbC");
    }
}
