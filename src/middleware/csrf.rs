//! CSRF verification middleware.
//!
//! Every request gets a [`CsrfToken`] extension restored from the CSRF
//! cookie (or freshly generated). Unsafe methods must echo a masked token
//! back through one of:
//!
//! 1. the `x-csrf-token` header,
//! 2. the `_csrf` field of a urlencoded form body,
//! 3. for multipart bodies, the `_csrf` query parameter, so handlers can
//!    still stream the upload. The token is renewed right after such a
//!    check since it travelled in the URL. Without it the body is buffered
//!    up to the form limit and its `_csrf` part is read.
//!
//! The cookie is written on the response only when the token is new.

use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::{FromRequest, Multipart, Query};
use axum::http::{Method, Request, Response, header};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use tower::{Layer, Service};
use tracing::debug;

use super::body::{buffer_body, form_field, media_type};
use super::cookie::{read_cookie, set_cookie, vary_cookie};
use crate::csrf::{COOKIE_NAME, COOKIE_NAME_INSECURE, CsrfToken, HEADER_NAME};
use crate::error::{CoreResult, Error, ErrorHandler, RequestInfo, default_error_handler};
use crate::metrics;
use crate::router::BoxFuture;

/// Default cap on a form body buffered to look for the form field.
pub const DEFAULT_FORM_LIMIT: usize = 1024 * 1024;

const FIELD_NAME: &str = "_csrf";

#[derive(Deserialize)]
struct CsrfField {
    #[serde(rename = "_csrf")]
    token: Option<String>,
}

#[derive(Clone)]
pub struct CsrfLayer {
    insecure: bool,
    form_limit: usize,
    error_handler: ErrorHandler,
}

impl Default for CsrfLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl CsrfLayer {
    pub fn new() -> Self {
        Self {
            insecure: false,
            form_limit: DEFAULT_FORM_LIMIT,
            error_handler: default_error_handler(),
        }
    }

    /// Use the plain `csrf` cookie without `Secure`, for local HTTP.
    pub fn insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    pub fn with_form_limit(mut self, limit: usize) -> Self {
        self.form_limit = limit;
        self
    }

    pub fn with_error_handler(mut self, error_handler: ErrorHandler) -> Self {
        self.error_handler = error_handler;
        self
    }

    fn cookie_name(&self) -> &'static str {
        if self.insecure {
            COOKIE_NAME_INSECURE
        } else {
            COOKIE_NAME
        }
    }
}

impl<S> Layer<S> for CsrfLayer {
    type Service = CsrfService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CsrfService {
            inner,
            layer: self.clone(),
        }
    }
}

#[derive(Clone)]
pub struct CsrfService<S> {
    inner: S,
    layer: CsrfLayer,
}

impl<S> Service<Request<Body>> for CsrfService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = BoxFuture<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();
        let layer = self.layer.clone();
        let cookie_name = layer.cookie_name();

        Box::pin(async move {
            let info = RequestInfo::from_request(&req);
            let reject = |err: Error| {
                metrics::record_csrf_rejection(rejection_reason(&err));
                Ok((layer.error_handler)(&info, &err))
            };

            let token = match restore_token(read_cookie(req.headers(), cookie_name)) {
                Ok(token) => token,
                Err(e) => return reject(e),
            };

            let mut req = req;
            if !is_safe(req.method()) {
                let (restored, submitted) = match submitted_token(req, layer.form_limit).await {
                    Ok(found) => found,
                    Err(e) => return reject(e),
                };
                req = restored;

                let Some(submitted) = submitted else {
                    return reject(Error::EmptyCsrfToken);
                };
                if let Err(e) = token.verify_encoded(&submitted.value) {
                    return reject(e);
                }
                if submitted.from_query {
                    debug!("CSRF token was sent in the query string, renewing");
                    token.renew();
                }
            }

            req.extensions_mut().insert(token.clone());
            let mut response = inner.call(req).await?;

            let headers = response.headers_mut();
            if token.is_new() {
                set_cookie(headers, cookie_name, &token.masked_encoded(), layer.insecure);
            }
            vary_cookie(headers);

            Ok(response)
        })
    }
}

fn restore_token(cookie: Option<&str>) -> CoreResult<CsrfToken> {
    let Some(value) = cookie.filter(|v| !v.is_empty()) else {
        return Ok(CsrfToken::generate());
    };

    let decoded = URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|e| Error::MalformedCookie {
            name: "csrf",
            reason: e.to_string(),
        })?;
    CsrfToken::set_token(Some(&decoded))
}

struct Submitted {
    value: String,
    from_query: bool,
}

/// Find the submitted token, handing back the request with its body intact.
async fn submitted_token(
    req: Request<Body>,
    form_limit: usize,
) -> CoreResult<(Request<Body>, Option<Submitted>)> {
    if let Some(value) = req
        .headers()
        .get(HEADER_NAME)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        let submitted = Submitted {
            value: value.to_string(),
            from_query: false,
        };
        return Ok((req, Some(submitted)));
    }

    let (media_type, params) = media_type(req.headers());

    match media_type.as_str() {
        "application/x-www-form-urlencoded" => {
            let (req, bytes) = buffer_body(req, form_limit).await?;
            let token = form_field(bytes, FIELD_NAME).await?;
            Ok((req, body_token(token)))
        }
        "multipart/form-data" | "multipart/mixed" => {
            let from_query = Query::<CsrfField>::try_from_uri(req.uri())
                .ok()
                .and_then(|Query(field)| field.token)
                .filter(|t| !t.is_empty());
            if let Some(value) = from_query {
                let submitted = Submitted {
                    value,
                    from_query: true,
                };
                return Ok((req, Some(submitted)));
            }

            let (req, bytes) = buffer_body(req, form_limit).await?;
            // The parser only accepts form-data, so mixed bodies are read
            // under that media type with the same boundary.
            let scratch = Request::builder()
                .method(Method::POST)
                .header(header::CONTENT_TYPE, format!("multipart/form-data;{params}"))
                .body(Body::from(bytes))
                .map_err(|e| Error::Body(e.to_string()))?;
            let token = multipart_field(scratch).await?;

            Ok((req, body_token(token)))
        }
        _ => Ok((req, None)),
    }
}

async fn multipart_field(scratch: Request<Body>) -> CoreResult<Option<String>> {
    let mut multipart = Multipart::from_request(scratch, &())
        .await
        .map_err(|e| Error::Body(e.body_text()))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Body(e.body_text()))?
    {
        if field.name() == Some(FIELD_NAME) {
            let value = field.text().await.map_err(|e| Error::Body(e.body_text()))?;
            return Ok(Some(value));
        }
    }
    Ok(None)
}

fn body_token(token: Option<String>) -> Option<Submitted> {
    token.filter(|t| !t.is_empty()).map(|value| Submitted {
        value,
        from_query: false,
    })
}

fn is_safe(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

fn rejection_reason(err: &Error) -> &'static str {
    match err {
        Error::EmptyCsrfToken => "empty",
        Error::InvalidCsrfToken => "invalid",
        Error::MalformedCookie { .. } => "malformed_cookie",
        _ => "bad_request",
    }
}
