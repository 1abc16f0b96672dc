//! Access to the request-scoped values the pipeline attaches.
//!
//! ```rust,ignore
//! use webcore::RequestExt;
//!
//! let id: u64 = req.param_as("id")?;
//! let visits = req.session().and_then(|s| s.get_i64("visits"));
//! let token = req.csrf().map(|t| t.masked_encoded());
//! ```

use std::str::FromStr;
use std::sync::Arc;

use axum::http::Request;

use crate::csrf::CsrfToken;
use crate::middleware::request_id::RequestId;
use crate::middleware::timeout::RequestDeadline;
use crate::router::{Params, RouteTable};
use crate::session::Session;

/// Failure of [`RequestExt::param_as`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParamError {
    #[error("route has no parameter {0:?}")]
    Missing(String),

    #[error("parameter {name:?} is not valid: {reason}")]
    Invalid { name: String, reason: String },
}

pub trait RequestExt {
    /// Path parameters captured by the matched route.
    fn params(&self) -> Option<&Params>;

    fn param(&self, name: &str) -> Option<&str> {
        self.params().and_then(|p| p.get(name))
    }

    /// Parse a path parameter with [`FromStr`].
    ///
    /// # Errors
    ///
    /// When the route did not capture `name` or the value does not parse.
    fn param_as<T>(&self, name: &str) -> Result<T, ParamError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self
            .param(name)
            .ok_or_else(|| ParamError::Missing(name.to_string()))?;
        raw.parse::<T>().map_err(|e| ParamError::Invalid {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }

    fn session(&self) -> Option<&Session>;

    fn csrf(&self) -> Option<&CsrfToken>;

    fn request_id(&self) -> Option<&str>;

    fn deadline(&self) -> Option<&RequestDeadline>;

    /// The compiled routes, for reverse lookups while handling a request.
    fn routes(&self) -> Option<&RouteTable>;
}

impl<B> RequestExt for Request<B> {
    fn params(&self) -> Option<&Params> {
        self.extensions().get::<Params>()
    }

    fn session(&self) -> Option<&Session> {
        self.extensions().get::<Session>()
    }

    fn csrf(&self) -> Option<&CsrfToken> {
        self.extensions().get::<CsrfToken>()
    }

    fn request_id(&self) -> Option<&str> {
        self.extensions().get::<RequestId>().map(RequestId::as_str)
    }

    fn deadline(&self) -> Option<&RequestDeadline> {
        self.extensions().get::<RequestDeadline>()
    }

    fn routes(&self) -> Option<&RouteTable> {
        self.extensions()
            .get::<Arc<RouteTable>>()
            .map(|table| table.as_ref())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::convert::Infallible;

    use axum::body::Body;
    use axum::http::StatusCode;
    use http_body_util::BodyExt;
    use tower::{Service, ServiceExt};

    use super::*;
    use crate::router::{Handler, Router};

    async fn body_of(router: Router, uri: &str) -> String {
        let mut svc = router.into_service();
        let response: Result<_, Infallible> = svc
            .ready()
            .await
            .unwrap()
            .call(Request::get(uri).body(Body::empty()).unwrap())
            .await;
        let response = response.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_typed_params() {
        let mut router = Router::new();
        router.get(
            "/users/{id}",
            Handler::new(|req: axum::extract::Request| async move {
                match req.param_as::<u32>("id") {
                    Ok(id) => format!("user {id}"),
                    Err(e) => e.to_string(),
                }
            }),
        );

        assert_eq!(body_of(router, "/users/42").await, "user 42");
    }

    #[tokio::test]
    async fn test_invalid_and_missing_params() {
        let mut router = Router::new();
        router.get(
            "/users/{id}",
            Handler::new(|req: axum::extract::Request| async move {
                let invalid = req.param_as::<u32>("id").unwrap_err();
                let missing = req.param_as::<u32>("other").unwrap_err();
                assert!(matches!(invalid, ParamError::Invalid { .. }));
                assert_eq!(missing, ParamError::Missing("other".to_string()));
                "checked"
            }),
        );

        assert_eq!(body_of(router, "/users/abc").await, "checked");
    }

    #[tokio::test]
    async fn test_routes_available_to_handlers() {
        let mut router = Router::new();
        router
            .get(
                "/posts/{slug}",
                Handler::new(|req: axum::extract::Request| async move {
                    req.routes().unwrap().path("post", &[("slug", "hello")])
                }),
            )
            .name("post");

        assert_eq!(body_of(router, "/posts/x").await, "/posts/hello");
    }

    #[test]
    fn test_absent_extensions() {
        let req = Request::new(());
        assert!(req.session().is_none());
        assert!(req.csrf().is_none());
        assert!(req.request_id().is_none());
        assert!(req.deadline().is_none());
        assert!(req.param("id").is_none());
    }
}
