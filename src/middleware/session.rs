//! Session loading and committing.
//!
//! The layer loads the session named by the client's cookie before the
//! inner service runs and commits it exactly once when the response comes
//! back out. The cookie is only written when the committed id differs from
//! the one the client sent; a destroyed session gets an expired cookie.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{Request, Response};
use tower::{Layer, Service};
use tracing::{debug, error};

use super::cookie::{expire_cookie, read_cookie, set_cookie, vary_cookie};
use crate::error::{Error, ErrorHandler, RequestInfo, default_error_handler};
use crate::metrics;
use crate::router::BoxFuture;
use crate::session::{COOKIE_NAME, COOKIE_NAME_INSECURE, SessionManager, SessionRepository, Status};

pub struct SessionLayer<R> {
    manager: Arc<SessionManager<R>>,
    insecure: bool,
    error_handler: ErrorHandler,
}

impl<R> Clone for SessionLayer<R> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            insecure: self.insecure,
            error_handler: self.error_handler.clone(),
        }
    }
}

impl<R: SessionRepository> SessionLayer<R> {
    pub fn new(manager: Arc<SessionManager<R>>) -> Self {
        Self {
            manager,
            insecure: false,
            error_handler: default_error_handler(),
        }
    }

    /// Issue a plain `session` cookie without `Secure`, for local HTTP.
    pub fn insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
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

impl<S, R> Layer<S> for SessionLayer<R> {
    type Service = SessionService<S, R>;

    fn layer(&self, inner: S) -> Self::Service {
        SessionService {
            inner,
            layer: self.clone(),
        }
    }
}

pub struct SessionService<S, R> {
    inner: S,
    layer: SessionLayer<R>,
}

impl<S: Clone, R> Clone for SessionService<S, R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            layer: self.layer.clone(),
        }
    }
}

impl<S, R> Service<Request<Body>> for SessionService<S, R>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
    R: SessionRepository,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = BoxFuture<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();
        let layer = self.layer.clone();
        let cookie_name = layer.cookie_name();

        Box::pin(async move {
            let info = RequestInfo::from_request(&req);
            let client_id = read_cookie(req.headers(), cookie_name).map(str::to_string);

            let session = match layer.manager.load(client_id.as_deref()).await {
                Ok(session) => session,
                Err(e) => {
                    error!(error = %e, "Failed to load session");
                    return Ok((layer.error_handler)(&info, &Error::SessionStore(e)));
                }
            };
            req.extensions_mut().insert(session.clone());

            let mut response = inner.call(req).await?;

            let committed = match layer.manager.commit(&session).await {
                Ok(committed) => committed,
                Err(e) => {
                    error!(error = %e, "Failed to commit session");
                    return Ok((layer.error_handler)(&info, &Error::SessionStore(e)));
                }
            };
            metrics::record_session_commit(status_label(committed.status));

            let headers = response.headers_mut();
            if committed.status == Status::Destroyed {
                if client_id.is_some() {
                    expire_cookie(headers, cookie_name, layer.insecure);
                }
            } else if client_id.as_deref() != Some(committed.id.as_str()) {
                debug!("Issuing session cookie");
                set_cookie(headers, cookie_name, &committed.id, layer.insecure);
            }
            vary_cookie(headers);

            Ok(response)
        })
    }
}

fn status_label(status: Status) -> &'static str {
    match status {
        Status::Unchanged => "unchanged",
        Status::Accessed => "accessed",
        Status::Modified => "modified",
        Status::Destroyed => "destroyed",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::convert::Infallible;

    use axum::http::{StatusCode, header};
    use tower::ServiceExt;

    use super::*;
    use crate::session::{MemoryStore, Session};

    fn manager() -> Arc<SessionManager<MemoryStore>> {
        Arc::new(SessionManager::new(MemoryStore::new()))
    }

    fn request(cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn set_cookie_header(response: &Response<Body>) -> Option<String> {
        response
            .headers()
            .get(header::SET_COOKIE)
            .map(|v| v.to_str().unwrap().to_string())
    }

    fn cookie_value(set_cookie: &str) -> String {
        let pair = set_cookie.split(';').next().unwrap();
        pair.split_once('=').unwrap().1.to_string()
    }

    #[tokio::test]
    async fn test_new_session_issues_cookie_once() {
        let sm = manager();
        let svc = SessionLayer::new(sm.clone()).insecure(true).layer(tower::service_fn(
            |req: Request<Body>| async move {
                let session = req.extensions().get::<Session>().unwrap();
                session.set("visits", 1);
                Ok::<_, Infallible>(Response::new(Body::empty()))
            },
        ));

        let response = svc.clone().oneshot(request(None)).await.unwrap();
        let cookie = set_cookie_header(&response).unwrap();
        assert!(cookie.starts_with("session="));
        assert!(!cookie.contains("Secure"));
        assert_eq!(response.headers()[header::VARY], "Cookie");

        let id = cookie_value(&cookie);
        assert!(sm.repository().contains(&id).await);

        let response = svc
            .oneshot(request(Some(&format!("session={id}"))))
            .await
            .unwrap();
        assert!(set_cookie_header(&response).is_none());
    }

    #[tokio::test]
    async fn test_destroy_expires_cookie() {
        let sm = manager();
        let svc = SessionLayer::new(sm.clone()).layer(tower::service_fn(
            |req: Request<Body>| async move {
                req.extensions().get::<Session>().unwrap().destroy();
                Ok::<_, Infallible>(Response::new(Body::empty()))
            },
        ));

        let existing = sm.commit(&sm.load(None).await.unwrap()).await.unwrap().id;
        let response = svc
            .oneshot(request(Some(&format!("__Host-session={existing}"))))
            .await
            .unwrap();

        let cookie = set_cookie_header(&response).unwrap();
        assert!(cookie.starts_with("__Host-session=; Max-Age=0"));
        assert!(cookie.contains("Secure"));
        assert!(sm.repository().is_empty().await);
    }

    #[tokio::test]
    async fn test_renew_reissues_cookie() {
        let sm = manager();
        let svc = SessionLayer::new(sm.clone()).insecure(true).layer(tower::service_fn(
            |req: Request<Body>| async move {
                req.extensions().get::<Session>().unwrap().renew();
                Ok::<_, Infallible>(Response::new(Body::empty()))
            },
        ));

        let existing = sm.commit(&sm.load(None).await.unwrap()).await.unwrap().id;
        let response = svc
            .oneshot(request(Some(&format!("session={existing}"))))
            .await
            .unwrap();

        let renewed = cookie_value(&set_cookie_header(&response).unwrap());
        assert_ne!(renewed, existing);
        assert!(!sm.repository().contains(&existing).await);
        assert!(sm.repository().contains(&renewed).await);
    }

    struct Broken;

    impl SessionRepository for Broken {
        async fn find(&self, _id: &str) -> Result<crate::session::SessionRecord, crate::session::StoreError> {
            Err(crate::session::StoreError::Backend("down".into()))
        }

        async fn save(&self, _record: crate::session::SessionRecord) -> Result<(), crate::session::StoreError> {
            Err(crate::session::StoreError::Backend("down".into()))
        }

        async fn destroy(&self, _id: &str) -> Result<(), crate::session::StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_store_errors_reach_error_handler() {
        let svc = SessionLayer::new(Arc::new(SessionManager::new(Broken))).layer(
            tower::service_fn(|_req: Request<Body>| async {
                Ok::<_, Infallible>(Response::new(Body::empty()))
            }),
        );

        let load_fails = svc.clone().oneshot(request(Some("__Host-session=abc"))).await.unwrap();
        assert_eq!(load_fails.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let commit_fails = svc.oneshot(request(None)).await.unwrap();
        assert_eq!(commit_fails.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
