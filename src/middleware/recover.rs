//! Outermost fault boundary.
//!
//! Panics raised anywhere inside the chain are caught here exactly once,
//! turned into a [`Fault`] carrying the request id, logged and handed to the
//! error handler. A [`Fault`] payload forwarded by the timeout worker is
//! reported as-is. An [`AbortRequest`] payload is re-raised unchanged so the
//! server drops the connection.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{Request, Response};
use futures_util::FutureExt;
use tower::{Layer, Service};
use tracing::error;

use crate::error::{
    AbortRequest, Error, ErrorHandler, Fault, RequestInfo, default_error_handler,
    install_panic_hook,
};
use crate::metrics;
use crate::router::BoxFuture;

#[derive(Clone)]
pub struct RecoverLayer {
    error_handler: ErrorHandler,
}

impl RecoverLayer {
    pub fn new() -> Self {
        install_panic_hook();
        Self {
            error_handler: default_error_handler(),
        }
    }

    pub fn with_error_handler(mut self, error_handler: ErrorHandler) -> Self {
        self.error_handler = error_handler;
        self
    }
}

impl Default for RecoverLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Layer<S> for RecoverLayer {
    type Service = RecoverService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RecoverService {
            inner,
            error_handler: self.error_handler.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RecoverService<S> {
    inner: S,
    error_handler: ErrorHandler,
}

impl<S> Service<Request<Body>> for RecoverService<S>
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
        let error_handler = self.error_handler.clone();
        let info = RequestInfo::from_request(&req);

        // Layers below may do work in `call` itself, before the future exists.
        let future = match catch_unwind(AssertUnwindSafe(|| inner.call(req))) {
            Ok(future) => future,
            Err(payload) => {
                let response = report(payload, &info, &error_handler);
                return Box::pin(async move { Ok(response) });
            }
        };

        Box::pin(async move {
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Ok(report(payload, &info, &error_handler)),
            }
        })
    }
}

fn report(payload: Box<dyn Any + Send>, info: &RequestInfo, error_handler: &ErrorHandler) -> Response<Body> {
    if payload.is::<AbortRequest>() {
        resume_unwind(payload);
    }

    let fault = match payload.downcast::<Fault>() {
        Ok(fault) => *fault,
        Err(payload) => Fault::from_panic(payload.as_ref(), info.request_id.clone()),
    };

    metrics::record_fault();
    error!(
        fault_id = %fault.id,
        request_id = fault.request_id.as_deref().unwrap_or("-"),
        method = %info.method,
        uri = %info.uri,
        message = %fault.message,
        backtrace = %fault.backtrace,
        "Handler fault"
    );

    error_handler(info, &Error::Fault(fault))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::convert::Infallible;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use tower::ServiceExt;

    use super::*;
    use crate::middleware::timeout::TimeoutLayer;

    fn request() -> Request<Body> {
        Request::get("/boom").body(Body::empty()).unwrap()
    }

    fn counting_handler(calls: Arc<AtomicUsize>) -> ErrorHandler {
        Arc::new(move |_info: &RequestInfo, err: &Error| {
            calls.fetch_add(1, Ordering::SeqCst);
            err.into_response()
        })
    }

    #[tokio::test]
    async fn test_panic_becomes_500() {
        let calls = Arc::new(AtomicUsize::new(0));
        let svc = RecoverLayer::new()
            .with_error_handler(counting_handler(calls.clone()))
            .layer(tower::service_fn(|_req: Request<Body>| async move {
                if true {
                    panic!("kaboom");
                }
                Ok::<_, Infallible>(Response::new(Body::empty()))
            }));

        let response = svc.oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[inline(never)]
    fn reserve_inventory() {
        panic!("inside worker");
    }

    #[tokio::test]
    async fn test_fault_from_worker_reported_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(std::sync::Mutex::new(None));
        let seen_in_handler = seen.clone();
        let counter = calls.clone();
        let handler: ErrorHandler = Arc::new(move |_info: &RequestInfo, err: &Error| {
            counter.fetch_add(1, Ordering::SeqCst);
            if let Error::Fault(fault) = err {
                *seen_in_handler.lock().unwrap() =
                    Some((fault.message.clone(), fault.backtrace.clone()));
            }
            err.into_response()
        });

        let svc = tower::ServiceBuilder::new()
            .layer(RecoverLayer::new().with_error_handler(handler.clone()))
            .layer(TimeoutLayer::new(Duration::from_secs(1)).with_error_handler(handler))
            .service(tower::service_fn(|_req: Request<Body>| async move {
                reserve_inventory();
                Ok::<_, Infallible>(Response::new(Body::empty()))
            }));

        let response = svc.oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let (message, backtrace) = seen.lock().unwrap().clone().unwrap();
        assert_eq!(message, "inside worker");
        // Recorded at the panic site, not where the worker caught it.
        assert!(backtrace.contains("reserve_inventory"), "{backtrace}");
    }

    #[tokio::test]
    async fn test_abort_request_propagates() {
        let calls = Arc::new(AtomicUsize::new(0));
        let svc = RecoverLayer::new()
            .with_error_handler(counting_handler(calls.clone()))
            .layer(tower::service_fn(|_req: Request<Body>| async move {
                if true {
                    std::panic::panic_any(AbortRequest);
                }
                Ok::<_, Infallible>(Response::new(Body::empty()))
            }));

        let payload = AssertUnwindSafe(svc.oneshot(request()))
            .catch_unwind()
            .await
            .unwrap_err();
        assert!(payload.is::<AbortRequest>());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_normal_response_untouched() {
        let svc = RecoverLayer::new().layer(tower::service_fn(|_req: Request<Body>| async {
            Ok::<_, Infallible>(Response::new(Body::from("fine")))
        }));

        let response = svc.oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
