//! Deadline and fault isolation for the rest of the chain.
//!
//! The inner service runs on its own task and its response body is buffered
//! there. The caller waits for whichever comes first:
//!
//! - the worker's outcome, which becomes the response (or, for a fault, is
//!   re-raised for [`super::recover`] to report);
//! - the deadline, which seals the channel, cancels the request's
//!   [`RequestDeadline`] token and reports `DeadlineExceeded`.
//!
//! Once the channel is sealed the worker's outcome is dropped, so a late
//! handler can never reach the client.

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, resume_unwind};
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use futures_util::FutureExt;
use http_body_util::BodyExt;
use tokio::sync::oneshot;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tower::{Layer, Service};
use tracing::{debug, warn};

use crate::error::{
    AbortRequest, Error, ErrorHandler, Fault, RequestInfo, default_error_handler,
    install_panic_hook,
};
use crate::metrics;
use crate::router::BoxFuture;

/// Per-request deadline handed to handlers.
///
/// The token is cancelled when the deadline passes, so long-running
/// handlers can stop early:
///
/// ```rust,ignore
/// tokio::select! {
///     _ = deadline.cancelled() => return StatusCode::GATEWAY_TIMEOUT,
///     rows = query => rows,
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RequestDeadline {
    token: CancellationToken,
    deadline: Instant,
}

impl RequestDeadline {
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the deadline has passed and the request was abandoned.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// What the worker reports back.
enum WorkerOutcome<E> {
    Completed(Response<Body>),
    Failed(E),
    Faulted(Fault),
    Aborted(Box<dyn Any + Send>),
}

impl<E> fmt::Debug for WorkerOutcome<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WorkerOutcome::Completed(_) => "Completed",
            WorkerOutcome::Failed(_) => "Failed",
            WorkerOutcome::Faulted(_) => "Faulted",
            WorkerOutcome::Aborted(_) => "Aborted",
        })
    }
}

#[derive(Clone)]
pub struct TimeoutLayer {
    timeout: Duration,
    error_handler: ErrorHandler,
}

impl TimeoutLayer {
    pub fn new(timeout: Duration) -> Self {
        install_panic_hook();
        Self {
            timeout,
            error_handler: default_error_handler(),
        }
    }

    pub fn with_error_handler(mut self, error_handler: ErrorHandler) -> Self {
        self.error_handler = error_handler;
        self
    }
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService {
            inner,
            layer: self.clone(),
        }
    }
}

#[derive(Clone)]
pub struct TimeoutService<S> {
    inner: S,
    layer: TimeoutLayer,
}

impl<S> Service<Request<Body>> for TimeoutService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Send + 'static,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = BoxFuture<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let inner = self.inner.clone();
        let layer = self.layer.clone();

        let info = RequestInfo::from_request(&req);
        let deadline = RequestDeadline {
            token: CancellationToken::new(),
            deadline: Instant::now() + layer.timeout,
        };
        req.extensions_mut().insert(deadline.clone());

        let (tx, mut rx) = oneshot::channel();
        tokio::spawn(run_worker(inner, req, info.request_id.clone(), tx));

        Box::pin(async move {
            let outcome = match timeout_at(deadline.deadline, &mut rx).await {
                Ok(received) => received.ok(),
                Err(_) => {
                    // Seal the channel; only an outcome that already arrived
                    // may still be used.
                    rx.close();
                    match rx.try_recv() {
                        Ok(outcome) => Some(outcome),
                        Err(_) => {
                            deadline.token.cancel();
                            metrics::record_deadline_exceeded();
                            warn!(
                                method = %info.method,
                                uri = %info.uri,
                                timeout_ms = layer.timeout.as_millis() as u64,
                                "Request deadline exceeded"
                            );
                            let err = Error::DeadlineExceeded(layer.timeout);
                            return Ok((layer.error_handler)(&info, &err));
                        }
                    }
                }
            };

            match outcome {
                Some(WorkerOutcome::Completed(response)) => Ok(response),
                Some(WorkerOutcome::Failed(e)) => Err(e),
                Some(WorkerOutcome::Faulted(fault)) => resume_unwind(Box::new(fault)),
                Some(WorkerOutcome::Aborted(payload)) => resume_unwind(payload),
                None => {
                    // The worker task went away without reporting, e.g. the
                    // runtime is shutting down.
                    let fault = Fault::new(
                        "request worker exited without a result",
                        info.request_id.clone(),
                    );
                    resume_unwind(Box::new(fault))
                }
            }
        })
    }
}

async fn run_worker<S>(
    mut inner: S,
    req: Request<Body>,
    request_id: Option<String>,
    tx: oneshot::Sender<WorkerOutcome<S::Error>>,
) where
    S: Service<Request<Body>, Response = Response<Body>> + Send,
    S::Future: Send,
{
    let started = std::time::Instant::now();
    let result = AssertUnwindSafe(async move {
        match inner.call(req).await {
            Ok(response) => Ok(buffer(response).await),
            Err(e) => Err(e),
        }
    })
    .catch_unwind()
    .await;
    metrics::record_request_duration(started.elapsed().as_secs_f64());

    let outcome = match result {
        Ok(Ok(Ok(response))) => WorkerOutcome::Completed(response),
        Ok(Ok(Err(body_error))) => WorkerOutcome::Faulted(Fault::new(
            format!("response body failed: {body_error}"),
            request_id,
        )),
        Ok(Err(e)) => WorkerOutcome::Failed(e),
        Err(payload) if payload.is::<AbortRequest>() => WorkerOutcome::Aborted(payload),
        Err(payload) => WorkerOutcome::Faulted(Fault::from_panic(payload.as_ref(), request_id)),
    };

    if let Err(outcome) = tx.send(outcome) {
        metrics::record_late_response();
        debug!(outcome = ?outcome, "Deadline already reported, discarded worker outcome");
    }
}

/// Read the whole body so nothing streams to the client from the worker.
async fn buffer(response: Response<Body>) -> Result<Response<Body>, axum::Error> {
    let (parts, body) = response.into_parts();
    let bytes = body.collect().await?.to_bytes();
    Ok(Response::from_parts(parts, Body::from(bytes)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::convert::Infallible;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use axum::http::StatusCode;
    use tower::ServiceExt;

    use super::*;

    fn request() -> Request<Body> {
        Request::get("/").body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_fast_handler_passes_through() {
        let svc = TimeoutLayer::new(Duration::from_secs(1)).layer(tower::service_fn(
            |req: Request<Body>| async move {
                assert!(req.extensions().get::<RequestDeadline>().is_some());
                Ok::<_, Infallible>(Response::new(Body::from("done")))
            },
        ));

        let response = svc.oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, "done");
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cancels_token_and_reports() {
        let observed_cancel = Arc::new(AtomicBool::new(false));
        let flag = observed_cancel.clone();

        let svc = TimeoutLayer::new(Duration::from_millis(50)).layer(tower::service_fn(
            move |req: Request<Body>| {
                let flag = flag.clone();
                async move {
                    let deadline = req.extensions().get::<RequestDeadline>().unwrap().clone();
                    deadline.cancelled().await;
                    flag.store(true, Ordering::SeqCst);
                    Ok::<_, Infallible>(Response::new(Body::from("late")))
                }
            },
        ));

        let response = svc.oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(observed_cancel.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_panic_is_reraised_as_fault() {
        let svc = TimeoutLayer::new(Duration::from_secs(1)).layer(tower::service_fn(
            |_req: Request<Body>| async move {
                if true {
                    panic!("worker blew up");
                }
                Ok::<_, Infallible>(Response::new(Body::empty()))
            },
        ));

        let payload = AssertUnwindSafe(svc.oneshot(request()))
            .catch_unwind()
            .await
            .unwrap_err();
        let fault = payload.downcast::<Fault>().unwrap();
        assert_eq!(fault.message, "worker blew up");
    }

    #[tokio::test]
    async fn test_abort_is_reraised_unchanged() {
        let svc = TimeoutLayer::new(Duration::from_secs(1)).layer(tower::service_fn(
            |_req: Request<Body>| async move {
                if true {
                    std::panic::panic_any(AbortRequest);
                }
                Ok::<_, Infallible>(Response::new(Body::empty()))
            },
        ));

        let payload = AssertUnwindSafe(svc.oneshot(request()))
            .catch_unwind()
            .await
            .unwrap_err();
        assert!(payload.is::<AbortRequest>());
    }
}
