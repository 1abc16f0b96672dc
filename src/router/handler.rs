//! Type-erased handlers and the function middleware that wraps them.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::extract::Request;
use axum::response::{IntoResponse, Response};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

type HandlerFn = dyn Fn(Request) -> BoxFuture<Response> + Send + Sync;
type MiddlewareFn = dyn Fn(Request, Next) -> BoxFuture<Response> + Send + Sync;

/// A route handler: any async function from a request to something that
/// renders a response.
#[derive(Clone)]
pub struct Handler(Arc<HandlerFn>);

impl Handler {
    pub fn new<F, Fut, R>(f: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoResponse,
    {
        Self(Arc::new(move |req| {
            let fut = f(req);
            Box::pin(async move { fut.await.into_response() })
        }))
    }

    pub fn call(&self, req: Request) -> BoxFuture<Response> {
        (self.0)(req)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Handler")
    }
}

/// The rest of the chain, handed to a [`Middleware`].
#[derive(Clone)]
pub struct Next {
    handler: Handler,
}

impl Next {
    /// Continue with the wrapped handler. Not calling this halts the chain.
    pub async fn run(self, req: Request) -> Response {
        self.handler.call(req).await
    }
}

/// Router-level middleware: global via `Router::wrap`, or a group-scoped
/// before-hook via `Router::before`.
#[derive(Clone)]
pub struct Middleware(Arc<MiddlewareFn>);

impl Middleware {
    pub fn from_fn<F, Fut, R>(f: F) -> Self
    where
        F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoResponse,
    {
        Self(Arc::new(move |req, next| {
            let fut = f(req, next);
            Box::pin(async move { fut.await.into_response() })
        }))
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Middleware")
    }
}

/// Wrap `handler` so that `middleware[0]` runs first on the way in.
pub(crate) fn apply(handler: Handler, middleware: &[Middleware]) -> Handler {
    middleware.iter().rev().fold(handler, |inner, mw| {
        let mw = mw.clone();
        Handler(Arc::new(move |req| {
            let next = Next {
                handler: inner.clone(),
            };
            (mw.0)(req, next)
        }))
    })
}
