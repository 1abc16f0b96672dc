//! Pattern router.
//!
//! Routes are registered on a [`Router`] and compiled into an immutable
//! [`RouteTable`] shared by every request. Patterns use `{name}` for a
//! single segment and a trailing `{name...}` for the rest of the path:
//!
//! ```no_run
//! use webcore::router::{Handler, Router};
//!
//! let mut router = Router::new();
//! router.get("/", Handler::new(|_req| async { "home" })).name("home");
//! router.prefix("/files", |r| {
//!     r.get("/{path...}", Handler::new(|_req| async { "file" })).name("file");
//! });
//! assert_eq!(router.path("file", &[("path", "a/b.txt")]), "/files/a/b.txt");
//! ```
//!
//! Registration mistakes (colliding routes, bad patterns, duplicate names)
//! panic while the router is being built, never while serving.

mod handler;
mod pattern;
mod tree;

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::Request;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tower::Service;
use tracing::debug;

use crate::error::{Error, ErrorHandler, RequestInfo, default_error_handler};

pub use handler::{BoxFuture, Handler, Middleware, Next};
pub use pattern::{Pattern, PatternError, Segment};

pub(crate) use pattern::split_path;
use tree::{Endpoint, Node};

/// Every method `Router::any` registers.
const ALL_METHODS: [Method; 9] = [
    Method::GET,
    Method::HEAD,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
    Method::OPTIONS,
    Method::CONNECT,
    Method::TRACE,
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("no route named {0:?}")]
    UnknownName(String),

    #[error(transparent)]
    Pattern(#[from] PatternError),
}

/// Parameters captured from the request path, in pattern order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
struct Scope {
    prefix: String,
    before: Vec<Middleware>,
    depth: usize,
}

/// Route registration.
pub struct Router {
    root: Node,
    names: HashMap<String, Arc<Pattern>>,
    global: Vec<Middleware>,
    scope: Scope,
    error_handler: ErrorHandler,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self::with_error_handler(default_error_handler())
    }

    /// A router reporting not-found, method-not-allowed and failed
    /// redirects through `error_handler`.
    pub fn with_error_handler(error_handler: ErrorHandler) -> Self {
        Self {
            root: Node::default(),
            names: HashMap::new(),
            global: Vec::new(),
            scope: Scope::default(),
            error_handler,
        }
    }

    /// Register `handler` for `method` on `pattern`.
    ///
    /// The handler is wrapped by every before-hook registered so far in the
    /// enclosing groups.
    ///
    /// # Panics
    ///
    /// On an invalid pattern or when the method and pattern shape are
    /// already registered.
    pub fn handle(&mut self, method: Method, pattern: &str, handler: Handler) -> RouteRef<'_> {
        let pattern = self.compile(pattern);
        let handler = handler::apply(handler, &self.scope.before);

        debug!(method = %method, pattern = %pattern, "Registering route");
        self.root.insert(Endpoint {
            method,
            handler,
            pattern: pattern.clone(),
        });

        RouteRef {
            names: &mut self.names,
            pattern,
        }
    }

    pub fn get(&mut self, pattern: &str, handler: Handler) -> RouteRef<'_> {
        self.handle(Method::GET, pattern, handler)
    }

    pub fn head(&mut self, pattern: &str, handler: Handler) -> RouteRef<'_> {
        self.handle(Method::HEAD, pattern, handler)
    }

    pub fn post(&mut self, pattern: &str, handler: Handler) -> RouteRef<'_> {
        self.handle(Method::POST, pattern, handler)
    }

    pub fn put(&mut self, pattern: &str, handler: Handler) -> RouteRef<'_> {
        self.handle(Method::PUT, pattern, handler)
    }

    pub fn patch(&mut self, pattern: &str, handler: Handler) -> RouteRef<'_> {
        self.handle(Method::PATCH, pattern, handler)
    }

    pub fn delete(&mut self, pattern: &str, handler: Handler) -> RouteRef<'_> {
        self.handle(Method::DELETE, pattern, handler)
    }

    pub fn options(&mut self, pattern: &str, handler: Handler) -> RouteRef<'_> {
        self.handle(Method::OPTIONS, pattern, handler)
    }

    pub fn connect(&mut self, pattern: &str, handler: Handler) -> RouteRef<'_> {
        self.handle(Method::CONNECT, pattern, handler)
    }

    pub fn trace(&mut self, pattern: &str, handler: Handler) -> RouteRef<'_> {
        self.handle(Method::TRACE, pattern, handler)
    }

    /// Register `handler` for every standard method.
    pub fn any(&mut self, pattern: &str, handler: Handler) -> RouteRef<'_> {
        for method in ALL_METHODS.iter().filter(|m| **m != Method::TRACE) {
            self.handle(method.clone(), pattern, handler.clone());
        }
        self.handle(Method::TRACE, pattern, handler)
    }

    /// Answer `method` on `src` with a redirect to `dst`. Parameters
    /// captured by `src` are substituted into `dst`.
    ///
    /// # Panics
    ///
    /// When `status` is not a 3xx code, either pattern is invalid, or `dst`
    /// uses a parameter `src` does not capture.
    pub fn redirect(
        &mut self,
        method: Method,
        src: &str,
        dst: &str,
        status: StatusCode,
    ) -> RouteRef<'_> {
        assert!(
            status.is_redirection(),
            "redirect status must be 3xx, got {status}"
        );

        let dst = match Pattern::parse(dst) {
            Ok(p) => Arc::new(p),
            Err(e) => panic!("invalid redirect target: {e}"),
        };
        let src_pattern = self.compile(src);
        if let Some(name) = dst
            .param_names()
            .find(|name| !src_pattern.param_names().any(|n| n == *name))
        {
            panic!("redirect target {dst} uses {name:?}, which {src_pattern} does not capture");
        }

        let error_handler = self.error_handler.clone();
        let handler = Handler::new(move |req: Request| {
            let dst = dst.clone();
            let error_handler = error_handler.clone();
            async move {
                let params = req.extensions().get::<Params>().cloned().unwrap_or_default();
                let location = dst.substitute(&params.0).map(|mut path| {
                    if let Some(query) = req.uri().query() {
                        path.push('?');
                        path.push_str(query);
                    }
                    path
                });

                match location.ok().and_then(|l| HeaderValue::from_str(&l).ok()) {
                    Some(location) => (status, [(header::LOCATION, location)]).into_response(),
                    None => {
                        let info = RequestInfo::from_request(&req);
                        error_handler(&info, &Error::NotFound(req.uri().path().to_string()))
                    }
                }
            }
        });

        self.handle(method, src, handler)
    }

    /// Register middleware around the whole dispatch, including not-found
    /// and method-not-allowed responses. Runs in registration order.
    ///
    /// # Panics
    ///
    /// When called inside a group.
    pub fn wrap(&mut self, middleware: Middleware) {
        assert!(
            self.scope.depth == 0,
            "global middleware cannot be registered inside a route group"
        );
        self.global.push(middleware);
    }

    /// Register a before-hook wrapping every route registered after it in
    /// the current group.
    pub fn before(&mut self, middleware: Middleware) {
        self.scope.before.push(middleware);
    }

    /// Run `f` in a nested scope: before-hooks it adds end with it.
    pub fn group(&mut self, f: impl FnOnce(&mut Router)) {
        self.scoped(None, f);
    }

    /// [`Router::group`] with every pattern inside prefixed by `prefix`.
    /// Inside, the pattern `/` means the prefix itself.
    ///
    /// # Panics
    ///
    /// When `prefix` does not start with `/`.
    pub fn prefix(&mut self, prefix: &str, f: impl FnOnce(&mut Router)) {
        assert!(
            prefix.starts_with('/'),
            "route prefix {prefix:?} must start with '/'"
        );
        self.scoped(Some(prefix), f);
    }

    fn scoped(&mut self, prefix: Option<&str>, f: impl FnOnce(&mut Router)) {
        let saved = self.scope.clone();

        if let Some(prefix) = prefix {
            self.scope.prefix.push_str(prefix);
            if self.scope.prefix != "/" {
                let trimmed = self.scope.prefix.trim_end_matches('/').len();
                self.scope.prefix.truncate(trimmed);
            }
        }
        self.scope.depth += 1;

        f(self);

        self.scope = saved;
    }

    fn compile(&self, pattern: &str) -> Arc<Pattern> {
        assert!(!pattern.is_empty(), "route pattern must not be empty");

        let full = if self.scope.prefix.is_empty() {
            pattern.to_string()
        } else if pattern == "/" {
            self.scope.prefix.clone()
        } else {
            collapse_slashes(&format!("{}{}", self.scope.prefix, pattern))
        };

        match Pattern::parse(&full) {
            Ok(p) => Arc::new(p),
            Err(e) => panic!("invalid route pattern: {e}"),
        }
    }

    /// Reverse lookup of a named route.
    ///
    /// # Panics
    ///
    /// When [`Router::try_path`] fails.
    pub fn path<K: AsRef<str>, V: AsRef<str>>(&self, name: &str, params: &[(K, V)]) -> String {
        lookup(&self.names, name, params).unwrap_or_else(|e| panic!("{e}"))
    }

    /// Reverse lookup of a named route.
    ///
    /// # Errors
    ///
    /// Unknown name, or a missing, unknown or empty parameter.
    pub fn try_path<K: AsRef<str>, V: AsRef<str>>(
        &self,
        name: &str,
        params: &[(K, V)],
    ) -> Result<String, RouteError> {
        lookup(&self.names, name, params)
    }

    /// Freeze the routes into a tower service.
    pub fn into_service(self) -> RouterService {
        let table = Arc::new(RouteTable {
            root: self.root,
            names: self.names,
            error_handler: self.error_handler,
        });

        let dispatch_table = table.clone();
        let dispatch = Handler::new(move |req| {
            let table = dispatch_table.clone();
            async move { table.dispatch(req).await }
        });

        RouterService {
            table,
            handler: handler::apply(dispatch, &self.global),
        }
    }
}

/// Handle to a freshly registered route.
pub struct RouteRef<'a> {
    names: &'a mut HashMap<String, Arc<Pattern>>,
    pattern: Arc<Pattern>,
}

impl RouteRef<'_> {
    /// Name the route for reverse lookup. May be called more than once.
    ///
    /// # Panics
    ///
    /// When the name is already taken.
    pub fn name(self, name: &str) -> Self {
        assert!(
            !self.names.contains_key(name),
            "duplicate route name {name:?}"
        );
        self.names.insert(name.to_string(), self.pattern.clone());
        self
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }
}

/// The compiled, immutable routes. Available to handlers through
/// `RequestExt::routes` for building links.
pub struct RouteTable {
    root: Node,
    names: HashMap<String, Arc<Pattern>>,
    error_handler: ErrorHandler,
}

impl RouteTable {
    /// See [`Router::path`].
    ///
    /// # Panics
    ///
    /// When [`RouteTable::try_path`] fails.
    pub fn path<K: AsRef<str>, V: AsRef<str>>(&self, name: &str, params: &[(K, V)]) -> String {
        lookup(&self.names, name, params).unwrap_or_else(|e| panic!("{e}"))
    }

    /// See [`Router::try_path`].
    ///
    /// # Errors
    ///
    /// Unknown name, or a missing, unknown or empty parameter.
    pub fn try_path<K: AsRef<str>, V: AsRef<str>>(
        &self,
        name: &str,
        params: &[(K, V)],
    ) -> Result<String, RouteError> {
        lookup(&self.names, name, params)
    }

    /// Resolve `method` and `path` against the routes.
    ///
    /// A path match that lacks `method` loses to a match that has it; HEAD
    /// falls back to GET.
    pub fn resolve(&self, method: &Method, path: &str) -> RouteMatch<'_> {
        let segments = split_path(path);
        let serves =
            |e: &Endpoint| e.method == method || (method == Method::HEAD && e.method == Method::GET);

        let found = self
            .root
            .find(&segments, &|endpoints: &[Endpoint]| endpoints.iter().any(|e| serves(e)));
        if let Some(endpoints) = found {
            let endpoint = endpoints
                .iter()
                .find(|e| e.method == method)
                .or_else(|| endpoints.iter().find(|e| serves(e)));

            if let Some(endpoint) = endpoint {
                return RouteMatch::Found {
                    handler: &endpoint.handler,
                    pattern: &endpoint.pattern,
                    params: Params(endpoint.pattern.captures(&segments)),
                };
            }
        }

        match self
            .root
            .find(&segments, &|endpoints: &[Endpoint]| !endpoints.is_empty())
        {
            Some(endpoints) => RouteMatch::MethodNotAllowed {
                allowed: allow_header(endpoints),
            },
            None => RouteMatch::NotFound,
        }
    }

    async fn dispatch(&self, mut req: Request) -> Response {
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        match self.resolve(&method, &path) {
            RouteMatch::Found {
                handler, params, ..
            } => {
                req.extensions_mut().insert(params);
                handler.call(req).await
            }
            RouteMatch::MethodNotAllowed { allowed } if method == Method::OPTIONS => {
                let mut response = StatusCode::NO_CONTENT.into_response();
                if let Ok(value) = HeaderValue::from_str(&allowed) {
                    response.headers_mut().insert(header::ALLOW, value);
                }
                response
            }
            RouteMatch::MethodNotAllowed { allowed } => {
                let info = RequestInfo::from_request(&req);
                (self.error_handler)(&info, &Error::MethodNotAllowed { method, allowed })
            }
            RouteMatch::NotFound => {
                let info = RequestInfo::from_request(&req);
                (self.error_handler)(&info, &Error::NotFound(path))
            }
        }
    }
}

/// Outcome of [`RouteTable::resolve`].
#[derive(Debug)]
pub enum RouteMatch<'a> {
    Found {
        handler: &'a Handler,
        pattern: &'a Pattern,
        params: Params,
    },
    /// The path exists but not for this method; `allowed` is the value of
    /// the `Allow` header.
    MethodNotAllowed { allowed: String },
    NotFound,
}

fn allow_header(endpoints: &[Endpoint]) -> String {
    let mut methods: Vec<&str> = endpoints.iter().map(|e| e.method.as_str()).collect();
    if methods.contains(&"GET") && !methods.contains(&"HEAD") {
        methods.push("HEAD");
    }
    if !methods.contains(&"OPTIONS") {
        methods.push("OPTIONS");
    }
    methods.join(", ")
}

fn lookup<K: AsRef<str>, V: AsRef<str>>(
    names: &HashMap<String, Arc<Pattern>>,
    name: &str,
    params: &[(K, V)],
) -> Result<String, RouteError> {
    let pattern = names
        .get(name)
        .ok_or_else(|| RouteError::UnknownName(name.to_string()))?;
    Ok(pattern.substitute(params)?)
}

fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        if c == '/' && out.ends_with('/') {
            continue;
        }
        out.push(c);
    }
    out
}

/// The router as a tower service. Cheap to clone.
#[derive(Clone)]
pub struct RouterService {
    table: Arc<RouteTable>,
    handler: Handler,
}

impl RouterService {
    pub fn routes(&self) -> &RouteTable {
        &self.table
    }
}

impl Service<Request> for RouterService {
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<Result<Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        req.extensions_mut().insert(self.table.clone());
        let fut = self.handler.call(req);
        Box::pin(async move { Ok(fut.await) })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Mutex;

    use axum::body::Body;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;

    fn text(body: &'static str) -> Handler {
        Handler::new(move |_req| async move { body })
    }

    fn echo_params() -> Handler {
        Handler::new(|req: Request| async move {
            let params = req.extensions().get::<Params>().cloned().unwrap_or_default();
            params
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("&")
        })
    }

    async fn send(router: &RouterService, method: Method, uri: &str) -> (StatusCode, Response) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(req).await.unwrap();
        (response.status(), response)
    }

    async fn body(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_specificity() {
        let mut router = Router::new();
        router.get("/order/static", text("literal"));
        router.get("/order/{foo}", text("param"));
        router.get("/order/{rest...}", text("greedy"));
        let svc = router.into_service();

        let (_, r) = send(&svc, Method::GET, "/order/static").await;
        assert_eq!(body(r).await, "literal");
        let (_, r) = send(&svc, Method::GET, "/order/x").await;
        assert_eq!(body(r).await, "param");
        let (_, r) = send(&svc, Method::GET, "/order/x/y").await;
        assert_eq!(body(r).await, "greedy");
    }

    #[tokio::test]
    async fn test_params_extracted() {
        let mut router = Router::new();
        router.get("/greedy/{first}/rest/{rest...}", echo_params());
        let svc = router.into_service();

        let (status, r) = send(&svc, Method::GET, "/greedy/foo/rest/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body(r).await, "first=foo&rest=");

        let (_, r) = send(&svc, Method::GET, "/greedy/foo/rest/a/b").await;
        assert_eq!(body(r).await, "first=foo&rest=a/b");
    }

    #[tokio::test]
    async fn test_not_found_and_method_not_allowed() {
        let mut router = Router::new();
        router.get("/users/{id}", text("user"));
        router.delete("/users/{id}", text("gone"));
        let svc = router.into_service();

        let (status, _) = send(&svc, Method::GET, "/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, r) = send(&svc, Method::POST, "/users/1").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(r.headers()[header::ALLOW], "GET, DELETE, HEAD, OPTIONS");

        let (status, r) = send(&svc, Method::OPTIONS, "/users/1").await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(r.headers().contains_key(header::ALLOW));
    }

    #[tokio::test]
    async fn test_head_falls_back_to_get() {
        let mut router = Router::new();
        router.get("/", text("home"));
        let svc = router.into_service();

        let (status, _) = send(&svc, Method::HEAD, "/").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_method_preferred_over_specificity() {
        let mut router = Router::new();
        router.post("/order/static", text("literal"));
        router.get("/order/{foo}", text("param"));
        let svc = router.into_service();

        let (_, r) = send(&svc, Method::GET, "/order/static").await;
        assert_eq!(body(r).await, "param");
    }

    #[tokio::test]
    async fn test_global_and_group_middleware_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mw = |label: &'static str| {
            let log = log.clone();
            Middleware::from_fn(move |req, next: Next| {
                let log = log.clone();
                async move {
                    log.lock().unwrap().push(label);
                    next.run(req).await
                }
            })
        };

        let mut router = Router::new();
        router.wrap(mw("global"));
        router.get("/plain", text("plain"));
        router.group(|r| {
            r.before(mw("group"));
            r.prefix("/admin", |r| {
                r.before(mw("admin"));
                r.get("/", text("admin"));
            });
            r.get("/grouped", text("grouped"));
        });
        router.get("/after", text("after"));
        let svc = router.into_service();

        for (uri, expected) in [
            ("/plain", vec!["global"]),
            ("/admin", vec!["global", "group", "admin"]),
            ("/grouped", vec!["global", "group"]),
            ("/after", vec!["global"]),
            ("/missing", vec!["global"]),
        ] {
            log.lock().unwrap().clear();
            send(&svc, Method::GET, uri).await;
            assert_eq!(*log.lock().unwrap(), expected, "{uri}");
        }
    }

    #[test]
    fn test_wrap_inside_group_panics() {
        let result = std::panic::catch_unwind(|| {
            let mut router = Router::new();
            router.group(|r| {
                r.wrap(Middleware::from_fn(|req, next: Next| next.run(req)));
            });
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_named_routes() {
        let mut router = Router::new();
        router
            .get("/named/route/{foo}/3/{bar...}", text(""))
            .name("named");
        router.prefix("/admin/", |r| {
            r.get("/", text("")).name("admin");
            r.get("/users/{id}", text("")).name("admin.user");
        });

        assert_eq!(
            router.path("named", &[("foo", "hello"), ("bar", "world/qux")]),
            "/named/route/hello/3/world/qux"
        );
        assert_eq!(router.path::<&str, &str>("admin", &[]), "/admin");
        assert_eq!(router.path("admin.user", &[("id", "9")]), "/admin/users/9");
        assert_eq!(
            router.try_path::<&str, &str>("missing", &[]),
            Err(RouteError::UnknownName("missing".into()))
        );
        assert!(router.try_path("admin.user", &[("id", "")]).is_err());

        let svc = router.into_service();
        assert_eq!(svc.routes().path("admin.user", &[("id", "1")]), "/admin/users/1");
    }

    #[test]
    fn test_registration_panics() {
        let dup_name = std::panic::catch_unwind(|| {
            let mut router = Router::new();
            router.get("/a", text("")).name("x");
            router.get("/b", text("")).name("x");
        });
        assert!(dup_name.is_err());

        let collision = std::panic::catch_unwind(|| {
            let mut router = Router::new();
            router.get("/a/{id}", text(""));
            router.get("/a/{name}", text(""));
        });
        assert!(collision.is_err());

        let bad = std::panic::catch_unwind(|| {
            let mut router = Router::new();
            router.get("/{rest...}/x", text(""));
        });
        assert!(bad.is_err());
    }

    #[tokio::test]
    async fn test_redirect_substitutes_params() {
        let mut router = Router::new();
        router.redirect(
            Method::GET,
            "/old/{id}",
            "/new/{id}",
            StatusCode::PERMANENT_REDIRECT,
        );
        let svc = router.into_service();

        let (status, r) = send(&svc, Method::GET, "/old/42?x=1").await;
        assert_eq!(status, StatusCode::PERMANENT_REDIRECT);
        assert_eq!(r.headers()[header::LOCATION], "/new/42?x=1");
    }

    #[test]
    fn test_redirect_requires_3xx() {
        let result = std::panic::catch_unwind(|| {
            let mut router = Router::new();
            router.redirect(Method::GET, "/a", "/b", StatusCode::OK);
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_collapse_slashes() {
        assert_eq!(collapse_slashes("/admin//users"), "/admin/users");
        assert_eq!(collapse_slashes("//"), "/");
    }

    #[test]
    fn test_resolve_without_dispatch() {
        let mut router = Router::new();
        router.get("/order/static", text("static"));
        router.get("/order/{foo}", text("param"));
        router.post("/order/{foo}/items", text("items"));
        let svc = router.into_service();
        let routes = svc.routes();

        match routes.resolve(&Method::GET, "/order/static") {
            RouteMatch::Found { pattern, params, .. } => {
                assert_eq!(pattern.as_str(), "/order/static");
                assert!(params.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
        match routes.resolve(&Method::HEAD, "/order/7") {
            RouteMatch::Found { params, .. } => assert_eq!(params.get("foo"), Some("7")),
            other => panic!("unexpected {other:?}"),
        }
        match routes.resolve(&Method::GET, "/order/7/items") {
            RouteMatch::MethodNotAllowed { allowed } => assert_eq!(allowed, "POST, OPTIONS"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            routes.resolve(&Method::GET, "/missing"),
            RouteMatch::NotFound
        ));
    }
}
