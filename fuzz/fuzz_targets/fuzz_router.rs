//! Fuzz pattern compilation, reverse lookup and path resolution.
//!
//! ```bash
//! cargo +nightly fuzz run fuzz_router
//! cargo +nightly fuzz run fuzz_router -- -max_total_time=60
//! ```
//!
//! Any pattern `Pattern::parse` accepts must register without panicking, and
//! resolving or substituting arbitrary input must never panic.

#![no_main]

use arbitrary::Arbitrary;
use axum::http::Method;
use libfuzzer_sys::fuzz_target;
use webcore::router::{Handler, Pattern, Router};

#[derive(Arbitrary, Debug)]
struct Input {
    pattern: String,
    path: String,
    values: Vec<String>,
}

fuzz_target!(|input: Input| {
    let Ok(pattern) = Pattern::parse(&input.pattern) else {
        return;
    };

    let pairs: Vec<(&str, &str)> = pattern
        .param_names()
        .zip(input.values.iter().map(String::as_str))
        .collect();
    if let Ok(path) = pattern.substitute(&pairs) {
        assert!(path.starts_with('/'));
    }

    let mut router = Router::new();
    router.get(pattern.as_str(), Handler::new(|_req| async { "" }));
    let svc = router.into_service();

    let _ = svc.routes().resolve(&Method::GET, &input.path);
    let _ = svc.routes().resolve(&Method::POST, &input.path);
});
