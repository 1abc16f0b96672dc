//! Cookie helpers shared by the session and CSRF layers.

use axum::http::{HeaderMap, HeaderValue, header};
use tracing::warn;

/// Value of the first cookie called `name` in the request headers.
pub(crate) fn read_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim_matches('"'))
}

/// Attributes shared by every cookie the pipeline issues.
fn attributes(insecure: bool) -> &'static str {
    if insecure {
        "Path=/; HttpOnly; SameSite=Lax"
    } else {
        "Path=/; HttpOnly; SameSite=Lax; Secure"
    }
}

/// Append a `Set-Cookie` header for a session-lifetime cookie.
pub(crate) fn set_cookie(headers: &mut HeaderMap, name: &str, value: &str, insecure: bool) {
    append(headers, format!("{name}={value}; {}", attributes(insecure)));
}

/// Append a `Set-Cookie` header deleting the cookie.
pub(crate) fn expire_cookie(headers: &mut HeaderMap, name: &str, insecure: bool) {
    append(
        headers,
        format!(
            "{name}=; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT; {}",
            attributes(insecure)
        ),
    );
}

fn append(headers: &mut HeaderMap, cookie: String) {
    match HeaderValue::from_str(&cookie) {
        Ok(value) => {
            headers.append(header::SET_COOKIE, value);
        }
        Err(e) => warn!(error = %e, "Dropping cookie with invalid header characters"),
    }
}

/// Add `Cookie` to the `Vary` header unless it is already listed.
pub(crate) fn vary_cookie(headers: &mut HeaderMap) {
    let listed = headers
        .get_all(header::VARY)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|v| v.trim().eq_ignore_ascii_case("cookie"));

    if !listed {
        headers.append(header::VARY, HeaderValue::from_static("Cookie"));
    }
}
