//! Double-submit CSRF tokens.
//!
//! Each request carries a [`CsrfToken`] holding the raw secret from the
//! client's CSRF cookie (or a freshly generated one). The secret is only ever
//! handed out masked: XOR-ed with a one-time pad that is prepended to the
//! result, so every masked token looks different but unmasks to the same
//! secret.

use std::sync::{Arc, Mutex, PoisonError};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use subtle::ConstantTimeEq;

use crate::error::{CoreResult, Error};

/// Length of the raw secret in bytes. Masked tokens are twice as long.
pub const TOKEN_LEN: usize = 32;

/// Cookie name when cookies are marked `Secure`.
pub const COOKIE_NAME: &str = "__Host-csrf";
/// Cookie name for plain-HTTP development.
pub const COOKIE_NAME_INSECURE: &str = "csrf";
/// Header checked first for a submitted token.
pub const HEADER_NAME: &str = "x-csrf-token";
/// Form field (and, for multipart bodies, query parameter) holding a token.
pub const FIELD_NAME: &str = "_csrf";

#[derive(Debug)]
struct TokenState {
    secret: [u8; TOKEN_LEN],
    is_new: bool,
}

/// Request-scoped CSRF state.
///
/// Cloning shares the state, so a handler renewing the token is seen by the
/// middleware when it issues the cookie.
#[derive(Debug, Clone)]
pub struct CsrfToken {
    inner: Arc<Mutex<TokenState>>,
}

impl CsrfToken {
    /// Install the secret carried by a masked cookie token, or generate a new
    /// one when the client sent none.
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedCookie` when the masked value is not exactly
    /// twice [`TOKEN_LEN`] bytes.
    pub fn set_token(masked: Option<&[u8]>) -> CoreResult<Self> {
        let Some(masked) = masked else {
            return Ok(Self::generate());
        };

        if masked.len() != TOKEN_LEN * 2 {
            return Err(Error::MalformedCookie {
                name: "csrf",
                reason: format!(
                    "masked token must be {} bytes in length; got {}",
                    TOKEN_LEN * 2,
                    masked.len()
                ),
            });
        }

        let (pad, data) = masked.split_at(TOKEN_LEN);
        let mut secret = [0u8; TOKEN_LEN];
        for ((out, p), d) in secret.iter_mut().zip(pad).zip(data) {
            *out = p ^ d;
        }

        Ok(Self::with_secret(secret, false))
    }

    /// A token with a fresh secret, flagged as new.
    pub fn generate() -> Self {
        Self::with_secret(rand::random(), true)
    }

    fn with_secret(secret: [u8; TOKEN_LEN], is_new: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TokenState { secret, is_new })),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, TokenState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The secret masked with a fresh one-time pad.
    pub fn masked(&self) -> Vec<u8> {
        let pad: [u8; TOKEN_LEN] = rand::random();
        let secret = self.state().secret;

        let mut masked = Vec::with_capacity(TOKEN_LEN * 2);
        masked.extend_from_slice(&pad);
        masked.extend(secret.iter().zip(&pad).map(|(s, p)| s ^ p));
        masked
    }

    /// [`CsrfToken::masked`], base64 URL-safe without padding. This is the
    /// form to embed in pages and send back in the header or form field.
    pub fn masked_encoded(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.masked())
    }

    /// Check a submitted masked token against the secret in constant time.
    ///
    /// # Errors
    ///
    /// `Error::EmptyCsrfToken` for an empty submission, `Error::InvalidCsrfToken`
    /// for anything that does not unmask to the secret.
    pub fn verify(&self, submitted: &[u8]) -> CoreResult<()> {
        if submitted.is_empty() {
            return Err(Error::EmptyCsrfToken);
        }
        let candidate = unmask(submitted).ok_or(Error::InvalidCsrfToken)?;
        let secret = self.state().secret;

        if bool::from(secret.as_slice().ct_eq(candidate.as_slice())) {
            Ok(())
        } else {
            Err(Error::InvalidCsrfToken)
        }
    }

    /// [`CsrfToken::verify`] for a base64 URL-safe submission.
    pub fn verify_encoded(&self, submitted: &str) -> CoreResult<()> {
        if submitted.is_empty() {
            return Err(Error::EmptyCsrfToken);
        }
        let decoded = URL_SAFE_NO_PAD
            .decode(submitted)
            .map_err(|_| Error::InvalidCsrfToken)?;
        self.verify(&decoded)
    }

    /// Replace the secret and flag it as new so the response carries a new
    /// cookie.
    pub fn renew(&self) {
        let mut state = self.state();
        state.secret = rand::random();
        state.is_new = true;
    }

    /// Whether the secret was generated or renewed during this request.
    pub fn is_new(&self) -> bool {
        self.state().is_new
    }
}

fn unmask(masked: &[u8]) -> Option<Vec<u8>> {
    if masked.len() % 2 != 0 {
        return None;
    }
    let (pad, data) = masked.split_at(masked.len() / 2);
    Some(pad.iter().zip(data).map(|(p, d)| p ^ d).collect())
}
