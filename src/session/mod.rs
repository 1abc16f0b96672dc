//! Request-scoped sessions.
//!
//! A [`Session`] is loaded by [`SessionManager::load`] when a request enters
//! the session layer, mutated by handlers through the request extensions, and
//! written back by [`SessionManager::commit`] once the response leaves the
//! handler chain.
//!
//! # Status
//!
//! Every session tracks a [`Status`] that only moves forward:
//!
//! ```text
//! Unchanged → Accessed → Modified → Destroyed
//! ```
//!
//! Reads advance it to `Accessed`, writes to `Modified`. Once `Destroyed`,
//! nothing changes it back and the commit deletes the session.

mod manager;
mod store;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub use manager::{Committed, SessionManager};
pub use store::{MemoryStore, SessionRecord, SessionRepository, StoreError};

/// Cookie name when cookies are marked `Secure`.
pub const COOKIE_NAME: &str = "__Host-session";
/// Cookie name for plain-HTTP development.
pub const COOKIE_NAME_INSECURE: &str = "session";

/// Session key/value data.
pub type Data = serde_json::Map<String, Value>;

/// Lifecycle status of a session within one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Unchanged,
    Accessed,
    Modified,
    Destroyed,
}

#[derive(Debug)]
pub(crate) struct SessionState {
    pub(crate) id: String,
    pub(crate) original_id: Option<String>,
    pub(crate) data: Data,
    pub(crate) status: Status,
    /// Manager key stamped when the session was first created.
    pub(crate) key: String,
}

impl SessionState {
    fn advance(&mut self, status: Status) {
        if status > self.status {
            self.status = status;
        }
    }

    pub(crate) fn destroy(&mut self) {
        // A renewed id was never persisted; destroy the one the client holds.
        if let Some(original) = self.original_id.take() {
            self.id = original;
        }
        self.status = Status::Destroyed;
    }
}

/// Handle to the session of the current request.
///
/// Cloning shares the same state, so the copy a handler mutates is the one
/// the session layer commits.
#[derive(Debug, Clone)]
pub struct Session {
    state: Arc<Mutex<SessionState>>,
}

impl Session {
    pub(crate) fn new(id: String, data: Data, key: String) -> Self {
        Self {
            state: Arc::new(Mutex::new(SessionState {
                id,
                original_id: None,
                data,
                status: Status::Unchanged,
                key,
            })),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> String {
        self.lock().id.clone()
    }

    pub fn status(&self) -> Status {
        self.lock().status
    }

    /// Fetch a value; advances the status to `Accessed`.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut state = self.lock();
        state.advance(Status::Accessed);
        state.data.get(key).cloned()
    }

    /// Store a value; advances the status to `Modified`.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        let mut state = self.lock();
        state.data.insert(key.into(), value.into());
        state.advance(Status::Modified);
    }

    /// Store any serializable value.
    ///
    /// # Errors
    ///
    /// Returns the serializer error; the session is left untouched.
    pub fn set_as<T: Serialize>(
        &self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(value)?;
        self.set(key, value);
        Ok(())
    }

    /// Store a timestamp as RFC 3339 with nanosecond precision.
    pub fn set_time(&self, key: impl Into<String>, value: DateTime<Utc>) {
        self.set(key, value.to_rfc3339_opts(SecondsFormat::Nanos, true));
    }

    /// Remove a value; advances the status to `Modified`.
    pub fn delete(&self, key: &str) {
        let mut state = self.lock();
        state.data.remove(key);
        state.advance(Status::Modified);
    }

    /// Drop all values; advances the status to `Modified`.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.data.clear();
        state.advance(Status::Modified);
    }

    pub fn has(&self, key: &str) -> bool {
        self.lock().data.contains_key(key)
    }

    /// Replace the session id, remembering the first id so the commit can
    /// invalidate it. Use after privilege changes such as signing in.
    ///
    /// Renewing a destroyed session does nothing.
    pub fn renew(&self) {
        let mut state = self.lock();
        if state.status == Status::Destroyed {
            return;
        }
        if state.original_id.is_none() {
            state.original_id = Some(state.id.clone());
        }
        state.id = new_id();
        state.advance(Status::Modified);
    }

    /// Mark the session for deletion at commit.
    pub fn destroy(&self) {
        self.lock().destroy();
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key)?.as_bool()
    }

    /// Integers, including floats with no fractional part.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        let value = self.get(key)?;
        value.as_i64().or_else(|| {
            value
                .as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
                .map(|f| f as i64)
        })
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key)?.as_f64()
    }

    /// String lists. Non-string elements come back empty.
    pub fn get_strings(&self, key: &str) -> Option<Vec<String>> {
        match self.get(key)? {
            Value::Array(items) => Some(
                items
                    .into_iter()
                    .map(|item| match item {
                        Value::String(s) => s,
                        _ => String::new(),
                    })
                    .collect(),
            ),
            _ => None,
        }
    }

    /// Timestamps stored with [`Session::set_time`].
    pub fn get_time(&self, key: &str) -> Option<DateTime<Utc>> {
        let raw = self.get_string(key)?;
        DateTime::parse_from_rfc3339(&raw)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Deserialize a value into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        serde_json::from_value(self.get(key)?).ok()
    }

    pub fn pop_string(&self, key: &str) -> Option<String> {
        self.pop(key, Self::get_string)
    }

    pub fn pop_bool(&self, key: &str) -> Option<bool> {
        self.pop(key, Self::get_bool)
    }

    pub fn pop_i64(&self, key: &str) -> Option<i64> {
        self.pop(key, Self::get_i64)
    }

    pub fn pop_f64(&self, key: &str) -> Option<f64> {
        self.pop(key, Self::get_f64)
    }

    pub fn pop_strings(&self, key: &str) -> Option<Vec<String>> {
        self.pop(key, Self::get_strings)
    }

    pub fn pop_time(&self, key: &str) -> Option<DateTime<Utc>> {
        self.pop(key, Self::get_time)
    }

    pub fn pop_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.pop(key, Self::get_as)
    }

    fn pop<T>(&self, key: &str, get: impl FnOnce(&Self, &str) -> Option<T>) -> Option<T> {
        let value = get(self, key);
        self.delete(key);
        value
    }
}

/// A new random session id: 32 bytes, base64 URL-safe without padding.
pub fn new_id() -> String {
    let bytes: [u8; 32] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}
