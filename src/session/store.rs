//! Session persistence.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use super::Data;

/// What a repository persists for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub data: Data,
    /// Manager key the session was stamped with.
    pub key: String,
}

#[derive(Error, Debug)]
pub enum StoreError {
    /// No session with the requested id. The manager starts a new session.
    #[error("session not found")]
    NotFound,

    #[error("session backend: {0}")]
    Backend(String),
}

/// Storage backend for sessions.
///
/// Implementations must be safe to share across requests.
pub trait SessionRepository: Send + Sync + 'static {
    /// Load a session by id; `StoreError::NotFound` when there is none.
    fn find(&self, id: &str) -> impl Future<Output = Result<SessionRecord, StoreError>> + Send;

    /// Insert or replace a session.
    fn save(&self, record: SessionRecord) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Delete a session. Deleting a missing session is not an error.
    fn destroy(&self, id: &str) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// In-process repository for development and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    sessions: Arc<RwLock<HashMap<String, SessionRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.sessions.read().await.contains_key(id)
    }
}

impl SessionRepository for MemoryStore {
    async fn find(&self, id: &str) -> Result<SessionRecord, StoreError> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn save(&self, record: SessionRecord) -> Result<(), StoreError> {
        self.sessions
            .write()
            .await
            .insert(record.id.clone(), record);
        Ok(())
    }

    async fn destroy(&self, id: &str) -> Result<(), StoreError> {
        self.sessions.write().await.remove(id);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn record(id: &str) -> SessionRecord {
        SessionRecord {
            id: id.to_string(),
            data: Data::new(),
            key: "k".to_string(),
        }
    }

    #[tokio::test]
    async fn test_memory_store_lifecycle() {
        let store = MemoryStore::new();
        assert!(matches!(store.find("a").await, Err(StoreError::NotFound)));

        store.save(record("a")).await.unwrap();
        assert_eq!(store.find("a").await.unwrap(), record("a"));
        assert_eq!(store.len().await, 1);

        store.destroy("a").await.unwrap();
        assert!(store.is_empty().await);

        // Destroying twice is fine.
        store.destroy("a").await.unwrap();
    }
}
