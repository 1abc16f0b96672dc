use std::sync::{PoisonError, RwLock};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use tracing::{debug, warn};

use super::store::{SessionRecord, SessionRepository, StoreError};
use super::{Data, Session, Status, new_id};

/// Result of committing a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed {
    /// The id the client should hold from now on.
    pub id: String,
    pub status: Status,
}

/// Loads and commits sessions against a repository.
///
/// The manager holds a random key stamped into every session it creates.
/// [`SessionManager::renew_key`] rotates it; from then on every session
/// stamped with an older key is destroyed at commit, signing everyone out.
#[derive(Debug)]
pub struct SessionManager<R> {
    repo: R,
    key: RwLock<String>,
}

impl<R: SessionRepository> SessionManager<R> {
    pub fn new(repo: R) -> Self {
        Self {
            repo,
            key: RwLock::new(new_key()),
        }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    fn current_key(&self) -> String {
        self.key
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the manager key, invalidating every existing session.
    pub fn renew_key(&self) {
        *self.key.write().unwrap_or_else(PoisonError::into_inner) = new_key();
        debug!("Session manager key rotated");
    }

    /// Load the session with `id`, or start a new one when the client sent no
    /// id or the repository does not know it.
    ///
    /// # Errors
    ///
    /// Repository failures other than "not found" are returned.
    pub async fn load(&self, id: Option<&str>) -> Result<Session, StoreError> {
        let found = match id.filter(|id| !id.is_empty()) {
            Some(id) => match self.repo.find(id).await {
                Ok(record) => Some(record),
                Err(StoreError::NotFound) => None,
                Err(e) => return Err(e),
            },
            None => None,
        };

        Ok(match found {
            Some(record) => Session::new(record.id, record.data, record.key),
            None => Session::new(new_id(), Data::new(), self.current_key()),
        })
    }

    /// Persist the outcome of a request.
    ///
    /// A renewed session first destroys its previous id. Destroyed sessions
    /// are deleted; every other status saves the session.
    ///
    /// # Errors
    ///
    /// Returns the first repository failure.
    pub async fn commit(&self, session: &Session) -> Result<Committed, StoreError> {
        let current_key = self.current_key();

        let (original_id, record, status) = {
            let mut state = session.lock();
            if state.key != current_key {
                state.destroy();
            }

            let record = SessionRecord {
                id: state.id.clone(),
                data: state.data.clone(),
                key: state.key.clone(),
            };
            (state.original_id.take(), record, state.status)
        };

        if let Some(original_id) = original_id
            && let Err(e) = self.repo.destroy(&original_id).await
        {
            warn!(error = %e, "Failed to destroy renewed session id");
            return Err(e);
        }

        let id = record.id.clone();
        match status {
            Status::Unchanged | Status::Accessed | Status::Modified => {
                self.repo.save(record).await?;
            }
            Status::Destroyed => {
                self.repo.destroy(&id).await?;
            }
        }

        Ok(Committed { id, status })
    }
}

fn new_key() -> String {
    let bytes: [u8; 8] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}
