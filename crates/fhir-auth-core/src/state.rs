use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use thiserror::Error;

/// Session key holding the CSRF state of the pending authorization.
pub const STATE_KEY: &str = "fhir_oauth_state";
/// Session key holding the PKCE verifier of the pending authorization.
pub const VERIFIER_KEY: &str = "fhir_code_verifier";

#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("session store unavailable: {0}")]
    Unavailable(String),
    #[error("session store rejected key `{key}`: {reason}")]
    Rejected { key: String, reason: String },
}

/// Short-lived key/value storage for per-attempt OAuth material.
///
/// Browser hosts back this with session storage; servers and CLIs can use
/// [`InMemorySessionStore`] or an encrypted session record.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, SessionStoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), SessionStoreError>;
    fn remove(&self, key: &str) -> Result<(), SessionStoreError>;
}

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    inner: RwLock<HashMap<String, String>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, key: &str) -> Result<Option<String>, SessionStoreError> {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SessionStoreError> {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        guard.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SessionStoreError> {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        guard.remove(key);
        Ok(())
    }
}

/// State + verifier generated together for one authorization attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAuthorization {
    pub state: String,
    pub code_verifier: String,
}

impl PendingAuthorization {
    pub fn new(state: impl Into<String>, code_verifier: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            code_verifier: code_verifier.into(),
        }
    }

    pub fn persist(&self, store: &dyn SessionStore) -> Result<(), SessionStoreError> {
        store.set(STATE_KEY, &self.state)?;
        store.set(VERIFIER_KEY, &self.code_verifier)
    }

    /// Reads back whatever was persisted; either half may be missing.
    pub fn load(
        store: &dyn SessionStore,
    ) -> Result<(Option<String>, Option<String>), SessionStoreError> {
        Ok((store.get(STATE_KEY)?, store.get(VERIFIER_KEY)?))
    }

    pub fn clear(store: &dyn SessionStore) -> Result<(), SessionStoreError> {
        store.remove(STATE_KEY)?;
        store.remove(VERIFIER_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persist_load_and_clear() {
        let store = InMemorySessionStore::new();
        let pending = PendingAuthorization::new("state-1", "verifier-1");
        pending.persist(&store).expect("persist");

        let (state, verifier) = PendingAuthorization::load(&store).expect("load");
        assert_eq!(state.as_deref(), Some("state-1"));
        assert_eq!(verifier.as_deref(), Some("verifier-1"));

        PendingAuthorization::clear(&store).expect("clear");
        assert!(store.is_empty());
    }

    #[test]
    fn clearing_twice_is_fine() {
        let store = InMemorySessionStore::new();
        PendingAuthorization::clear(&store).expect("first clear");
        PendingAuthorization::clear(&store).expect("second clear");
        assert_eq!(
            PendingAuthorization::load(&store).expect("load"),
            (None, None)
        );
    }

    #[test]
    fn new_attempt_overwrites_previous() {
        let store = InMemorySessionStore::new();
        PendingAuthorization::new("a", "va").persist(&store).unwrap();
        PendingAuthorization::new("b", "vb").persist(&store).unwrap();
        assert_eq!(store.get(STATE_KEY).unwrap().as_deref(), Some("b"));
        assert_eq!(store.len(), 2);
    }
}
