//! Process-lifetime, per-domain session registry.
//!
//! One [`SessionState`] is created the first time a domain is seen and lives
//! for the lifetime of the process. Its lock serializes every fetch for that
//! domain — a deliberate trade of per-domain throughput for simple, race-free
//! cookie and header bookkeeping. Distinct domains proceed fully in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::cookies::CookieState;

/// Learned state for a single domain: the cookie jar the dispatcher has
/// accumulated, whether a browser run has ever completed for it, and (once
/// it has) the request headers a live browser sent that plain HTTP should
/// keep replaying.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub cookies: Vec<CookieState>,
    pub initialized: bool,
    pub request_headers: Option<HashMap<String, String>>,
}

/// Domain-keyed map of [`SessionState`]s, each behind its own lock so that
/// fetches for different domains never block one another.
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Arc<Mutex<SessionState>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the shared, lockable state for `domain`, creating it empty if
    /// this is the first time the domain has been seen.
    pub async fn get_state(&self, domain: &str) -> Arc<Mutex<SessionState>> {
        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SessionState::default())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_state_returns_same_instance_for_same_domain() {
        let store = SessionStore::new();
        let a = store.get_state("example.com").await;
        let b = store.get_state("example.com").await;
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn get_state_creates_distinct_instances_per_domain() {
        let store = SessionStore::new();
        let a = store.get_state("example.com").await;
        let b = store.get_state("other.com").await;
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn new_state_is_uninitialized_with_no_headers() {
        let store = SessionStore::new();
        let state = store.get_state("example.com").await;
        let guard = state.lock().await;
        assert!(!guard.initialized);
        assert!(guard.request_headers.is_none());
        assert!(guard.cookies.is_empty());
    }
}
