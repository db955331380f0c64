use crate::session::UploadSession;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// The in-progress uploads of this process, by upload ID.
///
/// Owned by the cache.  Starts empty (startup recovery discards whatever the last process left
/// behind) and shrinks as uploads complete or are aborted.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    sessions: Mutex<HashMap<String, Arc<UploadSession>>>,
}

impl Registry {
    fn sessions(&self) -> MutexGuard<'_, HashMap<String, Arc<UploadSession>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, id: &str) -> Option<Arc<UploadSession>> {
        self.sessions().get(id).cloned()
    }

    /// Register `session`, unless a session with the same ID got there first.
    ///
    /// Returns whichever session is registered afterwards.
    pub fn get_or_insert(&self, session: Arc<UploadSession>) -> Arc<UploadSession> {
        self.sessions()
            .entry(session.id().to_string())
            .or_insert(session)
            .clone()
    }

    /// Remove `session`, if it's still the one registered under its ID
    pub fn remove(&self, session: &Arc<UploadSession>) {
        let mut sessions = self.sessions();
        if let Some(registered) = sessions.get(session.id()) {
            if Arc::ptr_eq(registered, session) {
                sessions.remove(session.id());
            }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions().contains_key(id)
    }

    pub fn snapshot(&self) -> Vec<Arc<UploadSession>> {
        self.sessions().values().cloned().collect()
    }
}
