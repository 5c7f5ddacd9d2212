//! Thread-safe map of live sessions.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use super::session::Session;
use super::types::{RegistryError, SessionId, SessionSummary};
use crate::auth::Identity;
use crate::shell::TargetRef;

/// Registry of live sessions, keyed by id.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<SessionId, Arc<Session>>>>,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            max_sessions,
        }
    }

    /// Register a new session in `Connecting` state under a fresh id.
    #[allow(clippy::significant_drop_tightening)]
    pub async fn create(
        &self,
        target: TargetRef,
        identity: Identity,
    ) -> Result<Arc<Session>, RegistryError> {
        let mut sessions = self.sessions.write().await;
        if sessions.len() >= self.max_sessions {
            return Err(RegistryError::Full {
                limit: self.max_sessions,
            });
        }

        let session = loop {
            if let Entry::Vacant(slot) = sessions.entry(SessionId::new_v4()) {
                let session = Arc::new(Session::new(*slot.key(), target, identity));
                slot.insert(Arc::clone(&session));
                break session;
            }
        };
        drop(sessions);

        info!(
            session_id = %session.id(),
            target = %session.target(),
            user = %session.identity().username,
            "Session registered"
        );
        Ok(session)
    }

    pub async fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// Remove a session. Removing an unknown id is a no-op.
    pub async fn remove(&self, id: SessionId) -> Option<Arc<Session>> {
        let removed = self.sessions.write().await.remove(&id);
        if removed.is_some() {
            info!(session_id = %id, "Session removed");
        }
        removed
    }

    /// Call `f` for every session present when the call started.
    ///
    /// The lock is released before `f` runs, so `f` may use the registry.
    pub async fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<Session>),
    {
        for session in self.sessions_snapshot().await {
            f(&session);
        }
    }

    pub async fn snapshot(&self) -> Vec<SessionSummary> {
        self.sessions_snapshot()
            .await
            .iter()
            .map(|s| s.summary())
            .collect()
    }

    async fn sessions_snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Force a session into teardown. Returns `false` for unknown ids.
    pub async fn terminate(&self, id: SessionId, reason: &str) -> bool {
        match self.get(id).await {
            Some(session) => {
                info!(session_id = %id, reason, "Terminating session");
                session.terminate(reason);
                true
            }
            None => {
                warn!(session_id = %id, "Tried to terminate unknown session");
                false
            }
        }
    }

    /// Terminate every live session, e.g. on shutdown.
    pub async fn terminate_all(&self, reason: &str) -> usize {
        let mut count = 0;
        self.for_each(|session| {
            session.terminate(reason);
            count += 1;
        })
        .await;
        count
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(fedshell_core::config::ServerConfig::default().max_sessions)
    }
}
