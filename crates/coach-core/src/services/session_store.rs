//! Fast-path interview session storage
//!
//! [`SessionCache`] is the seam for the in-memory `session_id -> InterviewSession`
//! table. A single process uses [`InMemorySessionCache`]; a multi-instance
//! deployment plugs in a shared cache without the orchestrator noticing.
//!
//! [`SessionLocks`] gives one operation at a time per session id.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::models::InterviewSession;

/// Key-value store for live sessions
#[async_trait]
pub trait SessionCache: Send + Sync {
    async fn put(&self, session: InterviewSession) -> Result<()>;

    async fn get(&self, session_id: &str) -> Result<Option<InterviewSession>>;

    /// Returns whether an entry was removed
    async fn delete(&self, session_id: &str) -> Result<bool>;

    /// Remove sessions idle for longer than `max_idle`; returns the removed ids
    async fn purge_inactive(&self, max_idle: Duration) -> Result<Vec<String>>;

    async fn count(&self) -> Result<usize>;
}

/// Process-local session table
#[derive(Default)]
pub struct InMemorySessionCache {
    sessions: RwLock<HashMap<String, InterviewSession>>,
}

impl InMemorySessionCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionCache for InMemorySessionCache {
    async fn put(&self, session: InterviewSession) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.session_id.clone(), session);
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<InterviewSession>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(session_id).cloned())
    }

    async fn delete(&self, session_id: &str) -> Result<bool> {
        let mut sessions = self.sessions.write().await;
        let removed = sessions.remove(session_id).is_some();
        if removed {
            log::debug!("[session-store] Removed session {}", session_id);
        }
        Ok(removed)
    }

    async fn purge_inactive(&self, max_idle: Duration) -> Result<Vec<String>> {
        let max_idle = chrono::Duration::from_std(max_idle)
            .map_err(|e| Error::validation(format!("invalid idle threshold: {}", e)))?;
        let cutoff = Utc::now() - max_idle;

        let mut sessions = self.sessions.write().await;
        let stale: Vec<String> = sessions
            .values()
            .filter(|s| s.last_activity_at < cutoff)
            .map(|s| s.session_id.clone())
            .collect();
        for id in &stale {
            sessions.remove(id);
        }

        if !stale.is_empty() {
            log::info!("[session-store] Purged {} inactive sessions", stale.len());
        }
        Ok(stale)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.sessions.read().await.len())
    }
}

// ============================================================================
// Per-session mutual exclusion
// ============================================================================

/// Non-blocking per-session lock set
#[derive(Clone, Default)]
pub struct SessionLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `session_id`, or `AlreadyInProgress` if another
    /// operation on the same session is running
    pub fn try_lock(&self, session_id: &str) -> Result<SessionGuard> {
        let mut held = match self.held.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !held.insert(session_id.to_string()) {
            return Err(Error::AlreadyInProgress(format!(
                "another operation is running on session {}",
                session_id
            )));
        }
        Ok(SessionGuard {
            held: Arc::clone(&self.held),
            session_id: session_id.to_string(),
        })
    }

    pub fn is_locked(&self, session_id: &str) -> bool {
        match self.held.lock() {
            Ok(held) => held.contains(session_id),
            Err(poisoned) => poisoned.into_inner().contains(session_id),
        }
    }
}

/// Released on drop
pub struct SessionGuard {
    held: Arc<Mutex<HashSet<String>>>,
    session_id: String,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let mut held = match self.held.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        held.remove(&self.session_id);
    }
}
