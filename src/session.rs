// Session management
// In-memory sessions keyed by id, touched per request and expired by the background processor

use crate::error::LifecycleError;
use crate::listener::HttpSessionListener;
use crate::wrapper::now_millis;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A user session
pub struct Session {
    id: String,
    creation_time: u64,
    last_accessed: AtomicU64,
    /// Seconds of inactivity before expiry; non-positive means never
    max_inactive_secs: AtomicI64,
    attributes: RwLock<HashMap<String, serde_json::Value>>,
    valid: AtomicBool,
}

impl Session {
    fn new(id: String, max_inactive_secs: i64) -> Self {
        let now = now_millis();
        Self {
            id,
            creation_time: now,
            last_accessed: AtomicU64::new(now),
            max_inactive_secs: AtomicI64::new(max_inactive_secs),
            attributes: RwLock::new(HashMap::new()),
            valid: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn creation_time(&self) -> u64 {
        self.creation_time
    }

    pub fn last_accessed(&self) -> u64 {
        self.last_accessed.load(Ordering::Relaxed)
    }

    pub fn access(&self) {
        self.last_accessed.store(now_millis(), Ordering::Relaxed);
    }

    pub fn max_inactive_secs(&self) -> i64 {
        self.max_inactive_secs.load(Ordering::Relaxed)
    }

    pub fn set_max_inactive_secs(&self, secs: i64) {
        self.max_inactive_secs.store(secs, Ordering::Relaxed);
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub fn attribute(&self, name: &str) -> Option<serde_json::Value> {
        self.attributes.read().get(name).cloned()
    }

    pub fn set_attribute(&self, name: impl Into<String>, value: serde_json::Value) {
        self.attributes.write().insert(name.into(), value);
    }

    pub fn remove_attribute(&self, name: &str) -> Option<serde_json::Value> {
        self.attributes.write().remove(name)
    }

    fn is_expired(&self, now: u64) -> bool {
        let max = self.max_inactive_secs();
        if max <= 0 {
            return false;
        }
        now.saturating_sub(self.last_accessed()) >= (max as u64) * 1000
    }
}

/// Session store attached to a context
pub trait SessionManager: Send + Sync {
    fn start(&self) -> Result<(), LifecycleError>;

    /// Invalidate every session, notifying `listeners`
    fn stop(&self, listeners: &[Arc<dyn HttpSessionListener>]);

    fn find_session(&self, id: &str) -> Option<Arc<Session>>;

    fn create_session(&self, listeners: &[Arc<dyn HttpSessionListener>]) -> Arc<Session>;

    fn invalidate(&self, id: &str, listeners: &[Arc<dyn HttpSessionListener>]);

    /// Expire idle sessions; returns how many were removed
    fn process_expires(&self, listeners: &[Arc<dyn HttpSessionListener>]) -> usize;

    fn active_sessions(&self) -> usize;

    fn set_max_inactive_secs(&self, secs: i64);
}

/// Default in-memory manager
pub struct StandardManager {
    sessions: DashMap<String, Arc<Session>>,
    max_inactive_secs: AtomicI64,
    started: AtomicBool,
    expired_total: AtomicU64,
}

impl Default for StandardManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StandardManager {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            max_inactive_secs: AtomicI64::new(30 * 60),
            started: AtomicBool::new(false),
            expired_total: AtomicU64::new(0),
        }
    }

    pub fn expired_total(&self) -> u64 {
        self.expired_total.load(Ordering::Relaxed)
    }

    fn expire(&self, session: &Session, listeners: &[Arc<dyn HttpSessionListener>]) {
        if !session.valid.swap(false, Ordering::AcqRel) {
            return;
        }
        for listener in listeners {
            if let Err(e) = listener.session_destroyed(session) {
                warn!(session = %session.id, error = %e, "Session listener failed on destroy");
            }
        }
        session.attributes.write().clear();
    }
}

impl SessionManager for StandardManager {
    fn start(&self) -> Result<(), LifecycleError> {
        self.started.store(true, Ordering::Release);
        debug!("Session manager started");
        Ok(())
    }

    fn stop(&self, listeners: &[Arc<dyn HttpSessionListener>]) {
        if !self.started.swap(false, Ordering::AcqRel) {
            return;
        }
        let sessions: Vec<Arc<Session>> = self.sessions.iter().map(|e| e.value().clone()).collect();
        self.sessions.clear();
        for session in &sessions {
            self.expire(session, listeners);
        }
        info!(sessions = sessions.len(), "Session manager stopped");
    }

    fn find_session(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions
            .get(id)
            .map(|s| s.value().clone())
            .filter(|s| s.is_valid())
    }

    fn create_session(&self, listeners: &[Arc<dyn HttpSessionListener>]) -> Arc<Session> {
        let id = uuid::Uuid::new_v4().simple().to_string().to_uppercase();
        let session = Arc::new(Session::new(id.clone(), self.max_inactive_secs.load(Ordering::Relaxed)));
        self.sessions.insert(id, session.clone());
        for listener in listeners {
            if let Err(e) = listener.session_created(&session) {
                warn!(session = %session.id, error = %e, "Session listener failed on create");
            }
        }
        session
    }

    fn invalidate(&self, id: &str, listeners: &[Arc<dyn HttpSessionListener>]) {
        if let Some((_, session)) = self.sessions.remove(id) {
            self.expire(&session, listeners);
        }
    }

    fn process_expires(&self, listeners: &[Arc<dyn HttpSessionListener>]) -> usize {
        let now = now_millis();
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|e| e.value().is_expired(now))
            .map(|e| e.key().clone())
            .collect();
        for id in &expired {
            if let Some((_, session)) = self.sessions.remove(id) {
                self.expire(&session, listeners);
            }
        }
        if !expired.is_empty() {
            self.expired_total
                .fetch_add(expired.len() as u64, Ordering::Relaxed);
            debug!(expired = expired.len(), "Expired idle sessions");
        }
        expired.len()
    }

    fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    fn set_max_inactive_secs(&self, secs: i64) {
        self.max_inactive_secs.store(secs, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServletError;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counter {
        created: AtomicUsize,
        destroyed: AtomicUsize,
    }

    impl HttpSessionListener for Counter {
        fn session_created(&self, _session: &Session) -> Result<(), ServletError> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn session_destroyed(&self, _session: &Session) -> Result<(), ServletError> {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_expiry_notifies_listeners() {
        let manager = StandardManager::new();
        manager.start().unwrap();
        let counter = Arc::new(Counter::default());
        let listeners: Vec<Arc<dyn HttpSessionListener>> = vec![counter.clone()];

        let session = manager.create_session(&listeners);
        assert!(manager.find_session(session.id()).is_some());

        session.set_max_inactive_secs(1);
        session.last_accessed.store(now_millis() - 5_000, Ordering::Relaxed);

        assert_eq!(manager.process_expires(&listeners), 1);
        assert!(manager.find_session(session.id()).is_none());
        assert!(!session.is_valid());
        assert_eq!(counter.created.load(Ordering::SeqCst), 1);
        assert_eq!(counter.destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_invalidates_everything() {
        let manager = StandardManager::new();
        manager.start().unwrap();
        let counter = Arc::new(Counter::default());
        let listeners: Vec<Arc<dyn HttpSessionListener>> = vec![counter.clone()];

        manager.create_session(&listeners);
        manager.create_session(&listeners);
        manager.stop(&listeners);

        assert_eq!(manager.active_sessions(), 0);
        assert_eq!(counter.destroyed.load(Ordering::SeqCst), 2);
    }
}
