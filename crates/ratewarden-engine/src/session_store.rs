//! Component C7 — per-session current model/agent, each TTL-stamped (spec
//! §4.7). Two parallel maps, mirroring the teacher's per-session state
//! pattern in `claw_runtime::session::SessionManager`.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

use ratewarden_core::{Clock, ModelRef, SessionId};

#[derive(Debug, Clone)]
struct Stamped<T> {
    value: T,
    last_updated: DateTime<Utc>,
}

pub struct SessionStateStore {
    models: DashMap<SessionId, Stamped<ModelRef>>,
    agents: DashMap<SessionId, Stamped<String>>,
    clock: Arc<dyn Clock>,
}

impl SessionStateStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            models: DashMap::new(),
            agents: DashMap::new(),
            clock,
        }
    }

    pub fn set_session_model(&self, session: &SessionId, model: ModelRef) {
        self.models.insert(
            session.clone(),
            Stamped {
                value: model,
                last_updated: self.clock.now(),
            },
        );
    }

    pub fn get_session_model(&self, session: &SessionId) -> Option<ModelRef> {
        self.models.get(session).map(|e| e.value.clone())
    }

    pub fn set_session_agent(&self, session: &SessionId, agent: String) {
        self.agents.insert(
            session.clone(),
            Stamped {
                value: agent,
                last_updated: self.clock.now(),
            },
        );
    }

    pub fn get_session_agent(&self, session: &SessionId) -> Option<String> {
        self.agents.get(session).map(|e| e.value.clone())
    }

    /// Drop every tracked session model/agent (engine teardown).
    pub fn clear_all(&self) {
        self.models.clear();
        self.agents.clear();
    }

    /// Drop entries whose `last_updated` is older than `ttl_ms` (Janitor
    /// sweep, `SESSION_ENTRY_TTL_MS`).
    pub fn cleanup_stale_entries(&self, ttl_ms: u64) {
        let now = self.clock.now();
        self.models.retain(|_, e| {
            (now - e.last_updated).num_milliseconds().max(0) as u64 <= ttl_ms
        });
        self.agents.retain(|_, e| {
            (now - e.last_updated).num_milliseconds().max(0) as u64 <= ttl_ms
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratewarden_core::TestClock;

    #[test]
    fn model_and_agent_are_independent() {
        let clock = Arc::new(TestClock::new(Utc::now()));
        let store = SessionStateStore::new(clock);
        let session = "s1".to_string();
        store.set_session_model(&session, ModelRef::new("anthropic", "claude"));
        assert_eq!(store.get_session_agent(&session), None);
        store.set_session_agent(&session, "plan".into());
        assert_eq!(store.get_session_agent(&session), Some("plan".into()));
        assert_eq!(
            store.get_session_model(&session),
            Some(ModelRef::new("anthropic", "claude"))
        );
    }

    #[test]
    fn unknown_session_returns_none() {
        let clock = Arc::new(TestClock::new(Utc::now()));
        let store = SessionStateStore::new(clock);
        assert_eq!(store.get_session_model(&"unknown".to_string()), None);
    }

    #[test]
    fn cleanup_prunes_stale_entries() {
        let start = Utc::now();
        let clock = Arc::new(TestClock::new(start));
        let store = SessionStateStore::new(clock.clone());
        let session = "s1".to_string();
        store.set_session_model(&session, ModelRef::new("p", "m"));
        store.set_session_agent(&session, "plan".into());

        clock.set(start + chrono::Duration::milliseconds(5000));
        store.cleanup_stale_entries(1000);

        assert_eq!(store.get_session_model(&session), None);
        assert_eq!(store.get_session_agent(&session), None);
    }

    #[test]
    fn overwrite_refreshes_timestamp() {
        let start = Utc::now();
        let clock = Arc::new(TestClock::new(start));
        let store = SessionStateStore::new(clock.clone());
        let session = "s1".to_string();
        store.set_session_model(&session, ModelRef::new("p", "m1"));

        clock.set(start + chrono::Duration::milliseconds(900));
        store.set_session_model(&session, ModelRef::new("p", "m2"));

        clock.set(start + chrono::Duration::milliseconds(1500));
        store.cleanup_stale_entries(1000);
        assert_eq!(
            store.get_session_model(&session),
            Some(ModelRef::new("p", "m2"))
        );
    }
}
