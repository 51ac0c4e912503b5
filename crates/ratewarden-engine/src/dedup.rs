//! Component C9 — the three-level concurrency gate (spec §4.9): EventLock,
//! SessionLock, FallbackInProgress dedup mark. Acquired in that order;
//! released on terminal success, terminal failure, or TTL.

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use std::sync::Arc;

use ratewarden_core::{Clock, MessageKey, SessionId};

pub struct EventLock {
    held: DashMap<SessionId, DateTime<Utc>>,
    ttl_ms: u64,
    clock: Arc<dyn Clock>,
}

impl EventLock {
    pub fn new(ttl_ms: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            held: DashMap::new(),
            ttl_ms,
            clock,
        }
    }

    /// Acquire the lock for `session`. Returns `false` if it's already held
    /// and not yet expired — the caller should treat the event as a
    /// duplicate signal for a failure already being handled.
    pub fn try_acquire(&self, session: &SessionId) -> bool {
        let now = self.clock.now();
        if let Some(stamp) = self.held.get(session) {
            let elapsed = (now - *stamp).num_milliseconds().max(0) as u64;
            if elapsed <= self.ttl_ms {
                return false;
            }
        }
        self.held.insert(session.clone(), now);
        true
    }

    pub fn release(&self, session: &SessionId) {
        self.held.remove(session);
    }

    /// Drop every held lock (engine teardown).
    pub fn clear_all(&self) {
        self.held.clear();
    }

    pub fn cleanup_stale_entries(&self, ttl_ms: u64) {
        let now = self.clock.now();
        self.held
            .retain(|_, stamp| (now - *stamp).num_milliseconds().max(0) as u64 <= ttl_ms);
    }
}

pub struct SessionLock {
    held: DashSet<SessionId>,
}

impl Default for SessionLock {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLock {
    pub fn new() -> Self {
        Self {
            held: DashSet::new(),
        }
    }

    /// `true` iff this call acquired the lock (it wasn't already held).
    pub fn try_acquire(&self, session: &SessionId) -> bool {
        self.held.insert(session.clone())
    }

    pub fn release(&self, session: &SessionId) {
        self.held.remove(session);
    }

    pub fn is_held(&self, session: &SessionId) -> bool {
        self.held.contains(session)
    }

    /// Drop every held lock (engine teardown).
    pub fn clear_all(&self) {
        self.held.clear();
    }
}

pub struct FallbackInProgress {
    marks: DashMap<MessageKey, DateTime<Utc>>,
    window_ms: u64,
    clock: Arc<dyn Clock>,
}

impl FallbackInProgress {
    pub fn new(window_ms: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            marks: DashMap::new(),
            window_ms,
            clock,
        }
    }

    /// `true` iff a mark was already present and still within
    /// `DEDUP_WINDOW_MS` — the caller should skip this orchestration
    /// attempt. As a side effect, marks the key so concurrent callers see
    /// it too.
    pub fn is_duplicate_and_mark(&self, key: &MessageKey) -> bool {
        let now = self.clock.now();
        if let Some(stamp) = self.marks.get(key) {
            let elapsed = (now - *stamp).num_milliseconds().max(0) as u64;
            if elapsed <= self.window_ms {
                return true;
            }
        }
        self.marks.insert(key.clone(), now);
        false
    }

    pub fn clear(&self, key: &MessageKey) {
        self.marks.remove(key);
    }

    /// Drop every dedup mark (engine teardown).
    pub fn clear_all(&self) {
        self.marks.clear();
    }

    pub fn cleanup_stale_entries(&self, ttl_ms: u64) {
        let now = self.clock.now();
        self.marks
            .retain(|_, stamp| (now - *stamp).num_milliseconds().max(0) as u64 <= ttl_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratewarden_core::TestClock;

    #[test]
    fn event_lock_blocks_concurrent_acquire() {
        let clock = Arc::new(TestClock::new(Utc::now()));
        let lock = EventLock::new(10_000, clock);
        let s = "s1".to_string();
        assert!(lock.try_acquire(&s));
        assert!(!lock.try_acquire(&s));
    }

    #[test]
    fn event_lock_expires_after_ttl() {
        let start = Utc::now();
        let clock = Arc::new(TestClock::new(start));
        let lock = EventLock::new(10_000, clock.clone());
        let s = "s1".to_string();
        assert!(lock.try_acquire(&s));
        clock.set(start + chrono::Duration::milliseconds(11_000));
        assert!(lock.try_acquire(&s));
    }

    #[test]
    fn session_lock_prevents_double_acquire() {
        let lock = SessionLock::new();
        let s = "s1".to_string();
        assert!(lock.try_acquire(&s));
        assert!(!lock.try_acquire(&s));
        lock.release(&s);
        assert!(lock.try_acquire(&s));
    }

    /// Property P2 from spec §8.
    #[test]
    fn p2_dedup_window_blocks_second_orchestration() {
        let start = Utc::now();
        let clock = Arc::new(TestClock::new(start));
        let dedup = FallbackInProgress::new(5000, clock.clone());
        let key = MessageKey::new("s1", "m1");

        assert!(!dedup.is_duplicate_and_mark(&key));
        assert!(dedup.is_duplicate_and_mark(&key));

        clock.set(start + chrono::Duration::milliseconds(6000));
        assert!(!dedup.is_duplicate_and_mark(&key));
    }

    #[test]
    fn clearing_dedup_mark_allows_immediate_retry() {
        let clock = Arc::new(TestClock::new(Utc::now()));
        let dedup = FallbackInProgress::new(5000, clock);
        let key = MessageKey::new("s1", "m1");
        dedup.is_duplicate_and_mark(&key);
        dedup.clear(&key);
        assert!(!dedup.is_duplicate_and_mark(&key));
    }
}
