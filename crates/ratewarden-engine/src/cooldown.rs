//! Component C2 — tracks which (provider, model) pairs are in cooldown,
//! and for how long (spec §4.2).

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ratewarden_core::{Clock, ModelRef};

pub struct CooldownMap {
    limited_at: DashMap<String, DateTime<Utc>>,
    cooldown_ms: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl CooldownMap {
    pub fn new(cooldown_ms: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            limited_at: DashMap::new(),
            cooldown_ms: AtomicU64::new(cooldown_ms),
            clock,
        }
    }

    /// Update the cooldown duration in place. Reload-safe: existing
    /// cooldown stamps are left untouched (spec §6 "does NOT reset
    /// Cooldowns... by a reload") — only the window used to judge them
    /// changes.
    pub fn set_cooldown_ms(&self, cooldown_ms: u64) {
        self.cooldown_ms.store(cooldown_ms, Ordering::Relaxed);
    }

    fn cooldown_ms(&self) -> u64 {
        self.cooldown_ms.load(Ordering::Relaxed)
    }

    /// Stamp `model` as rate-limited at the current time.
    pub fn mark_limited(&self, model: &ModelRef) {
        self.limited_at.insert(model.key(), self.clock.now());
    }

    /// True iff `model` was marked limited and the cooldown window hasn't
    /// elapsed. Lazily removes the stamp once it has (spec §4.2: "Lazy
    /// expiry is the only expiry path besides the Janitor sweep").
    pub fn is_limited(&self, model: &ModelRef) -> bool {
        let key = model.key();
        let Some(entry) = self.limited_at.get(&key) else {
            return false;
        };
        let limited_at = *entry;
        drop(entry);
        let elapsed = (self.clock.now() - limited_at).num_milliseconds().max(0) as u64;
        if elapsed <= self.cooldown_ms() {
            true
        } else {
            self.limited_at.remove(&key);
            false
        }
    }

    /// Explicitly clear a model's cooldown stamp, regardless of elapsed
    /// time.
    pub fn clear(&self, model: &ModelRef) {
        self.limited_at.remove(&model.key());
    }

    /// Drop every entry whose cooldown has already elapsed by more than
    /// `ttl_ms` beyond `cooldown_ms` (Janitor sweep, spec §4.12).
    pub fn cleanup_stale_entries(&self, ttl_ms: u64) {
        let now = self.clock.now();
        let cutoff = self.cooldown_ms() + ttl_ms;
        self.limited_at.retain(|_, stamp| {
            let elapsed = (now - *stamp).num_milliseconds().max(0) as u64;
            elapsed <= cutoff
        });
    }

    /// Drop every tracked cooldown, regardless of elapsed time (engine
    /// teardown, spec §9 "destroy clears every map").
    pub fn clear_all(&self) {
        self.limited_at.clear();
    }

    pub fn len(&self) -> usize {
        self.limited_at.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limited_at.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use ratewarden_core::TestClock;

    fn model() -> ModelRef {
        ModelRef::new("anthropic", "claude")
    }

    #[test]
    fn not_limited_before_being_marked() {
        let clock = Arc::new(TestClock::new(Utc::now()));
        let map = CooldownMap::new(5000, clock);
        assert!(!map.is_limited(&model()));
    }

    #[test]
    fn limited_immediately_after_mark() {
        let clock = Arc::new(TestClock::new(Utc::now()));
        let map = CooldownMap::new(5000, clock);
        map.mark_limited(&model());
        assert!(map.is_limited(&model()));
    }

    /// Scenario S4 from spec §8.
    #[test]
    fn cooldown_expiry_under_date_advance() {
        let start = Utc::now();
        let clock = Arc::new(TestClock::new(start));
        let map = CooldownMap::new(5000, clock.clone());
        map.mark_limited(&model());

        clock.set(start + Duration::milliseconds(4999));
        assert!(map.is_limited(&model()));

        clock.set(start + Duration::milliseconds(5001));
        assert!(!map.is_limited(&model()));
        assert!(map.is_empty(), "lazy expiry must remove the stamp on read");
    }

    #[test]
    fn explicit_clear_removes_before_expiry() {
        let clock = Arc::new(TestClock::new(Utc::now()));
        let map = CooldownMap::new(5000, clock);
        map.mark_limited(&model());
        map.clear(&model());
        assert!(!map.is_limited(&model()));
    }

    #[test]
    fn cleanup_drops_sufficiently_stale_entries() {
        let start = Utc::now();
        let clock = Arc::new(TestClock::new(start));
        let map = CooldownMap::new(1000, clock.clone());
        map.mark_limited(&model());

        clock.set(start + Duration::milliseconds(1500));
        map.cleanup_stale_entries(1000);
        assert_eq!(map.len(), 1, "not yet past cooldown+ttl");

        clock.set(start + Duration::milliseconds(3000));
        map.cleanup_stale_entries(1000);
        assert_eq!(map.len(), 0);
    }
}
