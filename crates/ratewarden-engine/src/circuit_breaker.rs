//! Component C3 — per-model CLOSED/OPEN/HALF_OPEN circuit breaker (spec
//! §4.3), generalized from the teacher's single-breaker-per-provider
//! `ModelRouter` circuit breaker into a map keyed by [`ModelRef`].

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use ratewarden_core::{Clock, ModelRef};
use ratewarden_config::CircuitBreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Whether a `record_success`/`record_failure` call just crossed a state
/// boundary, so callers can fire the toast/metric spec §4.3 calls for on
/// CLOSED->OPEN ("fire toast/metric") without the breaker itself depending
/// on `Metrics`/`HostAdapter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitTransition {
    None,
    Opened,
    Closed,
}

#[derive(Debug, Clone)]
struct Entry {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<DateTime<Utc>>,
    probes_in_flight: u32,
}

impl Entry {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            probes_in_flight: 0,
        }
    }
}

pub struct CircuitBreaker {
    entries: Mutex<HashMap<String, Entry>>,
    config: Mutex<CircuitBreakerConfig>,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            config: Mutex::new(config),
            clock,
        }
    }

    /// Update the config in place, preserving every tracked circuit's
    /// state and failure count (spec §6 "does NOT reset... CircuitState...
    /// by a reload"). Callers decide separately whether an enabled-bit flip
    /// warrants recreating the breaker wholesale instead of calling this.
    pub fn update_config(&self, config: CircuitBreakerConfig) {
        *self.config.lock() = config;
    }

    fn config(&self) -> CircuitBreakerConfig {
        self.config.lock().clone()
    }

    /// I5: OPEN implicitly demotes to HALF_OPEN once `open_duration_ms` has
    /// elapsed, granting up to `half_open_max_probes` concurrent permits.
    pub fn can_execute(&self, model: &ModelRef) -> bool {
        let config = self.config();
        if !config.enabled {
            return true;
        }
        let mut entries = self.entries.lock();
        let entry = entries.entry(model.key()).or_insert_with(Entry::new);
        match entry.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let opened_at = entry.opened_at.unwrap_or_else(|| self.clock.now());
                let elapsed = (self.clock.now() - opened_at).num_milliseconds().max(0) as u64;
                if elapsed >= config.open_duration_ms {
                    entry.state = CircuitState::HalfOpen;
                    entry.probes_in_flight = 1;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if entry.probes_in_flight < config.half_open_max_probes {
                    entry.probes_in_flight += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn state(&self, model: &ModelRef) -> CircuitState {
        self.entries
            .lock()
            .get(&model.key())
            .map(|e| e.state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn is_open(&self, model: &ModelRef) -> bool {
        matches!(self.state(model), CircuitState::Open)
    }

    /// HALF_OPEN -> CLOSED on probe success; clears the failure counter.
    /// Returns [`CircuitTransition::Closed`] iff this call actually closed a
    /// circuit that wasn't already closed (spec §4.3 "fire toast/metric").
    pub fn record_success(&self, model: &ModelRef) -> CircuitTransition {
        let mut entries = self.entries.lock();
        let entry = entries.entry(model.key()).or_insert_with(Entry::new);
        let was_closed = entry.state == CircuitState::Closed && entry.consecutive_failures == 0;
        entry.consecutive_failures = 0;
        entry.probes_in_flight = 0;
        entry.state = CircuitState::Closed;
        entry.opened_at = None;
        if was_closed {
            CircuitTransition::None
        } else {
            CircuitTransition::Closed
        }
    }

    /// CLOSED counts consecutive failures toward `failure_threshold`;
    /// HALF_OPEN -> OPEN on any probe failure. `is_rate_limit` lets the
    /// caller honor `count_rate_limits_as_failures` (spec §9 Open Question
    /// #1) by pre-filtering before calling this — see
    /// [`CircuitBreaker::should_count_failure`]. Returns
    /// [`CircuitTransition::Opened`] iff this call just tripped the circuit
    /// from CLOSED or re-tripped it from HALF_OPEN.
    pub fn record_failure(&self, model: &ModelRef) -> CircuitTransition {
        let config = self.config();
        let mut entries = self.entries.lock();
        let entry = entries.entry(model.key()).or_insert_with(Entry::new);
        match entry.state {
            CircuitState::HalfOpen => {
                entry.state = CircuitState::Open;
                entry.opened_at = Some(self.clock.now());
                entry.probes_in_flight = 0;
                warn!(model = %model, "circuit breaker re-OPENED after failed probe");
                CircuitTransition::Opened
            }
            CircuitState::Closed | CircuitState::Open => {
                entry.consecutive_failures += 1;
                if entry.consecutive_failures >= config.failure_threshold {
                    let was_open = entry.state == CircuitState::Open;
                    entry.state = CircuitState::Open;
                    entry.opened_at = Some(self.clock.now());
                    if !was_open {
                        warn!(
                            model = %model,
                            failures = entry.consecutive_failures,
                            "circuit breaker OPEN — model disabled for {}ms",
                            config.open_duration_ms
                        );
                        return CircuitTransition::Opened;
                    }
                }
                CircuitTransition::None
            }
        }
    }

    /// Whether a failure with the given rate-limit classification should
    /// count toward the consecutive-failure threshold at all.
    pub fn should_count_failure(&self, is_rate_limit: bool) -> bool {
        !is_rate_limit || self.config().count_rate_limits_as_failures
    }

    /// Drop every tracked circuit, regardless of state (engine teardown).
    pub fn clear_all(&self) {
        self.entries.lock().clear();
    }

    /// Apply a new config AND drop every tracked circuit. Used on reload
    /// when the `enabled` bit flips — spec §6 asks the breaker to be
    /// "recreate[d]" in that case; clearing state in place is
    /// observationally identical to swapping in a fresh instance, without
    /// needing every holder (including the Janitor) to re-fetch a new `Arc`.
    pub fn reset_with_config(&self, config: CircuitBreakerConfig) {
        *self.config.lock() = config;
        self.entries.lock().clear();
    }

    pub fn cleanup_stale_entries(&self, ttl_ms: u64) {
        let now = self.clock.now();
        self.entries.lock().retain(|_, entry| match entry.state {
            CircuitState::Closed => entry.consecutive_failures > 0,
            CircuitState::Open | CircuitState::HalfOpen => entry
                .opened_at
                .map(|t| (now - t).num_milliseconds().max(0) as u64 <= ttl_ms)
                .unwrap_or(true),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> ModelRef {
        ModelRef::new("anthropic", "claude")
    }

    fn breaker(clock: Arc<dyn Clock>) -> CircuitBreaker {
        CircuitBreaker::new(
            CircuitBreakerConfig {
                enabled: true,
                failure_threshold: 3,
                open_duration_ms: 1000,
                half_open_max_probes: 1,
                count_rate_limits_as_failures: false,
            },
            clock,
        )
    }

    #[test]
    fn closed_below_threshold() {
        let clock = Arc::new(ratewarden_core::TestClock::new(Utc::now()));
        let cb = breaker(clock);
        cb.record_failure(&model());
        cb.record_failure(&model());
        assert_eq!(cb.state(&model()), CircuitState::Closed);
        assert!(cb.can_execute(&model()));
    }

    /// I5: CLOSED -> OPEN on threshold crossing.
    #[test]
    fn opens_on_threshold() {
        let clock = Arc::new(ratewarden_core::TestClock::new(Utc::now()));
        let cb = breaker(clock);
        for _ in 0..3 {
            cb.record_failure(&model());
        }
        assert_eq!(cb.state(&model()), CircuitState::Open);
        assert!(!cb.can_execute(&model()));
    }

    /// I5: OPEN -> HALF_OPEN after `open_duration_ms`.
    #[test]
    fn half_opens_after_duration() {
        let start = Utc::now();
        let clock = Arc::new(ratewarden_core::TestClock::new(start));
        let cb = breaker(clock.clone());
        for _ in 0..3 {
            cb.record_failure(&model());
        }
        clock.set(start + chrono::Duration::milliseconds(1500));
        assert!(cb.can_execute(&model()));
        assert_eq!(cb.state(&model()), CircuitState::HalfOpen);
    }

    /// I5: HALF_OPEN -> CLOSED on probe success.
    #[test]
    fn half_open_probe_success_closes() {
        let start = Utc::now();
        let clock = Arc::new(ratewarden_core::TestClock::new(start));
        let cb = breaker(clock.clone());
        for _ in 0..3 {
            cb.record_failure(&model());
        }
        clock.set(start + chrono::Duration::milliseconds(1500));
        cb.can_execute(&model());
        cb.record_success(&model());
        assert_eq!(cb.state(&model()), CircuitState::Closed);
    }

    /// I5: HALF_OPEN -> OPEN on probe failure.
    #[test]
    fn half_open_probe_failure_reopens() {
        let start = Utc::now();
        let clock = Arc::new(ratewarden_core::TestClock::new(start));
        let cb = breaker(clock.clone());
        for _ in 0..3 {
            cb.record_failure(&model());
        }
        clock.set(start + chrono::Duration::milliseconds(1500));
        cb.can_execute(&model());
        cb.record_failure(&model());
        assert_eq!(cb.state(&model()), CircuitState::Open);
    }

    #[test]
    fn half_open_limits_concurrent_probes() {
        let start = Utc::now();
        let clock = Arc::new(ratewarden_core::TestClock::new(start));
        let cb = breaker(clock.clone());
        for _ in 0..3 {
            cb.record_failure(&model());
        }
        clock.set(start + chrono::Duration::milliseconds(1500));
        assert!(cb.can_execute(&model()));
        assert!(!cb.can_execute(&model()), "only one probe permit at a time");
    }

    #[test]
    fn transition_reported_only_on_threshold_crossing() {
        let clock = Arc::new(ratewarden_core::TestClock::new(Utc::now()));
        let cb = breaker(clock);
        assert_eq!(cb.record_failure(&model()), CircuitTransition::None);
        assert_eq!(cb.record_failure(&model()), CircuitTransition::None);
        assert_eq!(cb.record_failure(&model()), CircuitTransition::Opened);
        // Already open — further failures report no new transition.
        assert_eq!(cb.record_failure(&model()), CircuitTransition::None);
    }

    #[test]
    fn transition_reported_on_half_open_recovery() {
        let start = Utc::now();
        let clock = Arc::new(ratewarden_core::TestClock::new(start));
        let cb = breaker(clock.clone());
        for _ in 0..3 {
            cb.record_failure(&model());
        }
        clock.set(start + chrono::Duration::milliseconds(1500));
        cb.can_execute(&model());
        assert_eq!(cb.record_success(&model()), CircuitTransition::Closed);
    }

    #[test]
    fn disabled_breaker_always_allows() {
        let clock = Arc::new(ratewarden_core::TestClock::new(Utc::now()));
        let cb = CircuitBreaker::new(
            CircuitBreakerConfig {
                enabled: false,
                ..CircuitBreakerConfig::default()
            },
            clock,
        );
        for _ in 0..100 {
            cb.record_failure(&model());
        }
        assert!(cb.can_execute(&model()));
    }

    #[test]
    fn should_count_failure_respects_knob() {
        let clock = Arc::new(ratewarden_core::TestClock::new(Utc::now()));
        let cb = breaker(clock);
        assert!(cb.should_count_failure(false));
        assert!(!cb.should_count_failure(true));
    }
}
