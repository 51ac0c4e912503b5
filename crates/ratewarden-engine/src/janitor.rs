//! Component C11 — wakes on a timer and sweeps TTL-expired entries from
//! every stateful component (spec §4.12).

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::circuit_breaker::CircuitBreaker;
use crate::cooldown::CooldownMap;
use crate::dedup::{EventLock, FallbackInProgress};
use crate::health::HealthTracker;
use crate::retry::RetryManager;
use crate::session_store::SessionStateStore;
use crate::subagent::SubagentTracker;

/// TTLs the Janitor applies to each store on every sweep. Separate from
/// [`ratewarden_config::FallbackConfig`] because these are cleanup-interval
/// concerns, not fallback-behavior knobs (spec §9 treats them as constants:
/// `SESSION_ENTRY_TTL_MS`, `EVENT_LOCK_TTL_MS`, `DEDUP_WINDOW_MS`).
#[derive(Debug, Clone, Copy)]
pub struct JanitorTtls {
    pub cleanup_interval_ms: u64,
    pub session_entry_ttl_ms: u64,
    pub retry_attempt_ttl_ms: u64,
    pub dedup_window_ms: u64,
    pub event_lock_ttl_ms: u64,
    pub cooldown_ttl_ms: u64,
    pub circuit_ttl_ms: u64,
    pub subagent_ttl_ms: u64,
}

impl Default for JanitorTtls {
    fn default() -> Self {
        Self {
            cleanup_interval_ms: 60_000,
            session_entry_ttl_ms: 30 * 60_000,
            retry_attempt_ttl_ms: 30 * 60_000,
            dedup_window_ms: 10_000,
            event_lock_ttl_ms: 10_000,
            cooldown_ttl_ms: 5 * 60_000,
            circuit_ttl_ms: 30 * 60_000,
            subagent_ttl_ms: 60 * 60_000,
        }
    }
}

pub struct Janitor {
    ttls: JanitorTtls,
    session_store: Arc<SessionStateStore>,
    retry_manager: Arc<RetryManager>,
    dedup: Arc<FallbackInProgress>,
    event_lock: Arc<EventLock>,
    cooldown: Arc<CooldownMap>,
    circuit: Arc<CircuitBreaker>,
    health: Arc<HealthTracker>,
    subagents: Arc<SubagentTracker>,
}

impl Janitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ttls: JanitorTtls,
        session_store: Arc<SessionStateStore>,
        retry_manager: Arc<RetryManager>,
        dedup: Arc<FallbackInProgress>,
        event_lock: Arc<EventLock>,
        cooldown: Arc<CooldownMap>,
        circuit: Arc<CircuitBreaker>,
        health: Arc<HealthTracker>,
        subagents: Arc<SubagentTracker>,
    ) -> Self {
        Self {
            ttls,
            session_store,
            retry_manager,
            dedup,
            event_lock,
            cooldown,
            circuit,
            health,
            subagents,
        }
    }

    /// One sweep. Idempotent: running it twice in a row with no new
    /// activity between leaves the same state (spec §8 P9).
    pub fn sweep_once(&self) {
        self.session_store.cleanup_stale_entries(self.ttls.session_entry_ttl_ms);
        self.retry_manager.cleanup_stale_entries(self.ttls.retry_attempt_ttl_ms);
        self.dedup.cleanup_stale_entries(self.ttls.dedup_window_ms);
        self.event_lock.cleanup_stale_entries(self.ttls.event_lock_ttl_ms);
        self.cooldown.cleanup_stale_entries(self.ttls.cooldown_ttl_ms);
        self.circuit.cleanup_stale_entries(self.ttls.circuit_ttl_ms);
        self.health.cleanup_stale_entries(self.ttls.retry_attempt_ttl_ms);
        self.subagents.cleanup_stale_entries(self.ttls.subagent_ttl_ms);
        debug!("janitor sweep complete");
    }

    /// Spawn the periodic sweep loop. Exits cleanly when `token` is
    /// cancelled (spec §5 "Shutdown").
    pub fn spawn(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(self.ttls.cleanup_interval_ms));
            loop {
                tokio::select! {
                    _ = interval.tick() => self.sweep_once(),
                    _ = token.cancelled() => {
                        debug!("janitor shutting down");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ratewarden_config::CircuitBreakerConfig;
    use ratewarden_core::{ModelRef, TestClock};

    fn build() -> (Janitor, Arc<TestClock>) {
        let clock = Arc::new(TestClock::new(Utc::now()));
        let clock_dyn: Arc<dyn ratewarden_core::Clock> = clock.clone();
        let janitor = Janitor::new(
            JanitorTtls {
                cleanup_interval_ms: 1000,
                session_entry_ttl_ms: 1000,
                retry_attempt_ttl_ms: 1000,
                dedup_window_ms: 1000,
                event_lock_ttl_ms: 1000,
                cooldown_ttl_ms: 1000,
                circuit_ttl_ms: 1000,
                subagent_ttl_ms: 1000,
            },
            Arc::new(SessionStateStore::new(clock_dyn.clone())),
            Arc::new(RetryManager::new(Default::default(), clock_dyn.clone())),
            Arc::new(FallbackInProgress::new(1000, clock_dyn.clone())),
            Arc::new(EventLock::new(1000, clock_dyn.clone())),
            Arc::new(CooldownMap::new(1000, clock_dyn.clone())),
            Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default(), clock_dyn.clone())),
            Arc::new(HealthTracker::new()),
            Arc::new(SubagentTracker::new(clock_dyn)),
        );
        (janitor, clock)
    }

    /// Property P9 from spec §8.
    #[test]
    fn p9_sweeping_twice_is_idempotent() {
        let (janitor, clock) = build();
        janitor.cooldown.mark_limited(&ModelRef::new("p", "m"));
        clock.set(Utc::now() + chrono::Duration::milliseconds(5000));

        janitor.sweep_once();
        let after_first = janitor.cooldown.len();
        janitor.sweep_once();
        let after_second = janitor.cooldown.len();
        assert_eq!(after_first, after_second);
    }

    #[tokio::test]
    async fn spawn_stops_on_cancellation() {
        let (janitor, _clock) = build();
        let token = CancellationToken::new();
        let handle = Arc::new(janitor).spawn(token.clone());
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("janitor task should exit promptly")
            .unwrap();
    }
}
