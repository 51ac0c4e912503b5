//! Top-level wiring: constructs every component, owns the background
//! Janitor, and exposes the narrow surface the host integration actually
//! calls (spec §5, §6, §A.8).

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use ratewarden_config::FallbackConfig;
use ratewarden_core::{Clock, Event, HostAdapter, StatusReporter};

use crate::circuit_breaker::CircuitBreaker;
use crate::cooldown::CooldownMap;
use crate::dedup::{EventLock, FallbackInProgress, SessionLock};
use crate::health::HealthTracker;
use crate::janitor::{Janitor, JanitorTtls};
use crate::metrics::Metrics;
use crate::orchestrator::FallbackOrchestrator;
use crate::pattern_registry::PatternRegistry;
use crate::retry::RetryManager;
use crate::selector::{HealthBackedPrioritizer, Prioritizer};
use crate::session_store::SessionStateStore;
use crate::subagent::SubagentTracker;

/// Build the prioritizer for a config snapshot, or `None` if dynamic
/// prioritization is off.
fn build_prioritizer(config: &FallbackConfig, health: &Arc<HealthTracker>) -> Option<Arc<dyn Prioritizer>> {
    config
        .dynamic_prioritization
        .as_ref()
        .filter(|d| d.enabled)
        .map(|_| Arc::new(HealthBackedPrioritizer::new(health.clone())) as Arc<dyn Prioritizer>)
}

pub struct FallbackEngine {
    config: Arc<RwLock<FallbackConfig>>,
    patterns: Arc<PatternRegistry>,
    // Cooldown/circuit/health/retry are constructed once and never replaced:
    // `update_config` mutates them in place so the Janitor's Arc clones (and
    // any in-flight orchestration holding the old orchestrator snapshot)
    // never observe a stale store. This is what keeps hot-reload from
    // resetting Cooldowns, CircuitState, or in-flight Retry state (spec §6).
    cooldown: Arc<CooldownMap>,
    circuit: Arc<CircuitBreaker>,
    health: Arc<HealthTracker>,
    retry: Arc<RetryManager>,
    prioritizer: RwLock<Option<Arc<dyn Prioritizer>>>,
    sessions: Arc<SessionStateStore>,
    subagents: Arc<SubagentTracker>,
    event_lock: Arc<EventLock>,
    session_lock: Arc<SessionLock>,
    dedup: Arc<FallbackInProgress>,
    metrics: Arc<Metrics>,
    clock: Arc<dyn Clock>,
    host: Arc<dyn HostAdapter>,
    status_reporter: Option<Arc<dyn StatusReporter>>,
    orchestrator: RwLock<Arc<FallbackOrchestrator>>,
    janitor: Arc<Janitor>,
    shutdown: CancellationToken,
    janitor_handle: Mutex<Option<JoinHandle<()>>>,
}

impl FallbackEngine {
    pub fn new(
        host: Arc<dyn HostAdapter>,
        status_reporter: Option<Arc<dyn StatusReporter>>,
        config: FallbackConfig,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Self::with_ttls(host, status_reporter, config, clock, JanitorTtls::default())
    }

    pub fn with_ttls(
        host: Arc<dyn HostAdapter>,
        status_reporter: Option<Arc<dyn StatusReporter>>,
        config: FallbackConfig,
        clock: Arc<dyn Clock>,
        ttls: JanitorTtls,
    ) -> Arc<Self> {
        let patterns = Arc::new(PatternRegistry::with_defaults());
        let sessions = Arc::new(SessionStateStore::new(clock.clone()));
        let subagents = Arc::new(SubagentTracker::new(clock.clone()));
        let event_lock = Arc::new(EventLock::new(ttls.event_lock_ttl_ms, clock.clone()));
        let session_lock = Arc::new(SessionLock::new());
        let dedup = Arc::new(FallbackInProgress::new(ttls.dedup_window_ms, clock.clone()));
        let metrics = Arc::new(Metrics::new());

        let health = Arc::new(HealthTracker::new());
        let cooldown = Arc::new(CooldownMap::new(config.cooldown_ms, clock.clone()));
        let circuit = Arc::new(CircuitBreaker::new(config.circuit_breaker.clone(), clock.clone()));
        let retry = Arc::new(RetryManager::new(config.retry_policy.clone(), clock.clone()));
        let prioritizer = RwLock::new(build_prioritizer(&config, &health));
        let config_lock = Arc::new(RwLock::new(config));

        let janitor = Arc::new(Janitor::new(
            ttls,
            sessions.clone(),
            retry.clone(),
            dedup.clone(),
            event_lock.clone(),
            cooldown.clone(),
            circuit.clone(),
            health.clone(),
            subagents.clone(),
        ));

        let orchestrator = Arc::new(FallbackOrchestrator::new(
            config_lock.clone(),
            patterns.clone(),
            cooldown.clone(),
            circuit.clone(),
            health.clone(),
            retry.clone(),
            sessions.clone(),
            subagents.clone(),
            event_lock.clone(),
            session_lock.clone(),
            dedup.clone(),
            host.clone(),
            status_reporter.clone(),
            metrics.clone(),
            clock.clone(),
            prioritizer.read().clone(),
        ));

        let engine = Arc::new(Self {
            config: config_lock,
            patterns,
            cooldown,
            circuit,
            health,
            retry,
            prioritizer,
            sessions,
            subagents,
            event_lock,
            session_lock,
            dedup,
            metrics,
            clock,
            host,
            status_reporter,
            orchestrator: RwLock::new(orchestrator),
            janitor,
            shutdown: CancellationToken::new(),
            janitor_handle: Mutex::new(None),
        });

        let handle = engine.janitor.clone().spawn(engine.shutdown.clone());
        *engine.janitor_handle.lock() = Some(handle);
        engine
    }

    /// Event-handler entry point the host integration calls for every
    /// `session.error` / `message.updated` / `session.status` /
    /// `subagent.session.created` event (spec §6).
    pub async fn handle_event(&self, event: Event) {
        let orchestrator = self.orchestrator.read().clone();
        orchestrator.handle_event(event).await;
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn patterns(&self) -> &Arc<PatternRegistry> {
        &self.patterns
    }

    pub fn config_snapshot(&self) -> FallbackConfig {
        self.config.read().clone()
    }

    /// Apply a new configuration snapshot in place (spec §6: reload "does
    /// NOT reset Cooldowns, CircuitState, or in-flight Retry state"). The
    /// cooldown window and retry policy are forwarded to the existing
    /// stores; the circuit breaker and dynamic prioritizer are recreated
    /// only when their respective `enabled` bit flips, since that's the one
    /// case where stale tracked state would actually be observable under
    /// the new config. The orchestrator is rebuilt referencing the same
    /// (mostly unchanged) Arcs and swapped in behind a single pointer write,
    /// so any orchestration already in flight keeps using the snapshot it
    /// started with (spec §9 "Hot-reload atomicity").
    pub fn update_config(&self, new_config: FallbackConfig) {
        let old_config = self.config.read().clone();

        self.cooldown.set_cooldown_ms(new_config.cooldown_ms);
        self.retry
            .update_config(new_config.retry_policy.clone(), self.retry.custom_fn());

        if old_config.circuit_breaker.enabled != new_config.circuit_breaker.enabled {
            self.circuit.reset_with_config(new_config.circuit_breaker.clone());
        } else {
            self.circuit.update_config(new_config.circuit_breaker.clone());
        }

        let old_prioritizer_enabled = old_config
            .dynamic_prioritization
            .as_ref()
            .is_some_and(|d| d.enabled);
        let new_prioritizer_enabled = new_config
            .dynamic_prioritization
            .as_ref()
            .is_some_and(|d| d.enabled);
        if old_prioritizer_enabled != new_prioritizer_enabled {
            *self.prioritizer.write() = build_prioritizer(&new_config, &self.health);
        }

        *self.config.write() = new_config;

        let orchestrator = FallbackOrchestrator::new(
            self.config.clone(),
            self.patterns.clone(),
            self.cooldown.clone(),
            self.circuit.clone(),
            self.health.clone(),
            self.retry.clone(),
            self.sessions.clone(),
            self.subagents.clone(),
            self.event_lock.clone(),
            self.session_lock.clone(),
            self.dedup.clone(),
            self.host.clone(),
            self.status_reporter.clone(),
            self.metrics.clone(),
            self.clock.clone(),
            self.prioritizer.read().clone(),
        );
        *self.orchestrator.write() = Arc::new(orchestrator);
    }

    /// Tear down the engine: stop the Janitor and flush every stateful
    /// store (spec §A.8). The engine is unusable afterward — construct a
    /// new one to resume.
    pub async fn destroy(&self) {
        self.shutdown.cancel();
        if let Some(handle) = self.janitor_handle.lock().take() {
            let _ = handle.await;
        }
        self.sessions.clear_all();
        self.subagents.clear_all();
        self.dedup.clear_all();
        self.event_lock.clear_all();
        self.session_lock.clear_all();
        self.cooldown.clear_all();
        self.circuit.clear_all();
        self.health.clear_all();
        self.retry.clear_all();
    }
}
