//! Component C10 — the top-level event-driven state machine (spec §4.10,
//! §4.11). Consumes host events, classifies them, and — on a detected
//! rate-limit — drives the abort+re-prompt sequence against an alternate
//! model.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tracing::{debug, warn};

use ratewarden_config::FallbackConfig;
use ratewarden_core::{
    Clock, Event, HostAdapter, MessageKey, MessagePart, ModelRef, Role, SessionId, StatusReporter,
    Toast, ToastVariant,
};

use crate::circuit_breaker::{CircuitBreaker, CircuitTransition};
use crate::cooldown::CooldownMap;
use crate::dedup::{EventLock, FallbackInProgress, SessionLock};
use crate::health::HealthTracker;
use crate::metrics::Metrics;
use crate::pattern_registry::PatternRegistry;
use crate::retry::RetryManager;
use crate::selector::{ModelSelector, Prioritizer, SelectionOutcome, SelectorConfig};
use crate::session_store::SessionStateStore;
use crate::subagent::SubagentTracker;

pub struct FallbackOrchestrator {
    config: Arc<RwLock<FallbackConfig>>,
    patterns: Arc<PatternRegistry>,
    cooldown: Arc<CooldownMap>,
    circuit: Arc<CircuitBreaker>,
    health: Arc<HealthTracker>,
    retry: Arc<RetryManager>,
    sessions: Arc<SessionStateStore>,
    subagents: Arc<SubagentTracker>,
    event_lock: Arc<EventLock>,
    session_lock: Arc<SessionLock>,
    dedup: Arc<FallbackInProgress>,
    host: Arc<dyn HostAdapter>,
    status_reporter: Option<Arc<dyn StatusReporter>>,
    metrics: Arc<Metrics>,
    clock: Arc<dyn Clock>,
    prioritizer: Option<Arc<dyn Prioritizer>>,
}

/// ~300ms settle delay between abort and re-prompt for a tracked agent
/// (spec §4.11).
const AGENT_SETTLE_DELAY_MS: u64 = 300;

#[allow(clippy::too_many_arguments)]
impl FallbackOrchestrator {
    pub fn new(
        config: Arc<RwLock<FallbackConfig>>,
        patterns: Arc<PatternRegistry>,
        cooldown: Arc<CooldownMap>,
        circuit: Arc<CircuitBreaker>,
        health: Arc<HealthTracker>,
        retry: Arc<RetryManager>,
        sessions: Arc<SessionStateStore>,
        subagents: Arc<SubagentTracker>,
        event_lock: Arc<EventLock>,
        session_lock: Arc<SessionLock>,
        dedup: Arc<FallbackInProgress>,
        host: Arc<dyn HostAdapter>,
        status_reporter: Option<Arc<dyn StatusReporter>>,
        metrics: Arc<Metrics>,
        clock: Arc<dyn Clock>,
        prioritizer: Option<Arc<dyn Prioritizer>>,
    ) -> Self {
        Self {
            config,
            patterns,
            cooldown,
            circuit,
            health,
            retry,
            sessions,
            subagents,
            event_lock,
            session_lock,
            dedup,
            host,
            status_reporter,
            metrics,
            clock,
            prioritizer,
        }
    }

    /// Event-handler entry point (spec §6). Never propagates an error out —
    /// every failure is logged and swallowed (spec §7).
    pub async fn handle_event(&self, event: Event) {
        match event {
            Event::SessionError { session_id, error } => {
                if self.patterns.is_rate_limit_error(&error) {
                    self.handle_rate_limit_fallback(&session_id, None).await;
                }
            }
            Event::MessageUpdated { info } => {
                if let Some(error) = &info.error {
                    if self.patterns.is_rate_limit_error(error) {
                        let current = match (&info.provider_id, &info.model_id) {
                            (Some(p), Some(m)) => Some(ModelRef::new(p.clone(), m.clone())),
                            _ => None,
                        };
                        self.handle_rate_limit_fallback(&info.session_id, current).await;
                    }
                }
            }
            Event::SessionStatus { session_id, status } => {
                if status.is_rate_limit_retry() {
                    self.handle_rate_limit_fallback(&session_id, None).await;
                }
            }
            Event::SubagentSessionCreated {
                session_id,
                parent_session_id,
            } => {
                self.subagents.register_subagent(&session_id, &parent_session_id);
            }
        }
    }

    async fn emit_toast(&self, title: &str, message: &str, variant: ToastVariant) {
        let toast = Toast::new(title, message, variant);
        if let Some(reporter) = &self.status_reporter {
            reporter.report(toast).await;
        } else if let Err(err) = self.host.show_toast(toast).await {
            debug!(%err, "toast delivery failed");
        }
    }

    /// Spec §4.3: a CLOSED -> OPEN crossing ("fire toast/metric") and its
    /// HALF_OPEN -> CLOSED counterpart both get a toast and a metric bump.
    async fn report_circuit_transition(&self, model: &ModelRef, transition: CircuitTransition) {
        match transition {
            CircuitTransition::Opened => {
                self.metrics.inc_circuit_opened();
                self.emit_toast(
                    "Circuit breaker open",
                    &format!("{model} disabled after repeated failures."),
                    ToastVariant::Error,
                )
                .await;
            }
            CircuitTransition::Closed => {
                self.metrics.inc_circuit_closed();
                self.emit_toast(
                    "Circuit breaker closed",
                    &format!("{model} recovered and is available again."),
                    ToastVariant::Info,
                )
                .await;
            }
            CircuitTransition::None => {}
        }
    }

    /// Entry: `handleRateLimitFallback` (spec §4.10).
    pub async fn handle_rate_limit_fallback(&self, session_id: &SessionId, current: Option<ModelRef>) {
        if !self.event_lock.try_acquire(session_id) {
            self.metrics.inc_fallback_deduped();
            return;
        }

        // single config snapshot for the whole orchestration: reading once
        // here and threading it through avoids mid-operation drift if a
        // reload lands between the subagent-retargeting decision and the
        // later model-selection step.
        let config = self.config.read().clone();

        // spec §3 `enableSubagentFallback`: when off, a subagent fires
        // fallback on itself instead of retargeting to its root — the
        // hierarchy is tracked either way (`register_subagent` always
        // records it), but the orchestrator only resolves through it when
        // the knob is on.
        let target = if config.enable_subagent_fallback {
            self.subagents.get_root_session(session_id)
        } else {
            session_id.clone()
        };

        if !self.session_lock.try_acquire(&target) {
            self.event_lock.release(session_id);
            return;
        }

        self.run_orchestration(&target, current, &config).await;

        self.session_lock.release(&target);
        self.event_lock.release(session_id);
    }

    async fn run_orchestration(&self, target: &SessionId, current: Option<ModelRef>, config: &FallbackConfig) {
        self.metrics.inc_fallback_attempts();

        // a. resolve current model if not supplied.
        let current = current.or_else(|| self.sessions.get_session_model(target));

        // b. record rate-limit metric + health failure for current model.
        self.metrics.inc_rate_limits_detected();
        if let Some(ref m) = current {
            self.health.record_failure(m);
            if self.circuit.should_count_failure(true) {
                let transition = self.circuit.record_failure(m);
                self.report_circuit_transition(m, transition).await;
            }
        }

        // c. "rate limit detected" toast.
        self.emit_toast(
            "Rate limit detected",
            "Switching to a fallback model...",
            ToastVariant::Warning,
        )
        .await;

        // d. find the last user message.
        let messages = match self.host.list_messages(target).await {
            Ok(m) => m,
            Err(err) => {
                warn!(error = %err, "listMessages failed during fallback orchestration");
                self.metrics.inc_host_call_errors();
                return;
            }
        };
        let Some(user_message) = messages.into_iter().rev().find(|m| m.info.role == Role::User) else {
            return;
        };

        // e. dedup mark.
        let mkey = MessageKey::new(target.clone(), user_message.info.id.clone());
        if self.dedup.is_duplicate_and_mark(&mkey) {
            self.metrics.inc_fallback_deduped();
            return;
        }

        // f. retry permission.
        if !self.retry.can_retry(&mkey) {
            self.emit_toast(
                "Fallback exhausted",
                "No more retries available for this message.",
                ToastVariant::Error,
            )
            .await;
            self.retry.reset(target, Some(&mkey));
            self.dedup.clear(&mkey);
            self.metrics.inc_fallback_exhausted();
            return;
        }

        // g. delay.
        let delay = self.retry.get_retry_delay(&mkey);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }

        // h. pick the next model.
        let selector = self.build_selector(config);
        let mut attempted: HashSet<String> = self.retry.attempted_models(&mkey);
        let outcome = selector.select_fallback_model(current.as_ref(), &mut attempted);

        let next = match outcome {
            SelectionOutcome::Selected(m) => m,
            SelectionOutcome::LastResort(m) => {
                self.emit_toast(
                    "Last resort",
                    &format!("Retrying the last configured model ({m})."),
                    ToastVariant::Warning,
                )
                .await;
                m
            }
            SelectionOutcome::None => {
                let message = match config.mode {
                    ratewarden_config::FallbackMode::Stop => "Fallback stopped: no further models configured.",
                    _ => "No fallback model is currently available.",
                };
                self.emit_toast("No fallback available", message, ToastVariant::Error).await;
                self.retry.reset(target, Some(&mkey));
                self.dedup.clear(&mkey);
                self.metrics.inc_fallback_exhausted();
                return;
            }
        };

        // j. record the attempt.
        self.retry.record_retry(target, &mkey, &next.key(), delay);
        self.emit_toast(
            "Retrying",
            &format!("Retrying with {next}..."),
            ToastVariant::Info,
        )
        .await;

        // k. extract message parts, preserving order.
        let parts: Vec<MessagePart> = user_message.parts.clone();

        // l. re-prompt sub-protocol.
        let agent = match self.sessions.get_session_agent(target) {
            Some(a) => Some(a),
            None => match self.host.get_session(target).await {
                Ok(info) => {
                    if let Some(a) = &info.agent {
                        self.sessions.set_session_agent(target, a.clone());
                    }
                    info.agent
                }
                Err(_) => None,
            },
        };

        let start = Instant::now();
        let result = self.reprompt(target, parts, next.clone(), agent.as_deref()).await;

        match result {
            Ok(()) => {
                self.retry.record_success(target, &next.key());
                self.health.record_success(&next, start.elapsed());
                let transition = self.circuit.record_success(&next);
                self.report_circuit_transition(&next, transition).await;
                self.retry.reset(target, Some(&mkey));
                self.sessions.set_session_model(target, next.clone());

                if config.enable_subagent_fallback {
                    if let Some(hierarchy) = self.subagents.get_hierarchy(target) {
                        for subagent_id in hierarchy.subagents.keys() {
                            self.sessions.set_session_model(subagent_id, next.clone());
                            if let Some(a) = &agent {
                                self.sessions.set_session_agent(subagent_id, a.clone());
                            }
                        }
                        self.subagents.mark_hierarchy_completed(target);
                    }
                }

                self.metrics.inc_fallback_successes();
                self.emit_toast(
                    "Fallback successful",
                    &format!("Now using {next}."),
                    ToastVariant::Success,
                )
                .await;
            }
            Err(err) => {
                warn!(error = %err, model = %next, "fallback re-prompt failed");
                self.retry.record_failure(target);
                self.metrics.inc_host_call_errors();
            }
        }
    }

    fn build_selector(&self, config: &FallbackConfig) -> ModelSelector {
        let models: Vec<ModelRef> = config.models.iter().map(|m| m.to_model_ref()).collect();
        ModelSelector::new(
            SelectorConfig {
                models,
                mode: config.mode,
                health_selection_enabled: config.health_selection_enabled,
                dynamic_prioritization_enabled: config
                    .dynamic_prioritization
                    .as_ref()
                    .map(|d| d.enabled)
                    .unwrap_or(false),
            },
            self.cooldown.clone(),
            self.circuit.clone(),
            self.health.clone(),
            self.prioritizer.clone(),
        )
    }

    /// Re-prompt sub-protocol (spec §4.11). Ordering depends on whether an
    /// agent is tracked for this session.
    async fn reprompt(
        &self,
        target: &SessionId,
        parts: Vec<MessagePart>,
        model: ModelRef,
        agent: Option<&str>,
    ) -> ratewarden_core::Result<()> {
        match agent {
            None => {
                // Queue the new prompt first so the host doesn't release
                // the session as idle, then cancel the failing one.
                self.host
                    .send_prompt_async(target, parts, model, None)
                    .await?;
                if let Err(err) = self.host.abort_session(target).await {
                    debug!(%err, "abort_session failed (swallowed)");
                }
                Ok(())
            }
            Some(agent) => {
                // Custom agents can't accept a new prompt mid-retry: cancel
                // first, let the abort settle, then re-send.
                if let Err(err) = self.host.abort_session(target).await {
                    debug!(%err, "abort_session failed (swallowed)");
                }
                tokio::time::sleep(std::time::Duration::from_millis(AGENT_SETTLE_DELAY_MS)).await;
                self.host
                    .send_prompt_async(target, parts, model, Some(agent))
                    .await
            }
        }
    }
}
