//! Prometheus-compatible metrics for the fallback engine.
//!
//! Tracks rate-limit detections, fallback outcomes, and circuit breaker
//! transitions. Ambient observability, not part of the core's correctness
//! envelope — every increment is fire-and-forget.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    /// Total rate-limit errors classified by the Pattern Registry.
    pub rate_limits_detected_total: AtomicU64,
    /// Total fallback orchestrations started.
    pub fallback_attempts_total: AtomicU64,
    /// Total fallback orchestrations that ended in a successful re-prompt.
    pub fallback_successes_total: AtomicU64,
    /// Total fallback orchestrations exhausted (no candidate or retries
    /// used up).
    pub fallback_exhausted_total: AtomicU64,
    /// Total orchestration attempts skipped by the dedup/lock gate.
    pub fallback_deduped_total: AtomicU64,
    /// Total circuit breaker CLOSED -> OPEN transitions.
    pub circuit_opened_total: AtomicU64,
    /// Total circuit breaker HALF_OPEN -> CLOSED transitions.
    pub circuit_closed_total: AtomicU64,
    /// Total host adapter call failures (abort/promptAsync/listMessages).
    pub host_call_errors_total: AtomicU64,
    pub started_at: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                rate_limits_detected_total: AtomicU64::new(0),
                fallback_attempts_total: AtomicU64::new(0),
                fallback_successes_total: AtomicU64::new(0),
                fallback_exhausted_total: AtomicU64::new(0),
                fallback_deduped_total: AtomicU64::new(0),
                circuit_opened_total: AtomicU64::new(0),
                circuit_closed_total: AtomicU64::new(0),
                host_call_errors_total: AtomicU64::new(0),
                started_at: Instant::now(),
            }),
        }
    }

    pub fn inc_rate_limits_detected(&self) {
        self.inner
            .rate_limits_detected_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_fallback_attempts(&self) {
        self.inner
            .fallback_attempts_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_fallback_successes(&self) {
        self.inner
            .fallback_successes_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_fallback_exhausted(&self) {
        self.inner
            .fallback_exhausted_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_fallback_deduped(&self) {
        self.inner
            .fallback_deduped_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_circuit_opened(&self) {
        self.inner.circuit_opened_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_circuit_closed(&self) {
        self.inner.circuit_closed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_host_call_errors(&self) {
        self.inner
            .host_call_errors_total
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Render metrics in Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let m = &self.inner;
        let uptime = m.started_at.elapsed().as_secs();

        format!(
            r#"# HELP ratewarden_uptime_seconds Time since the engine started.
# TYPE ratewarden_uptime_seconds gauge
ratewarden_uptime_seconds {}

# HELP ratewarden_rate_limits_detected_total Total rate-limit errors classified.
# TYPE ratewarden_rate_limits_detected_total counter
ratewarden_rate_limits_detected_total {}

# HELP ratewarden_fallback_attempts_total Total fallback orchestrations started.
# TYPE ratewarden_fallback_attempts_total counter
ratewarden_fallback_attempts_total {}

# HELP ratewarden_fallback_successes_total Total fallback orchestrations that re-prompted successfully.
# TYPE ratewarden_fallback_successes_total counter
ratewarden_fallback_successes_total {}

# HELP ratewarden_fallback_exhausted_total Total fallback orchestrations exhausted with no candidate left.
# TYPE ratewarden_fallback_exhausted_total counter
ratewarden_fallback_exhausted_total {}

# HELP ratewarden_fallback_deduped_total Total orchestration attempts skipped by the dedup/lock gate.
# TYPE ratewarden_fallback_deduped_total counter
ratewarden_fallback_deduped_total {}

# HELP ratewarden_circuit_opened_total Total circuit breaker CLOSED -> OPEN transitions.
# TYPE ratewarden_circuit_opened_total counter
ratewarden_circuit_opened_total {}

# HELP ratewarden_circuit_closed_total Total circuit breaker HALF_OPEN -> CLOSED transitions.
# TYPE ratewarden_circuit_closed_total counter
ratewarden_circuit_closed_total {}

# HELP ratewarden_host_call_errors_total Total host adapter call failures.
# TYPE ratewarden_host_call_errors_total counter
ratewarden_host_call_errors_total {}
"#,
            uptime,
            m.rate_limits_detected_total.load(Ordering::Relaxed),
            m.fallback_attempts_total.load(Ordering::Relaxed),
            m.fallback_successes_total.load(Ordering::Relaxed),
            m.fallback_exhausted_total.load(Ordering::Relaxed),
            m.fallback_deduped_total.load(Ordering::Relaxed),
            m.circuit_opened_total.load(Ordering::Relaxed),
            m.circuit_closed_total.load(Ordering::Relaxed),
            m.host_call_errors_total.load(Ordering::Relaxed),
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
