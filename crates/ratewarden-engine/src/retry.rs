//! Component C6 — per-(session,message) attempt counter, backoff delay, and
//! timeout bound (spec §4.6).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use tracing::warn;

use ratewarden_config::{RetryPolicyConfig, RetryStrategy};
use ratewarden_core::{Clock, MessageKey, SessionId};

/// Caller-supplied delay function for `RetryStrategy::Custom`. Receives the
/// 0-based attempt number about to be made; a panic or an out-of-range
/// result degrades to `immediate` per spec §4.6.
pub type CustomDelayFn = dyn Fn(u32) -> i64 + Send + Sync;

#[derive(Debug, Clone)]
struct RetryAttempt {
    attempt_count: u32,
    start_time: DateTime<Utc>,
    delays: Vec<u64>,
    model_ids: Vec<String>,
    last_attempt_time: DateTime<Utc>,
}

impl RetryAttempt {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            attempt_count: 0,
            start_time: now,
            delays: Vec::new(),
            model_ids: Vec::new(),
            last_attempt_time: now,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct ModelStats {
    attempts: u64,
    successes: u64,
}

#[derive(Debug, Clone, Default)]
struct SessionStats {
    total_retries: u64,
    total_delay_ms: u64,
    per_model: HashMap<String, ModelStats>,
}

impl SessionStats {
    fn average_delay(&self) -> f64 {
        if self.total_retries == 0 {
            0.0
        } else {
            self.total_delay_ms as f64 / self.total_retries as f64
        }
    }
}

pub struct RetryManager {
    attempts: Mutex<HashMap<MessageKey, RetryAttempt>>,
    stats: Mutex<HashMap<SessionId, SessionStats>>,
    config: Mutex<RetryPolicyConfig>,
    clock: Arc<dyn Clock>,
    custom_fn: Mutex<Option<Arc<CustomDelayFn>>>,
}

impl RetryManager {
    pub fn new(mut config: RetryPolicyConfig, clock: Arc<dyn Clock>) -> Self {
        Self::repair_config(&mut config);
        Self {
            attempts: Mutex::new(HashMap::new()),
            stats: Mutex::new(HashMap::new()),
            config: Mutex::new(config),
            clock,
            custom_fn: Mutex::new(None),
        }
    }

    pub fn with_custom_fn(self, f: Arc<CustomDelayFn>) -> Self {
        *self.custom_fn.lock() = Some(f);
        self
    }

    pub fn custom_fn(&self) -> Option<Arc<CustomDelayFn>> {
        self.custom_fn.lock().clone()
    }

    fn config(&self) -> RetryPolicyConfig {
        self.config.lock().clone()
    }

    /// Config validation on construction and on `updateConfig` (spec §4.6):
    /// `baseDelayMs > maxDelayMs` swaps; `jitterFactor ∉ [0,1]` resets to
    /// default. Mirrors [`ratewarden_config::FallbackConfig::validate_and_repair`]
    /// engine-side so a `RetryManager` built directly (outside the config
    /// loader) still can't end up with an invalid snapshot.
    fn repair_config(config: &mut RetryPolicyConfig) {
        if config.base_delay_ms > config.max_delay_ms {
            std::mem::swap(&mut config.base_delay_ms, &mut config.max_delay_ms);
        }
        if !(0.0..=1.0).contains(&config.jitter_factor) {
            config.jitter_factor = RetryPolicyConfig::default().jitter_factor;
        }
    }

    /// Update the retry policy in place, preserving every in-flight
    /// `(session,message)` attempt counter (spec §6 "does NOT reset...
    /// in-flight Retry state... by a reload"). Passing `None` for
    /// `custom_fn` leaves whatever function (if any) is already registered
    /// untouched — callers that want to clear it should pass
    /// `Some`-wrapped replacement explicitly via a fresh registration path.
    pub fn update_config(&self, mut config: RetryPolicyConfig, custom_fn: Option<Arc<CustomDelayFn>>) {
        Self::repair_config(&mut config);
        *self.config.lock() = config;
        if custom_fn.is_some() {
            *self.custom_fn.lock() = custom_fn;
        }
    }

    /// True iff `attempts < maxRetries` AND (no `timeoutMs` OR elapsed ≤
    /// `timeoutMs`). A never-seen key has zero attempts and no elapsed time.
    pub fn can_retry(&self, key: &MessageKey) -> bool {
        let config = self.config();
        let attempts = self.attempts.lock();
        let Some(entry) = attempts.get(key) else {
            return config.max_retries > 0;
        };
        if entry.attempt_count >= config.max_retries {
            return false;
        }
        if let Some(timeout_ms) = config.timeout_ms {
            let elapsed = (self.clock.now() - entry.start_time).num_milliseconds().max(0) as u64;
            if elapsed > timeout_ms {
                return false;
            }
        }
        true
    }

    /// Delay for the *next* attempt, based on the 0-based current attempt
    /// count (i.e. how many attempts have already been made for this key).
    pub fn get_retry_delay(&self, key: &MessageKey) -> u64 {
        let n = self
            .attempts
            .lock()
            .get(key)
            .map(|e| e.attempt_count)
            .unwrap_or(0);
        self.delay_for(n)
    }

    fn delay_for(&self, n: u32) -> u64 {
        let config = self.config();
        let base = config.base_delay_ms as f64;
        let max = config.max_delay_ms as f64;

        let raw = match config.strategy {
            RetryStrategy::Immediate => 0.0,
            RetryStrategy::Linear => base * (n as f64 + 1.0),
            RetryStrategy::Exponential => base * 2f64.powi(n as i32),
            RetryStrategy::Polynomial => {
                let poly_base = config.polynomial_base.unwrap_or(1.5);
                let exponent = config.polynomial_exponent.unwrap_or(2.0);
                base * poly_base.powf(n as f64 * exponent)
            }
            RetryStrategy::Custom => match self.custom_fn() {
                Some(f) => {
                    let result =
                        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (f.as_ref())(n)));
                    match result {
                        Ok(v) if v >= 0 && (v as f64) <= max => v as f64,
                        Ok(v) => {
                            warn!(value = v, "custom retry delay out of range — clamped");
                            (v.max(0) as f64).min(max)
                        }
                        Err(_) => {
                            warn!("custom retry delay function panicked — degrading to immediate");
                            0.0
                        }
                    }
                }
                None => 0.0,
            },
        };

        let clamped = raw.clamp(0.0, max);
        let with_jitter = if config.jitter_enabled && clamped > 0.0 {
            let factor = config.jitter_factor;
            let spread = clamped * factor;
            let mut rng = rand::thread_rng();
            let jitter = rng.gen_range(-spread..=spread);
            (clamped + jitter).max(0.0)
        } else {
            clamped
        };
        with_jitter.round() as u64
    }

    pub fn record_retry(&self, session: &SessionId, key: &MessageKey, model_id: &str, delay: u64) {
        let now = self.clock.now();
        let mut attempts = self.attempts.lock();
        let entry = attempts
            .entry(key.clone())
            .or_insert_with(|| RetryAttempt::new(now));
        entry.attempt_count += 1;
        entry.delays.push(delay);
        entry.model_ids.push(model_id.to_string());
        entry.last_attempt_time = now;
        drop(attempts);

        let mut stats = self.stats.lock();
        let session_stats = stats.entry(session.clone()).or_default();
        session_stats.total_retries += 1;
        session_stats.total_delay_ms += delay;
        session_stats
            .per_model
            .entry(model_id.to_string())
            .or_default()
            .attempts += 1;
    }

    pub fn record_success(&self, session: &SessionId, model_id: &str) {
        let mut stats = self.stats.lock();
        let session_stats = stats.entry(session.clone()).or_default();
        session_stats
            .per_model
            .entry(model_id.to_string())
            .or_default()
            .successes += 1;
    }

    /// Terminal failure bookkeeping. The per-(session,message) attempt state
    /// itself is advanced by `record_retry`; this only updates aggregate
    /// session stats used for observability.
    pub fn record_failure(&self, session: &SessionId) {
        let mut stats = self.stats.lock();
        stats.entry(session.clone()).or_default();
    }

    /// Clear retry state for `key`, or every key belonging to `session` if
    /// `key` is `None`.
    pub fn reset(&self, session: &SessionId, key: Option<&MessageKey>) {
        let mut attempts = self.attempts.lock();
        match key {
            Some(k) => {
                attempts.remove(k);
            }
            None => {
                attempts.retain(|k, _| &k.session_id != session);
            }
        }
    }

    pub fn attempt_count(&self, key: &MessageKey) -> u32 {
        self.attempts.lock().get(key).map(|e| e.attempt_count).unwrap_or(0)
    }

    /// Every model key already tried for `key`, in attempt order. The
    /// orchestrator seeds the Model Selector's `attempted` set from this so
    /// a model isn't retried within the same (session,message) lifetime
    /// across repeated rate-limit events.
    pub fn attempted_models(&self, key: &MessageKey) -> std::collections::HashSet<String> {
        self.attempts
            .lock()
            .get(key)
            .map(|e| e.model_ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn average_delay(&self, session: &SessionId) -> f64 {
        self.stats
            .lock()
            .get(session)
            .map(|s| s.average_delay())
            .unwrap_or(0.0)
    }

    /// Drop every tracked attempt and stat (engine teardown).
    pub fn clear_all(&self) {
        self.attempts.lock().clear();
        self.stats.lock().clear();
    }

    pub fn cleanup_stale_entries(&self, ttl_ms: u64) {
        let now = self.clock.now();
        self.attempts.lock().retain(|_, entry| {
            let elapsed = (now - entry.last_attempt_time).num_milliseconds().max(0) as u64;
            elapsed <= ttl_ms
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratewarden_core::TestClock;

    fn key() -> MessageKey {
        MessageKey::new("s1", "m1")
    }

    fn manager(strategy: RetryStrategy, jitter_enabled: bool) -> RetryManager {
        let clock = Arc::new(TestClock::new(Utc::now()));
        RetryManager::new(
            RetryPolicyConfig {
                max_retries: 5,
                strategy,
                base_delay_ms: 1000,
                max_delay_ms: 10000,
                jitter_enabled,
                jitter_factor: 0.2,
                timeout_ms: None,
                polynomial_base: None,
                polynomial_exponent: None,
            },
            clock,
        )
    }

    #[test]
    fn can_retry_true_for_unseen_key() {
        let rm = manager(RetryStrategy::Exponential, false);
        assert!(rm.can_retry(&key()));
    }

    #[test]
    fn can_retry_false_once_max_retries_hit() {
        let rm = manager(RetryStrategy::Immediate, false);
        for _ in 0..5 {
            rm.record_retry(&"s1".to_string(), &key(), "m", 0);
        }
        assert!(!rm.can_retry(&key()));
    }

    #[test]
    fn can_retry_false_past_timeout() {
        let start = Utc::now();
        let clock = Arc::new(TestClock::new(start));
        let rm = RetryManager::new(
            RetryPolicyConfig {
                timeout_ms: Some(1000),
                ..RetryPolicyConfig::default()
            },
            clock.clone(),
        );
        rm.record_retry(&"s1".to_string(), &key(), "m", 0);
        clock.set(start + chrono::Duration::milliseconds(2000));
        assert!(!rm.can_retry(&key()));
    }

    /// Scenario S5 from spec §8.
    #[test]
    fn s5_exponential_backoff_with_cap() {
        let rm = manager(RetryStrategy::Exponential, false);
        let expected = [1000, 2000, 4000, 8000, 10000];
        for (n, exp) in expected.iter().enumerate() {
            assert_eq!(rm.delay_for(n as u32), *exp);
        }
    }

    #[test]
    fn immediate_strategy_is_always_zero() {
        let rm = manager(RetryStrategy::Immediate, false);
        for n in 0..5 {
            assert_eq!(rm.delay_for(n), 0);
        }
    }

    #[test]
    fn linear_strategy_scales_by_attempt() {
        let rm = manager(RetryStrategy::Linear, false);
        assert_eq!(rm.delay_for(0), 1000);
        assert_eq!(rm.delay_for(1), 2000);
        assert_eq!(rm.delay_for(9), 10000); // clamped
    }

    #[test]
    fn polynomial_strategy_uses_defaults() {
        let rm = manager(RetryStrategy::Polynomial, false);
        // base=1.5, exponent=2 => 1000 * 1.5^(n*2)
        assert_eq!(rm.delay_for(0), 1000);
        assert_eq!(rm.delay_for(1), (1000.0 * 1.5f64.powf(2.0)).round() as u64);
    }

    #[test]
    fn custom_strategy_uses_registered_fn() {
        let clock = Arc::new(TestClock::new(Utc::now()));
        let rm = RetryManager::new(
            RetryPolicyConfig {
                strategy: RetryStrategy::Custom,
                max_delay_ms: 10000,
                jitter_enabled: false,
                ..RetryPolicyConfig::default()
            },
            clock,
        )
        .with_custom_fn(Arc::new(|n| (n as i64 + 1) * 500));
        assert_eq!(rm.delay_for(0), 500);
        assert_eq!(rm.delay_for(3), 2000);
    }

    #[test]
    fn custom_strategy_without_fn_degrades_to_immediate() {
        let rm = manager(RetryStrategy::Custom, false);
        assert_eq!(rm.delay_for(2), 0);
    }

    #[test]
    fn custom_strategy_out_of_range_is_clamped() {
        let clock = Arc::new(TestClock::new(Utc::now()));
        let rm = RetryManager::new(
            RetryPolicyConfig {
                strategy: RetryStrategy::Custom,
                max_delay_ms: 5000,
                jitter_enabled: false,
                ..RetryPolicyConfig::default()
            },
            clock,
        )
        .with_custom_fn(Arc::new(|_n| 999_999));
        assert_eq!(rm.delay_for(0), 5000);
    }

    /// Property P6 from spec §8.
    #[test]
    fn p6_delay_bounds_hold_across_strategies() {
        let strategies = [
            RetryStrategy::Immediate,
            RetryStrategy::Linear,
            RetryStrategy::Exponential,
            RetryStrategy::Polynomial,
        ];
        for strategy in strategies {
            let rm = manager(strategy, true);
            let config = rm.config();
            let max = config.max_delay_ms as f64;
            let bound = max * (1.0 + config.jitter_factor);
            for n in 0..20 {
                let delay = rm.delay_for(n) as f64;
                assert!(delay >= 0.0 && delay <= bound, "strategy {strategy:?} n={n} delay={delay} bound={bound}");
            }
        }
    }

    #[test]
    fn record_retry_increments_attempt_count_and_stats() {
        let rm = manager(RetryStrategy::Immediate, false);
        let session = "s1".to_string();
        rm.record_retry(&session, &key(), "anthropic/claude", 0);
        rm.record_retry(&session, &key(), "openai/gpt", 0);
        assert_eq!(rm.attempt_count(&key()), 2);
    }

    #[test]
    fn reset_clears_single_key() {
        let rm = manager(RetryStrategy::Immediate, false);
        let session = "s1".to_string();
        rm.record_retry(&session, &key(), "m", 0);
        rm.reset(&session, Some(&key()));
        assert_eq!(rm.attempt_count(&key()), 0);
    }

    #[test]
    fn reset_without_key_clears_whole_session() {
        let rm = manager(RetryStrategy::Immediate, false);
        let session = "s1".to_string();
        let k2 = MessageKey::new("s1", "m2");
        rm.record_retry(&session, &key(), "m", 0);
        rm.record_retry(&session, &k2, "m", 0);
        rm.reset(&session, None);
        assert_eq!(rm.attempt_count(&key()), 0);
        assert_eq!(rm.attempt_count(&k2), 0);
    }

    #[test]
    fn construction_repairs_swapped_delays() {
        let clock = Arc::new(TestClock::new(Utc::now()));
        let rm = RetryManager::new(
            RetryPolicyConfig {
                base_delay_ms: 9000,
                max_delay_ms: 1000,
                ..RetryPolicyConfig::default()
            },
            clock,
        );
        assert_eq!(rm.config().base_delay_ms, 1000);
        assert_eq!(rm.config().max_delay_ms, 9000);
    }

    #[test]
    fn cleanup_drops_stale_attempts() {
        let start = Utc::now();
        let clock = Arc::new(TestClock::new(start));
        let rm = RetryManager::new(RetryPolicyConfig::default(), clock.clone());
        rm.record_retry(&"s1".to_string(), &key(), "m", 0);
        clock.set(start + chrono::Duration::milliseconds(5000));
        rm.cleanup_stale_entries(1000);
        assert_eq!(rm.attempt_count(&key()), 0);
    }

    /// Spec §6: reload forwards the new policy but "does NOT reset...
    /// in-flight Retry state."
    #[test]
    fn update_config_preserves_in_flight_attempts() {
        let rm = manager(RetryStrategy::Exponential, false);
        rm.record_retry(&"s1".to_string(), &key(), "anthropic/claude", 1000);
        assert_eq!(rm.attempt_count(&key()), 1);

        rm.update_config(
            RetryPolicyConfig {
                max_retries: 10,
                ..RetryPolicyConfig::default()
            },
            None,
        );

        assert_eq!(rm.attempt_count(&key()), 1, "reload must not clear attempt state");
        assert_eq!(rm.config().max_retries, 10);
    }

    #[test]
    fn update_config_without_custom_fn_preserves_existing_registration() {
        let rm = manager(RetryStrategy::Custom, false).with_custom_fn(Arc::new(|n| n as i64 * 100));
        assert_eq!(rm.delay_for(2), 200);
        rm.update_config(
            RetryPolicyConfig {
                strategy: RetryStrategy::Custom,
                ..RetryPolicyConfig::default()
            },
            None,
        );
        assert_eq!(rm.delay_for(2), 200, "existing custom fn must survive a reload that passes None");
    }
}
