use serde::{Deserialize, Serialize};

use ratewarden_core::ModelRef;

/// Root configuration snapshot (spec §3 `FallbackConfig`). Immutable once
/// constructed; reload produces a new snapshot that the engine swaps in
/// atomically (spec §6, §9 "Hot-reload atomicity").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Selection order in `cycle` mode.
    pub models: Vec<ModelRefConfig>,
    /// Duration a model stays rate-limited after a hit.
    pub cooldown_ms: u64,
    pub mode: FallbackMode,
    pub health_selection_enabled: bool,
    pub dynamic_prioritization: Option<DynamicPrioritizationConfig>,
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry_policy: RetryPolicyConfig,
    pub enable_subagent_fallback: bool,
}

/// TOML-friendly mirror of [`ModelRef`] (`provider_id`/`model_id` fields
/// instead of a combined key), converted via [`ModelRefConfig::to_model_ref`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRefConfig {
    pub provider_id: String,
    pub model_id: String,
}

impl ModelRefConfig {
    pub fn to_model_ref(&self) -> ModelRef {
        ModelRef::new(self.provider_id.clone(), self.model_id.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackMode {
    /// Also the fallback for any unrecognized `mode` string (spec §9 Open
    /// Question — I4 says unknown config enum values default rather than
    /// refusing to run).
    #[default]
    #[serde(other)]
    Cycle,
    Stop,
    RetryLast,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicPrioritizationConfig {
    pub enabled: bool,
}

impl Default for DynamicPrioritizationConfig {
    fn default() -> Self {
        Self { enabled: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub open_duration_ms: u64,
    pub half_open_max_probes: u32,
    /// Open question #1 (spec §9): whether a rate-limit failure counts
    /// toward the consecutive-failure threshold. Defaults to `false` —
    /// circuits open only on hard (non-rate-limit) errors.
    pub count_rate_limits_as_failures: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            open_duration_ms: 60_000,
            half_open_max_probes: 1,
            count_rate_limits_as_failures: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RetryStrategy {
    Immediate,
    Linear,
    /// Also the fallback for any unrecognized `strategy` string (spec §4.6
    /// I4: "unknown strategy -> default"), matching
    /// `RetryPolicyConfig::default()`'s choice of strategy.
    #[default]
    #[serde(other)]
    Exponential,
    Polynomial,
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicyConfig {
    pub max_retries: u32,
    pub strategy: RetryStrategy,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_enabled: bool,
    pub jitter_factor: f64,
    /// Total elapsed wallclock bound for a single (session, message). `None`
    /// = no timeout (bounded only by `max_retries`).
    pub timeout_ms: Option<u64>,
    pub polynomial_base: Option<f64>,
    pub polynomial_exponent: Option<f64>,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            strategy: RetryStrategy::Exponential,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            jitter_enabled: true,
            jitter_factor: 0.2,
            timeout_ms: None,
            polynomial_base: None,
            polynomial_exponent: None,
        }
    }
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            models: vec![],
            cooldown_ms: 60_000,
            mode: FallbackMode::default(),
            health_selection_enabled: false,
            dynamic_prioritization: None,
            circuit_breaker: CircuitBreakerConfig::default(),
            retry_policy: RetryPolicyConfig::default(),
            enable_subagent_fallback: true,
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let icon = match self.severity {
            WarningSeverity::Error => "error",
            WarningSeverity::Warning => "warning",
        };
        write!(f, "[{}] {}: {}", icon, self.field, self.message)
    }
}

impl FallbackConfig {
    /// Validate and repair the snapshot in place per invariant I4:
    /// "invalid values fall back to defaults and baseDelay > maxDelay
    /// triggers a swap." Unlike a strict external gate, this never refuses
    /// to run — it defaults-and-warns, matching §4.6's construction/
    /// `updateConfig` validation behavior. Returns the list of warnings
    /// produced (empty if the snapshot was already sound).
    pub fn validate_and_repair(&mut self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let defaults = RetryPolicyConfig::default();
        let rp = &mut self.retry_policy;

        if rp.strategy == RetryStrategy::Custom {
            // Whether a custom function is actually registered is an
            // engine-side concern (the config crate can't carry a closure
            // through TOML); the engine degrades to immediate at call time
            // if none was registered. Nothing to repair here.
        }

        if rp.base_delay_ms == 0 && defaults.base_delay_ms != 0 {
            // zero base delay is legal for `immediate`-style tuning; only
            // flag when combined with a strategy that needs a positive base.
            if rp.strategy != RetryStrategy::Immediate {
                warnings.push(ConfigWarning {
                    field: "retry_policy.base_delay_ms".into(),
                    message: "base_delay_ms is 0 for a non-immediate strategy".into(),
                    severity: WarningSeverity::Warning,
                });
            }
        }

        if rp.base_delay_ms > rp.max_delay_ms {
            warnings.push(ConfigWarning {
                field: "retry_policy.base_delay_ms".into(),
                message: format!(
                    "base_delay_ms ({}) > max_delay_ms ({}) — swapped",
                    rp.base_delay_ms, rp.max_delay_ms
                ),
                severity: WarningSeverity::Warning,
            });
            std::mem::swap(&mut rp.base_delay_ms, &mut rp.max_delay_ms);
        }

        if !(0.0..=1.0).contains(&rp.jitter_factor) {
            warnings.push(ConfigWarning {
                field: "retry_policy.jitter_factor".into(),
                message: format!(
                    "jitter_factor {} outside [0,1] — reset to default {}",
                    rp.jitter_factor, defaults.jitter_factor
                ),
                severity: WarningSeverity::Warning,
            });
            rp.jitter_factor = defaults.jitter_factor;
        }

        if rp.max_retries == 0 {
            warnings.push(ConfigWarning {
                field: "retry_policy.max_retries".into(),
                message: "max_retries is 0 — no retry will ever be permitted".into(),
                severity: WarningSeverity::Warning,
            });
        }

        let cb = &mut self.circuit_breaker;
        let cb_defaults = CircuitBreakerConfig::default();
        if cb.failure_threshold == 0 {
            warnings.push(ConfigWarning {
                field: "circuit_breaker.failure_threshold".into(),
                message: format!(
                    "failure_threshold is 0 — reset to default {}",
                    cb_defaults.failure_threshold
                ),
                severity: WarningSeverity::Warning,
            });
            cb.failure_threshold = cb_defaults.failure_threshold;
        }
        if cb.half_open_max_probes == 0 {
            warnings.push(ConfigWarning {
                field: "circuit_breaker.half_open_max_probes".into(),
                message: format!(
                    "half_open_max_probes is 0 — reset to default {}",
                    cb_defaults.half_open_max_probes
                ),
                severity: WarningSeverity::Warning,
            });
            cb.half_open_max_probes = cb_defaults.half_open_max_probes;
        }

        if self.models.is_empty() {
            warnings.push(ConfigWarning {
                field: "models".into(),
                message: "no models configured — the selector will never return a fallback"
                    .into(),
                severity: WarningSeverity::Warning,
            });
        }

        warnings
    }

    /// Hard validation gate used by the external loader at construction
    /// time. Unlike `validate_and_repair`, this can refuse to run (spec §7:
    /// "except when strict validation is required — external gate, not
    /// core"). Currently the only fatal condition is a duplicate model in
    /// `models`, which would make the selector's attempted-set bookkeeping
    /// ambiguous.
    pub fn validate_strict(&self) -> Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        for m in &self.models {
            let key = format!("{}/{}", m.provider_id, m.model_id);
            if !seen.insert(key.clone()) {
                return Err(format!("duplicate model in `models`: {key}"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repairs_swapped_delays() {
        let mut cfg = FallbackConfig {
            retry_policy: RetryPolicyConfig {
                base_delay_ms: 5000,
                max_delay_ms: 1000,
                ..Default::default()
            },
            ..Default::default()
        };
        let warnings = cfg.validate_and_repair();
        assert_eq!(cfg.retry_policy.base_delay_ms, 1000);
        assert_eq!(cfg.retry_policy.max_delay_ms, 5000);
        assert!(!warnings.is_empty());
    }

    #[test]
    fn repairs_out_of_range_jitter() {
        let mut cfg = FallbackConfig {
            retry_policy: RetryPolicyConfig {
                jitter_factor: 1.5,
                ..Default::default()
            },
            ..Default::default()
        };
        cfg.validate_and_repair();
        assert_eq!(cfg.retry_policy.jitter_factor, RetryPolicyConfig::default().jitter_factor);
    }

    #[test]
    fn strict_validation_rejects_duplicate_models() {
        let cfg = FallbackConfig {
            models: vec![
                ModelRefConfig { provider_id: "a".into(), model_id: "x".into() },
                ModelRefConfig { provider_id: "a".into(), model_id: "x".into() },
            ],
            ..Default::default()
        };
        assert!(cfg.validate_strict().is_err());
    }

    /// I4: "unknown strategy -> default", "unknown mode -> default to cycle".
    #[test]
    fn unknown_mode_and_strategy_deserialize_to_defaults() {
        let cfg: FallbackConfig = toml::from_str(
            r#"
            mode = "some-future-mode"

            [retry_policy]
            strategy = "some-future-strategy"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.mode, FallbackMode::Cycle);
        assert_eq!(cfg.retry_policy.strategy, RetryStrategy::Exponential);
    }
}
