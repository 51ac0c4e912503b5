//! # ratewarden-engine
//!
//! The fallback engine: classifies rate-limit errors, tracks per-model
//! cooldown/circuit/health state, picks the next candidate model, manages
//! retry backoff, and orchestrates the abort+re-prompt sequence against the
//! host. See [`engine::FallbackEngine`] for the top-level wiring.

pub mod circuit_breaker;
pub mod cooldown;
pub mod dedup;
pub mod engine;
pub mod health;
pub mod janitor;
pub mod metrics;
pub mod mock;
pub mod orchestrator;
pub mod pattern_registry;
pub mod retry;
pub mod selector;
pub mod session_store;
pub mod subagent;

pub use circuit_breaker::{CircuitBreaker, CircuitState, CircuitTransition};
pub use cooldown::CooldownMap;
pub use dedup::{EventLock, FallbackInProgress, SessionLock};
pub use engine::FallbackEngine;
pub use health::HealthTracker;
pub use janitor::{Janitor, JanitorTtls};
pub use metrics::Metrics;
pub use orchestrator::FallbackOrchestrator;
pub use pattern_registry::{ErrorPattern, Pattern, PatternRegistry};
pub use retry::{CustomDelayFn, RetryManager};
pub use selector::{HealthBackedPrioritizer, ModelSelector, Prioritizer, SelectionOutcome, SelectorConfig};
pub use session_store::SessionStateStore;
pub use subagent::{SessionHierarchy, SubagentEntry, SubagentFallbackState, SubagentTracker};
