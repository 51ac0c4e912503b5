//! # ratewarden-config
//!
//! `FallbackConfig` schema, repair/validation, and a hot-reloadable TOML
//! loader. Plays the "external collaborator" role spec.md assigns to
//! configuration discovery/parsing/hot-reload — the engine only ever
//! consumes the validated snapshot this crate produces.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::{
    CircuitBreakerConfig, ConfigWarning, DynamicPrioritizationConfig, FallbackConfig,
    FallbackMode, ModelRefConfig, RetryPolicyConfig, RetryStrategy, WarningSeverity,
};
