use thiserror::Error;

/// Unified error type for the rate-limit fallback engine.
///
/// Per the propagation policy (spec §7), none of these ever escape the
/// orchestrator's event-handler entry point — they are logged and the
/// fallback attempt terminates. Callers that use the engine as a library
/// (the host adapter, the config loader) do see them.
#[derive(Error, Debug)]
pub enum RwError {
    /// A failure from `abort` / `sendPromptAsync` / `listMessages` /
    /// `getSession` / `showToast` on the host adapter.
    #[error("host adapter error ({call}): {reason}")]
    Host { call: &'static str, reason: String },

    /// Surfaced by the config loader, never constructed by the engine
    /// itself (spec §7: "surfaced by the external validator, not the core").
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RwError>;
