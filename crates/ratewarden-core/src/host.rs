use async_trait::async_trait;

use crate::error::Result;
use crate::types::{HostMessage, ModelRef, MessagePart, SessionInfo, Toast};

/// The host's API surface, as consumed by the fallback engine (spec §6).
///
/// The engine never sees request/response bodies — only this narrow set of
/// session-management calls. Implementations wrap whatever RPC/IPC mechanism
/// the actual assistant host exposes; `ratewarden-engine::mock` provides an
/// in-memory implementation for tests.
#[async_trait]
pub trait HostAdapter: Send + Sync {
    /// Cancel the in-flight request for a session.
    async fn abort_session(&self, session_id: &str) -> Result<()>;

    /// Queue a new prompt against `model` (and `agent`, if tracked).
    async fn send_prompt_async(
        &self,
        session_id: &str,
        parts: Vec<MessagePart>,
        model: ModelRef,
        agent: Option<&str>,
    ) -> Result<()>;

    /// List every message in a session, oldest first.
    async fn list_messages(&self, session_id: &str) -> Result<Vec<HostMessage>>;

    /// Fetch session metadata (currently just the bound agent, if any).
    async fn get_session(&self, session_id: &str) -> Result<SessionInfo>;

    /// Best-effort UI toast. Implementations should treat failures as
    /// swallow-and-log; the trait itself still returns `Result` so an
    /// adapter *can* report failure, but callers in this crate never
    /// propagate it (spec §7, §9).
    async fn show_toast(&self, toast: Toast) -> Result<()>;
}

/// Optional narrower surface for routing toasts through a status bar /
/// notification center rather than the host's generic toast call (spec
/// §4.10.c: "via StatusReporter if present, else direct").
#[async_trait]
pub trait StatusReporter: Send + Sync {
    async fn report(&self, toast: Toast);
}

/// Adapts any [`HostAdapter`] into a [`StatusReporter`] that just forwards
/// to `show_toast`, swallowing errors at debug level.
pub struct HostStatusReporter<H: HostAdapter> {
    host: std::sync::Arc<H>,
}

impl<H: HostAdapter> HostStatusReporter<H> {
    pub fn new(host: std::sync::Arc<H>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl<H: HostAdapter> StatusReporter for HostStatusReporter<H> {
    async fn report(&self, toast: Toast) {
        if let Err(err) = self.host.show_toast(toast).await {
            tracing::debug!(%err, "toast delivery failed");
        }
    }
}
