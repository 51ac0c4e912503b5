//! A [`HostAdapter`] that speaks a tiny JSON-lines protocol over stdout,
//! multiplexed against incoming events and responses arriving on stdin (see
//! [`crate::serve`]). Every host call writes one `{"kind":"request", ...}`
//! line and awaits the response line carrying a matching `id`, correlated
//! through a pending-request map — the same request/response pairing shape
//! as the teacher's websocket-backed `claw_channels` adapters, adapted to a
//! plain stdio pipe instead of a socket.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::io::{AsyncWriteExt, Stdout};
use tokio::sync::{oneshot, Mutex as AsyncMutex};

use ratewarden_core::{HostAdapter, HostMessage, MessagePart, ModelRef, Result, RwError, SessionInfo, Toast};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct StdioHostAdapter {
    next_id: AtomicU64,
    pending: DashMap<u64, oneshot::Sender<Value>>,
    out: AsyncMutex<Stdout>,
}

impl StdioHostAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
            out: AsyncMutex::new(tokio::io::stdout()),
        })
    }

    /// Called by the stdin reader loop in [`crate::serve`] for every line
    /// tagged `"kind":"response"`.
    pub fn resolve(&self, id: u64, payload: Value) {
        if let Some((_, tx)) = self.pending.remove(&id) {
            let _ = tx.send(payload);
        }
    }

    async fn request(&self, call: &'static str, mut body: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        body["kind"] = json!("request");
        body["id"] = json!(id);
        body["call"] = json!(call);
        let mut line = serde_json::to_vec(&body)?;
        line.push(b'\n');

        {
            let mut out = self.out.lock().await;
            out.write_all(&line).await?;
            out.flush().await?;
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => {
                self.pending.remove(&id);
                Err(RwError::Host {
                    call,
                    reason: "response channel dropped".to_string(),
                })
            }
            Err(_) => {
                self.pending.remove(&id);
                Err(RwError::Host {
                    call,
                    reason: "timed out waiting for a response line".to_string(),
                })
            }
        }
    }
}

#[async_trait]
impl HostAdapter for StdioHostAdapter {
    async fn abort_session(&self, session_id: &str) -> Result<()> {
        self.request("abort_session", json!({ "session_id": session_id }))
            .await?;
        Ok(())
    }

    async fn send_prompt_async(
        &self,
        session_id: &str,
        parts: Vec<MessagePart>,
        model: ModelRef,
        agent: Option<&str>,
    ) -> Result<()> {
        self.request(
            "send_prompt_async",
            json!({
                "session_id": session_id,
                "parts": parts,
                "model": model,
                "agent": agent,
            }),
        )
        .await?;
        Ok(())
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<HostMessage>> {
        let value = self
            .request("list_messages", json!({ "session_id": session_id }))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn get_session(&self, session_id: &str) -> Result<SessionInfo> {
        let value = self
            .request("get_session", json!({ "session_id": session_id }))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn show_toast(&self, toast: Toast) -> Result<()> {
        self.request("show_toast", json!({ "toast": toast })).await?;
        Ok(())
    }
}
