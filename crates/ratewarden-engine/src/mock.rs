//! In-memory [`HostAdapter`] for deterministic testing, mirroring the
//! teacher's `claw_llm::mock::MockProvider` pattern: queued/recorded calls,
//! no real I/O.

use async_trait::async_trait;
use std::sync::Mutex;

use ratewarden_core::{HostAdapter, HostMessage, MessageInfo, MessagePart, ModelRef, Result, Role, RwError, SessionInfo, Toast};

/// One call observed by [`MockHost`], in the order it happened. Tests assert
/// on this sequence to check re-prompt ordering (spec §8 P7, S6).
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    Abort { session_id: String },
    SendPromptAsync { session_id: String, model: ModelRef, agent: Option<String> },
    ListMessages { session_id: String },
    GetSession { session_id: String },
    ShowToast { title: String, message: String },
}

pub struct MockHost {
    calls: Mutex<Vec<RecordedCall>>,
    messages: Mutex<std::collections::HashMap<String, Vec<HostMessage>>>,
    sessions: Mutex<std::collections::HashMap<String, SessionInfo>>,
    /// When set, `abort_session` fails with this message instead of no-op
    /// success.
    abort_error: Mutex<Option<String>>,
    /// When set, `send_prompt_async` fails with this message.
    prompt_error: Mutex<Option<String>>,
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHost {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            messages: Mutex::new(std::collections::HashMap::new()),
            sessions: Mutex::new(std::collections::HashMap::new()),
            abort_error: Mutex::new(None),
            prompt_error: Mutex::new(None),
        }
    }

    pub fn with_user_message(self, session_id: &str, message_id: &str, text: &str) -> Self {
        self.messages
            .lock()
            .unwrap()
            .entry(session_id.to_string())
            .or_default()
            .push(HostMessage {
                info: MessageInfo {
                    id: message_id.to_string(),
                    session_id: session_id.to_string(),
                    role: Role::User,
                    provider_id: None,
                    model_id: None,
                    agent: None,
                    status: None,
                    error: None,
                },
                parts: vec![MessagePart::Text { text: text.to_string() }],
            });
        self
    }

    pub fn with_session_agent(self, session_id: &str, agent: &str) -> Self {
        self.sessions.lock().unwrap().insert(
            session_id.to_string(),
            SessionInfo {
                agent: Some(agent.to_string()),
            },
        );
        self
    }

    pub fn fail_abort(self, message: &str) -> Self {
        *self.abort_error.lock().unwrap() = Some(message.to_string());
        self
    }

    pub fn fail_prompt(self, message: &str) -> Self {
        *self.prompt_error.lock().unwrap() = Some(message.to_string());
        self
    }

    pub fn recorded_calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl HostAdapter for MockHost {
    async fn abort_session(&self, session_id: &str) -> Result<()> {
        self.calls.lock().unwrap().push(RecordedCall::Abort {
            session_id: session_id.to_string(),
        });
        if let Some(msg) = self.abort_error.lock().unwrap().clone() {
            return Err(RwError::Host {
                call: "abort_session",
                reason: msg,
            });
        }
        Ok(())
    }

    async fn send_prompt_async(
        &self,
        session_id: &str,
        _parts: Vec<MessagePart>,
        model: ModelRef,
        agent: Option<&str>,
    ) -> Result<()> {
        self.calls.lock().unwrap().push(RecordedCall::SendPromptAsync {
            session_id: session_id.to_string(),
            model,
            agent: agent.map(str::to_string),
        });
        if let Some(msg) = self.prompt_error.lock().unwrap().clone() {
            return Err(RwError::Host {
                call: "send_prompt_async",
                reason: msg,
            });
        }
        Ok(())
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<HostMessage>> {
        self.calls.lock().unwrap().push(RecordedCall::ListMessages {
            session_id: session_id.to_string(),
        });
        Ok(self
            .messages
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_session(&self, session_id: &str) -> Result<SessionInfo> {
        self.calls.lock().unwrap().push(RecordedCall::GetSession {
            session_id: session_id.to_string(),
        });
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn show_toast(&self, toast: Toast) -> Result<()> {
        self.calls.lock().unwrap().push(RecordedCall::ShowToast {
            title: toast.title,
            message: toast.message,
        });
        Ok(())
    }
}
