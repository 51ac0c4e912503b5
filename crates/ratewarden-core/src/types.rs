use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque session identifier assigned by the host.
pub type SessionId = String;

/// Opaque message identifier assigned by the host.
pub type MessageId = String;

/// A (provider, model) pair identifying one fallback target.
///
/// Equality and hashing are over both fields; [`ModelRef::key`] produces the
/// canonical `provider/model` string used as a map key elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelRef {
    pub provider_id: String,
    pub model_id: String,
}

impl ModelRef {
    pub fn new(provider_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            model_id: model_id.into(),
        }
    }

    /// Canonical key: `providerID/modelID`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.provider_id, self.model_id)
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider_id, self.model_id)
    }
}

/// Composite key for per-(session,message) state — [`RetryAttempt`],
/// [`crate::FallbackInProgress`]. Modeled as a struct rather than a
/// concatenated string so session/message IDs containing a separator can
/// never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageKey {
    pub session_id: SessionId,
    pub message_id: MessageId,
}

impl MessageKey {
    pub fn new(session_id: impl Into<SessionId>, message_id: impl Into<MessageId>) -> Self {
        Self {
            session_id: session_id.into(),
            message_id: message_id.into(),
        }
    }
}

/// A single content fragment of a message, order-preserving across
/// text/image/file kinds (§4.10.k "extract message parts... preserve
/// fragments in order").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Text { text: String },
    Image { data: String, media_type: String },
    File { path: String, media_type: Option<String> },
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Info header of a message as returned by [`crate::HostAdapter::list_messages`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageInfo {
    pub id: MessageId,
    pub session_id: SessionId,
    pub role: Role,
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error: Option<ClassifiableError>,
}

/// A message as listed by the host: header + ordered content parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostMessage {
    pub info: MessageInfo,
    pub parts: Vec<MessagePart>,
}

/// An opaque, loosely-typed error value fed to the pattern registry (§4.1).
/// Mirrors the source's duck-typed `{name?, message?, data: {statusCode?,
/// message?, responseBody?}}` shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassifiableError {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<ClassifiableErrorData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassifiableErrorData {
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub response_body: Option<String>,
}

impl ClassifiableError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            name: None,
            message: Some(message.into()),
            data: None,
        }
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.data.get_or_insert_with(Default::default).status_code = Some(status_code);
        self
    }

    /// Concatenate every searchable field, lowercased, for pattern matching.
    pub fn searchable_text(&self) -> String {
        let mut parts = Vec::new();
        if let Some(n) = &self.name {
            parts.push(n.clone());
        }
        if let Some(m) = &self.message {
            parts.push(m.clone());
        }
        if let Some(data) = &self.data {
            if let Some(code) = data.status_code {
                parts.push(code.to_string());
            }
            if let Some(m) = &data.message {
                parts.push(m.clone());
            }
            if let Some(b) = &data.response_body {
                parts.push(b.clone());
            }
        }
        parts.join(" ").to_lowercase()
    }
}

/// Toast variants shown through [`crate::HostAdapter::show_toast`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastVariant {
    Info,
    Warning,
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Toast {
    pub title: String,
    pub message: String,
    pub variant: ToastVariant,
    /// Display duration in milliseconds.
    pub duration_ms: u64,
}

impl Toast {
    pub fn new(title: impl Into<String>, message: impl Into<String>, variant: ToastVariant) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            variant,
            duration_ms: 5000,
        }
    }
}

/// `{agent?: string}` returned by [`crate::HostAdapter::get_session`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionInfo {
    #[serde(default)]
    pub agent: Option<String>,
}
