use serde::{Deserialize, Serialize};

use crate::types::{ClassifiableError, MessageInfo, SessionId};

/// Events the host delivers into the core (spec §6).
///
/// Duck-typed properties in the source become explicit variants here; the
/// `as_*` accessors below stand in for the source's type-guard functions,
/// returning `Option` instead of doing runtime shape-sniffing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    SessionError {
        session_id: SessionId,
        error: ClassifiableError,
    },
    MessageUpdated {
        info: MessageInfo,
    },
    SessionStatus {
        session_id: SessionId,
        status: SessionStatus,
    },
    SubagentSessionCreated {
        session_id: SessionId,
        parent_session_id: SessionId,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    #[serde(rename = "type")]
    pub status_type: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// Substrings that mark a `session.status { type: "retry" }` event as a
/// rate-limit retry per spec §6.
const RETRY_STATUS_MARKERS: &[&str] = &[
    "usage limit",
    "rate limit",
    "high concurrency",
    "reduce concurrency",
];

impl SessionStatus {
    /// True iff `type == "retry"` AND the message contains one of the known
    /// rate-limit retry markers.
    pub fn is_rate_limit_retry(&self) -> bool {
        if self.status_type != "retry" {
            return false;
        }
        let Some(message) = &self.message else {
            return false;
        };
        let lower = message.to_lowercase();
        RETRY_STATUS_MARKERS.iter().any(|m| lower.contains(m))
    }
}

impl Event {
    pub fn session_id(&self) -> &str {
        match self {
            Event::SessionError { session_id, .. } => session_id,
            Event::MessageUpdated { info } => &info.session_id,
            Event::SessionStatus { session_id, .. } => session_id,
            Event::SubagentSessionCreated { session_id, .. } => session_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_status_detects_known_markers() {
        let s = SessionStatus {
            status_type: "retry".into(),
            message: Some("Upstream reports HIGH CONCURRENCY, backing off".into()),
        };
        assert!(s.is_rate_limit_retry());
    }

    #[test]
    fn retry_status_ignores_other_types() {
        let s = SessionStatus {
            status_type: "progress".into(),
            message: Some("rate limit".into()),
        };
        assert!(!s.is_rate_limit_retry());
    }

    #[test]
    fn retry_status_requires_marker() {
        let s = SessionStatus {
            status_type: "retry".into(),
            message: Some("server hiccup".into()),
        };
        assert!(!s.is_rate_limit_retry());
    }
}
