//! ACP runtime type definitions
//!
//! Handles, turn events, capabilities and status snapshots exchanged between
//! the control plane and a runtime adapter.

use crate::error::AcpErrorCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifetime of an established runtime session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    #[default]
    Persistent,
    Oneshot,
}

/// How a turn's text is applied to the running session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PromptMode {
    #[default]
    Prompt,
    Steer,
}

impl PromptMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prompt => "prompt",
            Self::Steer => "steer",
        }
    }
}

/// Which stream a text delta belongs to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TextStream {
    #[default]
    Output,
    Thought,
}

/// One event of a turn's event sequence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    TextDelta {
        text: String,
        #[serde(default)]
        stream: TextStream,
    },
    Status {
        text: String,
    },
    ToolCall {
        text: String,
    },
    Done {
        #[serde(
            default,
            rename = "stopReason",
            skip_serializing_if = "Option::is_none"
        )]
        stop_reason: Option<String>,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retryable: Option<bool>,
    },
}

impl TurnEvent {
    pub fn output(text: impl Into<String>) -> Self {
        Self::TextDelta {
            text: text.into(),
            stream: TextStream::Output,
        }
    }

    pub fn thought(text: impl Into<String>) -> Self {
        Self::TextDelta {
            text: text.into(),
            stream: TextStream::Thought,
        }
    }

    pub fn status(text: impl Into<String>) -> Self {
        Self::Status { text: text.into() }
    }

    pub fn tool_call(text: impl Into<String>) -> Self {
        Self::ToolCall { text: text.into() }
    }

    pub fn done() -> Self {
        Self::Done { stop_reason: None }
    }

    pub fn done_with_reason(reason: impl Into<String>) -> Self {
        Self::Done {
            stop_reason: Some(reason.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            code: None,
            retryable: None,
        }
    }

    /// `done` and `error` end a turn; nothing is consumed after them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }

    /// Short tag for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TextDelta { .. } => "text_delta",
            Self::Status { .. } => "status",
            Self::ToolCall { .. } => "tool_call",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}

/// Handle returned by session establishment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeHandle {
    pub session_key: String,
    pub backend: String,
    pub runtime_session_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acp_record_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_session_id: Option<String>,
}

impl RuntimeHandle {
    pub fn new(
        session_key: impl Into<String>,
        backend: impl Into<String>,
        runtime_session_name: impl Into<String>,
    ) -> Self {
        Self {
            session_key: session_key.into(),
            backend: backend.into(),
            runtime_session_name: runtime_session_name.into(),
            cwd: None,
            acp_record_id: None,
            backend_session_id: None,
            agent_session_id: None,
        }
    }
}

/// Input to `ensure_session`
#[derive(Debug, Clone, Default)]
pub struct EnsureSessionInput {
    pub session_key: String,
    pub agent: String,
    pub mode: SessionMode,
    pub cwd: Option<String>,
    pub env: HashMap<String, String>,
}

impl EnsureSessionInput {
    pub fn new(session_key: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            session_key: session_key.into(),
            agent: agent.into(),
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: SessionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

/// Control-plane commands a backend may advertise
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RuntimeControl {
    #[serde(rename = "session/set_mode")]
    SetMode,
    #[serde(rename = "session/set_config_option")]
    SetConfigOption,
    #[serde(rename = "session/status")]
    Status,
}

impl RuntimeControl {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SetMode => "session/set_mode",
            Self::SetConfigOption => "session/set_config_option",
            Self::Status => "session/status",
        }
    }
}

/// Capability set advertised by a backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeCapabilities {
    #[serde(default)]
    pub controls: Vec<RuntimeControl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_option_keys: Option<Vec<String>>,
}

impl RuntimeCapabilities {
    pub fn with_controls(controls: impl IntoIterator<Item = RuntimeControl>) -> Self {
        Self {
            controls: controls.into_iter().collect(),
            config_option_keys: None,
        }
    }

    pub fn supports(&self, control: RuntimeControl) -> bool {
        self.controls.contains(&control)
    }

    /// An absent or empty key list means the backend accepts arbitrary keys.
    pub fn accepts_config_key(&self, key: &str) -> bool {
        match &self.config_option_keys {
            Some(keys) if !keys.is_empty() => keys.iter().any(|k| k == key),
            _ => true,
        }
    }
}

/// Point-in-time status snapshot, always fetched live
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acp_record_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Environment/installation self-check result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DoctorReport {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<AcpErrorCode>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

impl DoctorReport {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            code: None,
            message: message.into(),
            install_command: None,
            details: Vec::new(),
        }
    }

    pub fn failed(code: AcpErrorCode, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            code: Some(code),
            message: message.into(),
            install_command: None,
            details: Vec::new(),
        }
    }
}
