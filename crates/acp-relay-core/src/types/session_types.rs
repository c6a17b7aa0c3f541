//! Session identity and persisted session metadata types

use super::SessionMode;
use crate::acp::RuntimeOptions;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether backend-assigned identifiers for a session are known yet
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IdentityState {
    Pending,
    Resolved,
}

/// Where the latest identity update came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IdentitySource {
    Ensure,
    Status,
    Event,
}

/// Backend/agent identifiers of a session, possibly not confirmed yet
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionIdentity {
    pub state: IdentityState,
    pub source: IdentitySource,
    pub last_updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acp_record_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_session_id: Option<String>,
}

impl SessionIdentity {
    pub fn pending(source: IdentitySource, now: DateTime<Utc>) -> Self {
        Self {
            state: IdentityState::Pending,
            source,
            last_updated_at: now,
            acp_record_id: None,
            backend_session_id: None,
            agent_session_id: None,
        }
    }

    /// True when any backend or agent identifier is present.
    pub fn has_identifier(&self) -> bool {
        self.acp_record_id.is_some()
            || self.backend_session_id.is_some()
            || self.agent_session_id.is_some()
    }
}

/// Activity state of a session as tracked by the control plane
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionRuntimeState {
    #[default]
    Idle,
    Running,
    Error,
}

impl SessionRuntimeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Error => "error",
        }
    }
}

/// ACP metadata persisted per session key
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionAcpMeta {
    pub backend: String,
    pub agent: String,
    pub runtime_session_name: String,
    #[serde(default)]
    pub mode: SessionMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<SessionIdentity>,
    #[serde(default)]
    pub runtime_options: RuntimeOptions,
    #[serde(default)]
    pub state: SessionRuntimeState,
    pub last_activity_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}
