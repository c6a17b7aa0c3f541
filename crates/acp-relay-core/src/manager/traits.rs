//! Control-plane session manager contract
//!
//! The dispatcher and the `/acp` command handlers only talk to the control
//! plane through [`SessionManager`].

use crate::acp::{AbortSignal, RuntimeOptions, RuntimeResult};
use crate::error::AcpRuntimeError;
use crate::types::{
    DoctorReport, PromptMode, RuntimeCapabilities, RuntimeStatus, SessionAcpMeta,
    SessionIdentity, SessionRuntimeState, TurnEvent,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result of resolving a session key
#[derive(Debug, Clone, PartialEq)]
pub enum SessionResolution {
    /// No ACP binding for this key
    None,
    Ready { meta: SessionAcpMeta },
    /// Bound, but the binding can't be served (e.g. backend gone)
    Stale {
        meta: SessionAcpMeta,
        error: AcpRuntimeError,
    },
}

impl SessionResolution {
    pub fn meta(&self) -> Option<&SessionAcpMeta> {
        match self {
            Self::None => None,
            Self::Ready { meta } | Self::Stale { meta, .. } => Some(meta),
        }
    }
}

/// Receives a turn's events as they arrive
#[async_trait]
pub trait TurnEventHandler: Send {
    async fn on_event(&mut self, event: TurnEvent);
}

/// One turn submitted to the manager
#[derive(Debug, Clone)]
pub struct ManagerTurnRequest {
    pub session_key: String,
    pub text: String,
    pub mode: PromptMode,
    pub request_id: String,
    pub signal: Option<AbortSignal>,
}

impl ManagerTurnRequest {
    pub fn new(session_key: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            session_key: session_key.into(),
            text: text.into(),
            mode: PromptMode::Prompt,
            request_id: uuid::Uuid::new_v4().to_string(),
            signal: None,
        }
    }

    pub fn with_signal(mut self, signal: Option<AbortSignal>) -> Self {
        self.signal = signal;
        self
    }
}

/// Live view of a session for `/acp status`
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatusReport {
    pub session_key: String,
    pub backend: String,
    pub agent: String,
    pub runtime_session_name: String,
    pub state: SessionRuntimeState,
    pub runtime_options: RuntimeOptions,
    pub identity: Option<SessionIdentity>,
    /// `None` while no runtime is cached for the session
    pub capabilities: Option<RuntimeCapabilities>,
    pub runtime_status: Option<RuntimeStatus>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnCounters {
    pub queue_depth: usize,
    pub active: usize,
    pub completed: u64,
    pub failed: u64,
    pub average_latency_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeCacheSnapshot {
    pub active_sessions: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservabilitySnapshot {
    pub turns: TurnCounters,
    pub runtime_cache: RuntimeCacheSnapshot,
}

/// Control plane consumed by the dispatcher.
///
/// Implementations serialize turns per session key, own the runtime cache and
/// persist runtime options and identity metadata.
#[async_trait]
pub trait SessionManager: Send + Sync {
    async fn resolve_session(&self, session_key: &str) -> SessionResolution;

    /// Run one turn, forwarding every event to `handler`.
    ///
    /// A terminal `error` event is forwarded and then returned as `Err`.
    async fn run_turn(
        &self,
        request: ManagerTurnRequest,
        handler: &mut dyn TurnEventHandler,
    ) -> RuntimeResult<()>;

    async fn get_session_status(&self, session_key: &str) -> RuntimeResult<SessionStatusReport>;

    async fn set_session_runtime_mode(
        &self,
        session_key: &str,
        mode: &str,
    ) -> RuntimeResult<RuntimeOptions>;

    async fn update_session_runtime_options(
        &self,
        session_key: &str,
        patch: RuntimeOptions,
    ) -> RuntimeResult<RuntimeOptions>;

    async fn set_session_config_option(
        &self,
        session_key: &str,
        key: &str,
        value: &str,
    ) -> RuntimeResult<RuntimeOptions>;

    async fn reset_session_runtime_options(&self, session_key: &str)
        -> RuntimeResult<RuntimeOptions>;

    async fn cancel_session(&self, session_key: &str, reason: &str) -> RuntimeResult<()>;

    async fn close_session(&self, session_key: &str, reason: &str) -> RuntimeResult<()>;

    fn observability_snapshot(&self) -> ObservabilitySnapshot;

    /// Doctor reports for the session's backend, or every backend when no
    /// session is given.
    async fn doctor(&self, session_key: Option<&str>) -> Vec<(String, DoctorReport)>;
}
