//! Runtime adapter contract
//!
//! Every agent-runtime backend implements [`AcpRuntime`]. Backends are
//! standalone implementations selected by id from a
//! [`RuntimeBackendRegistry`](super::RuntimeBackendRegistry); new ones must
//! pass [`run_adapter_conformance`](super::run_adapter_conformance) before
//! being registered.

use super::stream::{AbortSignal, TurnEventStream};
use crate::error::AcpRuntimeError;
use crate::types::{
    DoctorReport, EnsureSessionInput, PromptMode, RuntimeCapabilities, RuntimeControl,
    RuntimeHandle, RuntimeStatus,
};
use async_trait::async_trait;

/// Result type for adapter operations
pub type RuntimeResult<T> = std::result::Result<T, AcpRuntimeError>;

/// Input to a single turn
#[derive(Debug, Clone)]
pub struct TurnInput {
    pub handle: RuntimeHandle,
    pub text: String,
    pub mode: PromptMode,
    pub request_id: String,
    pub signal: Option<AbortSignal>,
}

impl TurnInput {
    pub fn new(handle: RuntimeHandle, text: impl Into<String>) -> Self {
        Self {
            handle,
            text: text.into(),
            mode: PromptMode::Prompt,
            request_id: uuid::Uuid::new_v4().to_string(),
            signal: None,
        }
    }

    pub fn with_mode(mut self, mode: PromptMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_signal(mut self, signal: Option<AbortSignal>) -> Self {
        self.signal = signal;
        self
    }
}

/// An agent-runtime backend.
///
/// `ensure_session`, `run_turn`, `cancel` and `close` are required. The
/// remaining controls have fail-closed defaults: a backend that does not
/// override them reports `ACP_BACKEND_UNSUPPORTED_CONTROL` instead of
/// silently doing nothing.
#[async_trait]
pub trait AcpRuntime: Send + Sync {
    /// Backend id used for registry lookup
    fn id(&self) -> &str;

    /// Establish (or reuse) the session for `input.session_key`.
    ///
    /// Idempotent while the underlying runtime is alive. The returned handle
    /// echoes the session key and has a non-empty backend and session name.
    async fn ensure_session(&self, input: EnsureSessionInput) -> RuntimeResult<RuntimeHandle>;

    /// Start a turn and return its event stream.
    ///
    /// The stream is finite and single-consumer. If the consumer abandons it,
    /// the adapter is responsible for releasing backend resources.
    async fn run_turn(&self, input: TurnInput) -> RuntimeResult<TurnEventStream>;

    /// Backends that do not override this advertise no controls.
    async fn get_capabilities(
        &self,
        _handle: Option<&RuntimeHandle>,
    ) -> RuntimeResult<RuntimeCapabilities> {
        Ok(RuntimeCapabilities::default())
    }

    async fn get_status(&self, _handle: &RuntimeHandle) -> RuntimeResult<RuntimeStatus> {
        Err(AcpRuntimeError::unsupported_control(
            self.id(),
            RuntimeControl::Status.as_str(),
        ))
    }

    async fn set_mode(&self, _handle: &RuntimeHandle, _mode: &str) -> RuntimeResult<()> {
        Err(AcpRuntimeError::unsupported_control(
            self.id(),
            RuntimeControl::SetMode.as_str(),
        ))
    }

    async fn set_config_option(
        &self,
        _handle: &RuntimeHandle,
        _key: &str,
        _value: &str,
    ) -> RuntimeResult<()> {
        Err(AcpRuntimeError::unsupported_control(
            self.id(),
            RuntimeControl::SetConfigOption.as_str(),
        ))
    }

    /// Environment/installation self-check, independent of any session.
    async fn doctor(&self) -> Option<DoctorReport> {
        None
    }

    /// Best-effort cancel of the active turn. Must not fail if the turn
    /// already completed.
    async fn cancel(&self, handle: &RuntimeHandle, reason: Option<&str>) -> RuntimeResult<()>;

    /// Terminal; the handle must not be reused afterwards.
    async fn close(&self, handle: &RuntimeHandle, reason: &str) -> RuntimeResult<()>;
}
