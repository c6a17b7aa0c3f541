//! Error types for acp-relay core
//!
//! Two layers live here:
//! - [`Error`], the crate-wide error enum returned by fallible helpers
//! - [`AcpRuntimeError`], the structured error (stable code, human message,
//!   retryable flag) that crosses every component boundary
//!
//! [`with_error_boundary`] and [`to_acp_runtime_error`] normalize anything else
//! into the structured shape.

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use thiserror::Error;

/// Main error type for acp-relay operations
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Runtime(#[from] AcpRuntimeError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The bare message carried by this error, without the variant prefix.
    pub fn message(&self) -> String {
        match self {
            Error::Runtime(e) => e.message.clone(),
            Error::Config(msg) | Error::Internal(msg) => msg.clone(),
            Error::Io(e) => e.to_string(),
            Error::Json(e) => e.to_string(),
        }
    }
}

/// Stable error codes for the ACP runtime layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AcpErrorCode {
    #[serde(rename = "ACP_SESSION_INIT_FAILED")]
    SessionInitFailed,
    #[serde(rename = "ACP_TURN_FAILED")]
    TurnFailed,
    #[serde(rename = "ACP_BACKEND_MISSING")]
    BackendMissing,
    #[serde(rename = "ACP_BACKEND_UNAVAILABLE")]
    BackendUnavailable,
    #[serde(rename = "ACP_BACKEND_UNSUPPORTED_CONTROL")]
    BackendUnsupportedControl,
    #[serde(rename = "ACP_DISPATCH_DISABLED")]
    DispatchDisabled,
    #[serde(rename = "ACP_INVALID_RUNTIME_OPTION")]
    InvalidRuntimeOption,
}

impl AcpErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionInitFailed => "ACP_SESSION_INIT_FAILED",
            Self::TurnFailed => "ACP_TURN_FAILED",
            Self::BackendMissing => "ACP_BACKEND_MISSING",
            Self::BackendUnavailable => "ACP_BACKEND_UNAVAILABLE",
            Self::BackendUnsupportedControl => "ACP_BACKEND_UNSUPPORTED_CONTROL",
            Self::DispatchDisabled => "ACP_DISPATCH_DISABLED",
            Self::InvalidRuntimeOption => "ACP_INVALID_RUNTIME_OPTION",
        }
    }

    /// Parse a wire code such as `ACP_TURN_FAILED`.
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(raw.trim().to_string())).ok()
    }

    /// Remediation hint shown under a formatted error, if any.
    fn next_step(&self) -> Option<&'static str> {
        match self {
            Self::BackendMissing => {
                Some("Register the backend or point acp.backend at an installed one.")
            }
            Self::BackendUnavailable => Some("Run `/acp doctor` to check the backend install."),
            Self::BackendUnsupportedControl => {
                Some("This backend does not support that control; use its defaults.")
            }
            Self::DispatchDisabled => Some("Enable acp.dispatch or allow this agent in acp.allowedAgents."),
            Self::InvalidRuntimeOption => Some("Check the value and retry the command."),
            Self::SessionInitFailed | Self::TurnFailed => None,
        }
    }
}

impl fmt::Display for AcpErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error crossing ACP component boundaries
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct AcpRuntimeError {
    pub code: AcpErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl AcpRuntimeError {
    pub const NAME: &'static str = "AcpRuntimeError";

    pub fn new(code: AcpErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: None,
        }
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }

    pub fn backend_missing(backend: &str) -> Self {
        Self::new(
            AcpErrorCode::BackendMissing,
            format!("ACP backend \"{}\" is not registered", backend),
        )
        .with_retryable(false)
    }

    pub fn unsupported_control(backend: &str, control: &str) -> Self {
        Self::new(
            AcpErrorCode::BackendUnsupportedControl,
            format!("ACP backend \"{}\" does not support {}", backend, control),
        )
        .with_retryable(false)
    }

    pub fn invalid_option(message: impl Into<String>) -> Self {
        Self::new(AcpErrorCode::InvalidRuntimeOption, message).with_retryable(false)
    }

    pub fn turn_failed(message: impl Into<String>) -> Self {
        Self::new(AcpErrorCode::TurnFailed, message)
    }

    /// Build the error carried by a terminal `error` turn event.
    ///
    /// Unknown or missing codes fall back to `ACP_TURN_FAILED`.
    pub fn from_event_parts(message: &str, code: Option<&str>, retryable: Option<bool>) -> Self {
        let code = code
            .and_then(AcpErrorCode::parse)
            .unwrap_or(AcpErrorCode::TurnFailed);
        let message = if message.trim().is_empty() {
            "ACP turn failed".to_string()
        } else {
            message.to_string()
        };
        Self {
            code,
            message,
            retryable,
        }
    }
}

/// Render a structured error as user-facing text.
pub fn format_acp_runtime_error_text(error: &AcpRuntimeError) -> String {
    let mut text = format!("ACP error ({}): {}", error.code, error.message);
    if let Some(next) = error.code.next_step() {
        text.push_str("\nnext: ");
        text.push_str(next);
    }
    text
}

/// Normalize any error into an [`AcpRuntimeError`] without failing.
///
/// Already-structured errors pass through unchanged; anything else takes the
/// fallback code and keeps its own message when it has one.
pub fn to_acp_runtime_error(
    error: impl Into<Error>,
    fallback_code: AcpErrorCode,
    fallback_message: &str,
) -> AcpRuntimeError {
    match error.into() {
        Error::Runtime(e) => e,
        other => {
            let message = other.message();
            let message = if message.trim().is_empty() {
                fallback_message.to_string()
            } else {
                message
            };
            AcpRuntimeError::new(fallback_code, message)
        }
    }
}

/// Run `run`, converting any failure (including a panic) into an [`AcpRuntimeError`].
pub async fn with_error_boundary<F, T, E>(
    run: F,
    fallback_code: AcpErrorCode,
    fallback_message: &str,
) -> std::result::Result<T, AcpRuntimeError>
where
    F: Future<Output = std::result::Result<T, E>>,
    E: Into<Error>,
{
    match AssertUnwindSafe(run).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(to_acp_runtime_error(error, fallback_code, fallback_message)),
        Err(panic) => {
            let message = panic_message(panic.as_ref())
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| fallback_message.to_string());
            Err(AcpRuntimeError::new(fallback_code, message))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> Option<String> {
    if let Some(s) = payload.downcast_ref::<&str>() {
        Some((*s).to_string())
    } else {
        payload.downcast_ref::<String>().cloned()
    }
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;
