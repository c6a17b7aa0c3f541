//! Per-message outcome recording

use crate::error::AcpRuntimeError;
use tracing::{debug, info, warn};

/// How one inbound message ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed { reason: Option<String> },
    Aborted,
    Failed { error: AcpRuntimeError },
}

impl TurnOutcome {
    pub fn completed() -> Self {
        Self::Completed { reason: None }
    }

    pub fn completed_with_reason(reason: impl Into<String>) -> Self {
        Self::Completed {
            reason: Some(reason.into()),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Aborted => "aborted",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Message-processing bookkeeping owned by the host
pub trait DispatchDiagnostics: Send + Sync {
    fn record_processed(&self, session_key: &str, outcome: &TurnOutcome);

    /// The session is free for the next message.
    fn mark_idle(&self, session_key: &str);
}

/// Diagnostics that only log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnostics;

impl DispatchDiagnostics for TracingDiagnostics {
    fn record_processed(&self, session_key: &str, outcome: &TurnOutcome) {
        match outcome {
            TurnOutcome::Completed { reason: Some(reason) } => {
                info!("ACP message for {} completed ({})", session_key, reason)
            }
            TurnOutcome::Completed { reason: None } => {
                info!("ACP message for {} completed", session_key)
            }
            TurnOutcome::Aborted => info!("ACP message for {} aborted", session_key),
            TurnOutcome::Failed { error } => {
                warn!("ACP message for {} failed: {}", session_key, error)
            }
        }
    }

    fn mark_idle(&self, session_key: &str) {
        debug!("ACP session {} idle", session_key);
    }
}
