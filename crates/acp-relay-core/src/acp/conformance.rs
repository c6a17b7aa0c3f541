//! Adapter conformance harness
//!
//! Exercises the [`AcpRuntime`] contract end to end against a fresh adapter.
//! Out-of-tree backends call [`run_adapter_conformance`] from their own tests
//! before they are registered.

use super::traits::{AcpRuntime, TurnInput};
use crate::error::{with_error_boundary, AcpErrorCode, AcpRuntimeError};
use crate::types::{EnsureSessionInput, RuntimeControl, RuntimeHandle, SessionMode, TurnEvent};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Knobs for a conformance run
#[derive(Debug, Clone)]
pub struct ConformanceOptions {
    pub session_key: String,
    pub agent: String,
    pub success_prompt: String,
    /// Prompt expected to fail; the error step is skipped when unset
    pub error_prompt: Option<String>,
    pub canary_mode: String,
    pub canary_config_key: String,
    pub canary_config_value: String,
    pub turn_timeout: Duration,
}

impl Default for ConformanceOptions {
    fn default() -> Self {
        Self {
            session_key: "conformance:session".to_string(),
            agent: "codex".to_string(),
            success_prompt: "conformance ping".to_string(),
            error_prompt: None,
            canary_mode: "conformance".to_string(),
            canary_config_key: "conformance_canary".to_string(),
            canary_config_value: "1".to_string(),
            turn_timeout: Duration::from_secs(30),
        }
    }
}

/// What a passing run observed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConformanceReport {
    pub backend: String,
    pub success_events: usize,
    pub status_probed: bool,
    pub mode_set: bool,
    pub config_set: bool,
    /// The structured error observed by the error step, if it ran
    pub error: Option<AcpRuntimeError>,
}

/// First contract violation found
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("conformance step \"{step}\" failed: {reason}")]
pub struct ConformanceFailure {
    pub step: &'static str,
    pub reason: String,
}

impl ConformanceFailure {
    fn new(step: &'static str, reason: impl Into<String>) -> Self {
        Self {
            step,
            reason: reason.into(),
        }
    }
}

type StepResult<T> = std::result::Result<T, ConformanceFailure>;

/// Collect a turn's events, or the error that prevented it from starting.
async fn collect_turn(
    runtime: &dyn AcpRuntime,
    handle: &RuntimeHandle,
    text: &str,
    timeout: Duration,
    step: &'static str,
) -> StepResult<std::result::Result<Vec<TurnEvent>, AcpRuntimeError>> {
    let run = async {
        let stream = runtime
            .run_turn(TurnInput::new(handle.clone(), text))
            .await?;
        Ok::<_, AcpRuntimeError>(stream.collect::<Vec<_>>().await)
    };
    match tokio::time::timeout(
        timeout,
        with_error_boundary(run, AcpErrorCode::TurnFailed, "ACP turn failed"),
    )
    .await
    {
        Ok(result) => Ok(result),
        Err(_) => Err(ConformanceFailure::new(
            step,
            format!("turn did not finish within {:?}", timeout),
        )),
    }
}

async fn ensure_step(runtime: &dyn AcpRuntime, options: &ConformanceOptions) -> StepResult<RuntimeHandle> {
    let input = EnsureSessionInput::new(options.session_key.clone(), options.agent.clone())
        .with_mode(SessionMode::Persistent);
    let handle = runtime
        .ensure_session(input)
        .await
        .map_err(|e| ConformanceFailure::new("ensure_session", e.to_string()))?;

    if handle.session_key != options.session_key {
        return Err(ConformanceFailure::new(
            "ensure_session",
            format!(
                "handle session key \"{}\" does not echo \"{}\"",
                handle.session_key, options.session_key
            ),
        ));
    }
    if handle.backend.trim().is_empty() {
        return Err(ConformanceFailure::new("ensure_session", "handle backend is empty"));
    }
    if handle.runtime_session_name.trim().is_empty() {
        return Err(ConformanceFailure::new(
            "ensure_session",
            "handle runtime session name is empty",
        ));
    }
    Ok(handle)
}

async fn success_step(
    runtime: &dyn AcpRuntime,
    handle: &RuntimeHandle,
    options: &ConformanceOptions,
) -> StepResult<usize> {
    let events = collect_turn(
        runtime,
        handle,
        &options.success_prompt,
        options.turn_timeout,
        "success_turn",
    )
    .await?
    .map_err(|e| ConformanceFailure::new("success_turn", e.to_string()))?;

    let observed = events.iter().any(|event| {
        matches!(
            event,
            TurnEvent::Done { .. }
                | TurnEvent::TextDelta { .. }
                | TurnEvent::Status { .. }
                | TurnEvent::ToolCall { .. }
        )
    });
    if !observed {
        return Err(ConformanceFailure::new(
            "success_turn",
            "no done, text_delta, status or tool_call event observed",
        ));
    }
    if events.iter().filter(|e| e.is_terminal()).count() > 1 {
        return Err(ConformanceFailure::new(
            "success_turn",
            "more than one terminal event yielded",
        ));
    }
    Ok(events.len())
}

async fn controls_step(
    runtime: &dyn AcpRuntime,
    handle: &RuntimeHandle,
    options: &ConformanceOptions,
    report: &mut ConformanceReport,
) -> StepResult<()> {
    let capabilities = runtime
        .get_capabilities(Some(handle))
        .await
        .map_err(|e| ConformanceFailure::new("capabilities", e.to_string()))?;

    if capabilities.supports(RuntimeControl::Status) {
        runtime
            .get_status(handle)
            .await
            .map_err(|e| ConformanceFailure::new("get_status", e.to_string()))?;
        report.status_probed = true;
    }
    if capabilities.supports(RuntimeControl::SetMode) {
        runtime
            .set_mode(handle, &options.canary_mode)
            .await
            .map_err(|e| ConformanceFailure::new("set_mode", e.to_string()))?;
        report.mode_set = true;
    }
    if capabilities.supports(RuntimeControl::SetConfigOption) {
        // Strict backends only accept advertised keys; probe with the first one.
        let key = match &capabilities.config_option_keys {
            Some(keys) if !keys.is_empty() => keys[0].clone(),
            _ => options.canary_config_key.clone(),
        };
        runtime
            .set_config_option(handle, &key, &options.canary_config_value)
            .await
            .map_err(|e| ConformanceFailure::new("set_config_option", e.to_string()))?;
        report.config_set = true;
    }
    Ok(())
}

async fn error_step(
    runtime: &dyn AcpRuntime,
    handle: &RuntimeHandle,
    prompt: &str,
    timeout: Duration,
) -> StepResult<AcpRuntimeError> {
    let error = match collect_turn(runtime, handle, prompt, timeout, "error_turn").await? {
        Err(error) => error,
        Ok(events) => events
            .into_iter()
            .find_map(|event| match event {
                TurnEvent::Error {
                    message,
                    code,
                    retryable,
                } => Some(AcpRuntimeError::from_event_parts(
                    &message,
                    code.as_deref(),
                    retryable,
                )),
                _ => None,
            })
            .ok_or_else(|| {
                ConformanceFailure::new("error_turn", "neither an error nor an error event observed")
            })?,
    };

    if error.code.as_str().is_empty() || error.message.trim().is_empty() {
        return Err(ConformanceFailure::new(
            "error_turn",
            "structured error has an empty code or message",
        ));
    }
    Ok(error)
}

/// Run the contract checks against a fresh adapter from `factory`.
///
/// Steps: establish a persistent session, run a success turn, probe the
/// advertised controls, optionally run an error turn. `cancel` then `close`
/// run at the end whatever happened before; their failures are reported only
/// when every earlier step passed.
pub async fn run_adapter_conformance<F>(
    factory: F,
    options: ConformanceOptions,
) -> StepResult<ConformanceReport>
where
    F: Fn() -> Arc<dyn AcpRuntime>,
{
    let runtime = factory();
    let mut report = ConformanceReport {
        backend: runtime.id().to_string(),
        ..ConformanceReport::default()
    };
    debug!("Running adapter conformance for backend {}", report.backend);

    let handle = ensure_step(runtime.as_ref(), &options).await?;

    let outcome: StepResult<()> = async {
        report.success_events = success_step(runtime.as_ref(), &handle, &options).await?;
        controls_step(runtime.as_ref(), &handle, &options, &mut report).await?;
        if let Some(prompt) = &options.error_prompt {
            report.error =
                Some(error_step(runtime.as_ref(), &handle, prompt, options.turn_timeout).await?);
        }
        Ok(())
    }
    .await;

    let cancelled = runtime
        .cancel(&handle, Some("conformance"))
        .await
        .map_err(|e| ConformanceFailure::new("cancel", e.to_string()));
    let closed = runtime
        .close(&handle, "conformance")
        .await
        .map_err(|e| ConformanceFailure::new("close", e.to_string()));

    if let Err(failure) = &outcome {
        warn!("Adapter {} failed conformance: {}", report.backend, failure);
    }
    outcome?;
    cancelled?;
    closed?;
    Ok(report)
}
