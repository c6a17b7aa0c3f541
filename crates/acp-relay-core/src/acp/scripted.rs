//! In-process scripted backend
//!
//! Plays back canned event sequences keyed by prompt text and echoes anything
//! else. Used by the CLI demo, the conformance harness and tests; it honours
//! the full adapter contract (cancellation, close, controls, status).

use super::stream::{
    aborted_either, turn_channel, AbortController, CANCELLED_STOP_REASON, DEFAULT_TURN_BUFFER,
};
use super::traits::{AcpRuntime, RuntimeResult, TurnInput};
use super::TurnEventStream;
use crate::error::{AcpErrorCode, AcpRuntimeError};
use crate::types::{
    DoctorReport, EnsureSessionInput, RuntimeCapabilities, RuntimeControl, RuntimeHandle,
    RuntimeStatus, TurnEvent,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug)]
struct ScriptedSession {
    handle: RuntimeHandle,
    closed: bool,
    mode: Option<String>,
    config: BTreeMap<String, String>,
    completed_turns: u64,
    active: Option<Arc<AbortController>>,
}

#[derive(Debug, Default)]
struct ScriptedState {
    sessions: HashMap<String, ScriptedSession>,
    prompts: Vec<String>,
    next_session: u64,
}

/// Backend that replays scripted turns
///
/// Clones share session state, so a test can keep one to inspect prompts.
#[derive(Debug, Clone)]
pub struct ScriptedRuntime {
    id: String,
    scripts: HashMap<String, Vec<TurnEvent>>,
    event_delay: Option<Duration>,
    capabilities: RuntimeCapabilities,
    state: Arc<Mutex<ScriptedState>>,
}

impl ScriptedRuntime {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            scripts: HashMap::new(),
            event_delay: None,
            capabilities: RuntimeCapabilities::with_controls([
                RuntimeControl::SetMode,
                RuntimeControl::SetConfigOption,
                RuntimeControl::Status,
            ]),
            state: Arc::new(Mutex::new(ScriptedState::default())),
        }
    }

    /// Play `events` whenever the (trimmed) prompt equals `prompt`
    pub fn on_prompt(mut self, prompt: impl Into<String>, events: Vec<TurnEvent>) -> Self {
        self.scripts.insert(prompt.into().trim().to_string(), events);
        self
    }

    /// Wait this long before each event
    pub fn with_event_delay(mut self, delay: Duration) -> Self {
        self.event_delay = Some(delay);
        self
    }

    pub fn with_capabilities(mut self, capabilities: RuntimeCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Prompts received so far, in order
    pub fn prompts(&self) -> Vec<String> {
        self.state.lock().prompts.clone()
    }

    /// Mode last applied to the session, if any
    pub fn session_mode(&self, session_key: &str) -> Option<String> {
        self.state
            .lock()
            .sessions
            .get(session_key)
            .and_then(|s| s.mode.clone())
    }

    /// Config options applied to the session
    pub fn session_config(&self, session_key: &str) -> BTreeMap<String, String> {
        self.state
            .lock()
            .sessions
            .get(session_key)
            .map(|s| s.config.clone())
            .unwrap_or_default()
    }

    /// Number of sessions that are open
    pub fn open_sessions(&self) -> usize {
        self.state
            .lock()
            .sessions
            .values()
            .filter(|s| !s.closed)
            .count()
    }

    fn script_for(&self, text: &str) -> Vec<TurnEvent> {
        match self.scripts.get(text.trim()) {
            Some(events) => events.clone(),
            None => vec![TurnEvent::output(text), TurnEvent::done_with_reason("end_turn")],
        }
    }

    fn with_open_session<T>(
        &self,
        handle: &RuntimeHandle,
        f: impl FnOnce(&mut ScriptedSession) -> RuntimeResult<T>,
    ) -> RuntimeResult<T> {
        let mut state = self.state.lock();
        match state.sessions.get_mut(&handle.session_key) {
            Some(session)
                if !session.closed
                    && session.handle.runtime_session_name == handle.runtime_session_name =>
            {
                f(session)
            }
            _ => Err(AcpRuntimeError::new(
                AcpErrorCode::TurnFailed,
                format!(
                    "ACP session \"{}\" is not open on backend \"{}\"",
                    handle.session_key, self.id
                ),
            )
            .with_retryable(false)),
        }
    }
}

fn record_completed_turn(state: &Mutex<ScriptedState>, session_key: &str) {
    let mut state = state.lock();
    if let Some(session) = state.sessions.get_mut(session_key) {
        session.completed_turns += 1;
        if session.handle.agent_session_id.is_none() {
            session.handle.agent_session_id = Some(uuid::Uuid::new_v4().to_string());
        }
    }
}

#[async_trait]
impl AcpRuntime for ScriptedRuntime {
    fn id(&self) -> &str {
        &self.id
    }

    async fn ensure_session(&self, input: EnsureSessionInput) -> RuntimeResult<RuntimeHandle> {
        let session_key = input.session_key.trim().to_string();
        if session_key.is_empty() {
            return Err(AcpRuntimeError::new(
                AcpErrorCode::SessionInitFailed,
                "ACP session key is required",
            ));
        }

        let mut state = self.state.lock();
        if let Some(session) = state.sessions.get(&session_key) {
            if !session.closed {
                return Ok(session.handle.clone());
            }
        }

        state.next_session += 1;
        let agent = if input.agent.trim().is_empty() {
            self.id.as_str()
        } else {
            input.agent.trim()
        };
        let mut handle = RuntimeHandle::new(
            session_key.clone(),
            self.id.clone(),
            format!("{}-{}", agent, state.next_session),
        );
        handle.cwd = input.cwd.clone();
        handle.backend_session_id = Some(uuid::Uuid::new_v4().to_string());
        handle.acp_record_id = Some(format!("rec-{}", state.next_session));

        debug!(
            "Scripted session established: {} ({})",
            session_key, handle.runtime_session_name
        );
        state.sessions.insert(
            session_key,
            ScriptedSession {
                handle: handle.clone(),
                closed: false,
                mode: None,
                config: BTreeMap::new(),
                completed_turns: 0,
                active: None,
            },
        );
        Ok(handle)
    }

    async fn run_turn(&self, input: TurnInput) -> RuntimeResult<TurnEventStream> {
        let controller = Arc::new(AbortController::new());
        self.with_open_session(&input.handle, |session| {
            session.active = Some(controller.clone());
            Ok(())
        })?;
        self.state.lock().prompts.push(input.text.clone());

        let events = self.script_for(&input.text);
        let delay = self.event_delay;
        let state = self.state.clone();
        let session_key = input.handle.session_key.clone();
        let external = input.signal.clone();
        let internal = controller.signal();
        let own = controller.clone();
        let (tx, stream) = turn_channel(DEFAULT_TURN_BUFFER);

        tokio::spawn(async move {
            for event in events {
                let is_done = matches!(event, TurnEvent::Done { .. });
                let is_terminal = event.is_terminal();
                let send = async {
                    if let Some(delay) = delay {
                        tokio::time::sleep(delay).await;
                    }
                    // Record completion before `done` is observable so a status
                    // probe right after the turn sees the agent session id.
                    if is_done {
                        record_completed_turn(&state, &session_key);
                    }
                    tx.send(event).await
                };

                tokio::select! {
                    biased;
                    _ = aborted_either(&internal, external.as_ref()) => {
                        let _ = tx.send(TurnEvent::done_with_reason(CANCELLED_STOP_REASON)).await;
                        break;
                    }
                    _ = tx.closed() => break,
                    sent = send => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }

                if is_terminal {
                    break;
                }
            }

            let mut state = state.lock();
            if let Some(session) = state.sessions.get_mut(&session_key) {
                if session.active.as_ref().is_some_and(|a| Arc::ptr_eq(a, &own)) {
                    session.active = None;
                }
            }
        });

        Ok(stream)
    }

    async fn get_capabilities(
        &self,
        _handle: Option<&RuntimeHandle>,
    ) -> RuntimeResult<RuntimeCapabilities> {
        Ok(self.capabilities.clone())
    }

    async fn get_status(&self, handle: &RuntimeHandle) -> RuntimeResult<RuntimeStatus> {
        if !self.capabilities.supports(RuntimeControl::Status) {
            return Err(AcpRuntimeError::unsupported_control(
                &self.id,
                RuntimeControl::Status.as_str(),
            ));
        }
        self.with_open_session(handle, |session| {
            let mode = session.mode.as_deref().unwrap_or("default");
            Ok(RuntimeStatus {
                summary: Some(format!(
                    "mode={} turns={}",
                    mode, session.completed_turns
                )),
                acp_record_id: session.handle.acp_record_id.clone(),
                backend_session_id: session.handle.backend_session_id.clone(),
                agent_session_id: session.handle.agent_session_id.clone(),
                details: Some(serde_json::json!({
                    "mode": session.mode,
                    "config": session.config,
                    "completedTurns": session.completed_turns,
                })),
            })
        })
    }

    async fn set_mode(&self, handle: &RuntimeHandle, mode: &str) -> RuntimeResult<()> {
        if !self.capabilities.supports(RuntimeControl::SetMode) {
            return Err(AcpRuntimeError::unsupported_control(
                &self.id,
                RuntimeControl::SetMode.as_str(),
            ));
        }
        let mode = mode.trim();
        if mode.is_empty() {
            return Err(AcpRuntimeError::invalid_option("Runtime mode must not be empty"));
        }
        self.with_open_session(handle, |session| {
            session.mode = Some(mode.to_string());
            Ok(())
        })
    }

    async fn set_config_option(
        &self,
        handle: &RuntimeHandle,
        key: &str,
        value: &str,
    ) -> RuntimeResult<()> {
        if !self.capabilities.supports(RuntimeControl::SetConfigOption) {
            return Err(AcpRuntimeError::unsupported_control(
                &self.id,
                RuntimeControl::SetConfigOption.as_str(),
            ));
        }
        if !self.capabilities.accepts_config_key(key) {
            return Err(AcpRuntimeError::invalid_option(format!(
                "Backend \"{}\" does not accept config option \"{}\"",
                self.id, key
            )));
        }
        self.with_open_session(handle, |session| {
            session.config.insert(key.to_string(), value.to_string());
            Ok(())
        })
    }

    async fn doctor(&self) -> Option<DoctorReport> {
        Some(DoctorReport::ok(format!("scripted backend \"{}\" ready", self.id)))
    }

    async fn cancel(&self, handle: &RuntimeHandle, reason: Option<&str>) -> RuntimeResult<()> {
        let mut state = self.state.lock();
        if let Some(controller) = state
            .sessions
            .get_mut(&handle.session_key)
            .and_then(|s| s.active.take())
        {
            debug!(
                "Cancelling scripted turn for {} ({})",
                handle.session_key,
                reason.unwrap_or("no reason")
            );
            controller.abort();
        }
        Ok(())
    }

    async fn close(&self, handle: &RuntimeHandle, reason: &str) -> RuntimeResult<()> {
        let mut state = self.state.lock();
        if let Some(session) = state.sessions.get_mut(&handle.session_key) {
            if session.handle.runtime_session_name == handle.runtime_session_name {
                debug!("Closing scripted session {}: {}", handle.session_key, reason);
                if let Some(active) = session.active.take() {
                    active.abort();
                }
                session.closed = true;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use pretty_assertions::assert_eq;

    async fn collect(stream: TurnEventStream) -> Vec<TurnEvent> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_default_turn_echoes_prompt() {
        let runtime = ScriptedRuntime::new("scripted");
        let handle = runtime
            .ensure_session(EnsureSessionInput::new("s1", "codex"))
            .await
            .unwrap();
        assert_eq!(handle.backend, "scripted");
        assert!(handle.runtime_session_name.starts_with("codex-"));

        let events = collect(runtime.run_turn(TurnInput::new(handle, "ping")).await.unwrap()).await;
        assert_eq!(
            events,
            vec![TurnEvent::output("ping"), TurnEvent::done_with_reason("end_turn")]
        );
        assert_eq!(runtime.prompts(), vec!["ping".to_string()]);
    }

    #[tokio::test]
    async fn test_ensure_session_is_idempotent() {
        let runtime = ScriptedRuntime::new("scripted");
        let a = runtime.ensure_session(EnsureSessionInput::new("s1", "codex")).await.unwrap();
        let b = runtime.ensure_session(EnsureSessionInput::new("s1", "codex")).await.unwrap();
        assert_eq!(a, b);

        runtime.close(&a, "test").await.unwrap();
        let c = runtime.ensure_session(EnsureSessionInput::new("s1", "codex")).await.unwrap();
        assert_ne!(a.runtime_session_name, c.runtime_session_name);
    }

    #[tokio::test]
    async fn test_scripted_turn_and_agent_id_after_completion() {
        let runtime = ScriptedRuntime::new("scripted").on_prompt(
            "hello",
            vec![TurnEvent::output("hi "), TurnEvent::output("there"), TurnEvent::done()],
        );
        let handle = runtime.ensure_session(EnsureSessionInput::new("s1", "codex")).await.unwrap();
        assert!(handle.agent_session_id.is_none());

        let events = collect(runtime.run_turn(TurnInput::new(handle.clone(), "hello")).await.unwrap()).await;
        assert_eq!(events.len(), 3);

        let status = runtime.get_status(&handle).await.unwrap();
        assert!(status.agent_session_id.is_some());
        assert_eq!(status.backend_session_id, handle.backend_session_id);
    }

    #[tokio::test]
    async fn test_cancel_stops_turn() {
        let runtime = ScriptedRuntime::new("scripted")
            .on_prompt(
                "slow",
                vec![TurnEvent::output("a"), TurnEvent::output("b"), TurnEvent::done()],
            )
            .with_event_delay(Duration::from_millis(50));
        let handle = runtime.ensure_session(EnsureSessionInput::new("s1", "codex")).await.unwrap();

        let mut stream = runtime.run_turn(TurnInput::new(handle.clone(), "slow")).await.unwrap();
        assert_eq!(stream.next().await, Some(TurnEvent::output("a")));
        runtime.cancel(&handle, Some("user")).await.unwrap();

        let rest: Vec<_> = stream.collect().await;
        assert_eq!(rest, vec![TurnEvent::done_with_reason(CANCELLED_STOP_REASON)]);

        assert!(runtime.state.lock().sessions["s1"].active.is_none());

        // Cancelling an idle session is fine.
        runtime.cancel(&handle, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_external_signal_aborts_turn() {
        let runtime = ScriptedRuntime::new("scripted")
            .on_prompt("slow", vec![TurnEvent::output("a"), TurnEvent::done()])
            .with_event_delay(Duration::from_millis(50));
        let handle = runtime.ensure_session(EnsureSessionInput::new("s1", "codex")).await.unwrap();
        let controller = AbortController::new();
        controller.abort();

        let stream = runtime
            .run_turn(TurnInput::new(handle, "slow").with_signal(Some(controller.signal())))
            .await
            .unwrap();
        let events = collect(stream).await;
        assert_eq!(events, vec![TurnEvent::done_with_reason(CANCELLED_STOP_REASON)]);
    }

    #[tokio::test]
    async fn test_closed_session_rejects_turns() {
        let runtime = ScriptedRuntime::new("scripted");
        let handle = runtime.ensure_session(EnsureSessionInput::new("s1", "codex")).await.unwrap();
        runtime.close(&handle, "done").await.unwrap();
        assert_eq!(runtime.open_sessions(), 0);

        let err = runtime.run_turn(TurnInput::new(handle, "x")).await.err().unwrap();
        assert_eq!(err.code, AcpErrorCode::TurnFailed);
    }

    #[tokio::test]
    async fn test_controls_are_recorded() {
        let runtime = ScriptedRuntime::new("scripted");
        let handle = runtime.ensure_session(EnsureSessionInput::new("s1", "codex")).await.unwrap();

        runtime.set_mode(&handle, "plan").await.unwrap();
        runtime.set_config_option(&handle, "model", "gpt-5").await.unwrap();

        assert_eq!(runtime.session_mode("s1").as_deref(), Some("plan"));
        assert_eq!(runtime.session_config("s1").get("model").map(String::as_str), Some("gpt-5"));
    }

    #[tokio::test]
    async fn test_restricted_capabilities_fail_closed() {
        let runtime = ScriptedRuntime::new("scripted")
            .with_capabilities(RuntimeCapabilities::with_controls([RuntimeControl::Status]));
        let handle = runtime.ensure_session(EnsureSessionInput::new("s1", "codex")).await.unwrap();

        let err = runtime.set_mode(&handle, "plan").await.unwrap_err();
        assert_eq!(err.code, AcpErrorCode::BackendUnsupportedControl);
    }
}
