//! Subprocess backend speaking newline-delimited JSON
//!
//! Each turn spawns the configured command, writes one JSON request line to
//! its stdin and reads [`TurnEvent`] JSON lines from its stdout until a
//! terminal event arrives. stderr is drained so the child can't block on a
//! full pipe.

use super::stream::{
    aborted_either, turn_channel, AbortController, AbortSignal, TurnEventSender,
    CANCELLED_STOP_REASON, DEFAULT_TURN_BUFFER,
};
use super::traits::{AcpRuntime, RuntimeResult, TurnInput};
use super::TurnEventStream;
use crate::error::{AcpErrorCode, AcpRuntimeError};
use crate::types::{DoctorReport, EnsureSessionInput, RuntimeHandle, TurnEvent};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tracing::{debug, trace, warn};

/// Configuration of a subprocess backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProcessBackendConfig {
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_command: Option<String>,
}

impl ProcessBackendConfig {
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_install_command(mut self, install: impl Into<String>) -> Self {
        self.install_command = Some(install.into());
        self
    }
}

/// Request line written to the child's stdin
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TurnRequestLine<'a> {
    session_key: &'a str,
    session_name: &'a str,
    agent: &'a str,
    text: &'a str,
    mode: &'a str,
    request_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    cwd: Option<&'a str>,
}

#[derive(Debug)]
struct ProcessSession {
    handle: RuntimeHandle,
    agent: String,
    env: HashMap<String, String>,
    closed: bool,
    active: Option<Arc<AbortController>>,
}

/// Backend that runs one subprocess per turn
#[derive(Debug)]
pub struct ProcessRuntime {
    config: ProcessBackendConfig,
    sessions: Mutex<HashMap<String, ProcessSession>>,
}

impl ProcessRuntime {
    pub fn new(config: ProcessBackendConfig) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ProcessBackendConfig {
        &self.config
    }

    fn spawn_child(
        &self,
        cwd: Option<&str>,
        env: &HashMap<String, String>,
    ) -> RuntimeResult<Child> {
        debug!(
            "Spawning ACP backend {}: {} {:?} (cwd: {:?})",
            self.config.id, self.config.command, self.config.args, cwd
        );

        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .envs(&self.config.env)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        cmd.spawn().map_err(|e| {
            AcpRuntimeError::new(
                AcpErrorCode::BackendUnavailable,
                format!(
                    "Failed to spawn ACP backend \"{}\" ({}): {}",
                    self.config.id, self.config.command, e
                ),
            )
            .with_retryable(true)
        })
    }
}

fn command_on_path(command: &str) -> bool {
    let path = Path::new(command);
    if path.components().count() > 1 {
        return path.is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(command).is_file()))
        .unwrap_or(false)
}

fn missing_pipe(backend: &str, pipe: &str) -> AcpRuntimeError {
    AcpRuntimeError::new(
        AcpErrorCode::BackendUnavailable,
        format!("ACP backend \"{}\": failed to capture {}", backend, pipe),
    )
}

fn incomplete_turn(message: String) -> TurnEvent {
    TurnEvent::Error {
        message,
        code: Some(AcpErrorCode::TurnFailed.as_str().to_string()),
        retryable: None,
    }
}

async fn drain_stderr(backend: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    debug!("ACP backend {} stderr: {}", backend, trimmed);
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Error reading ACP backend {} stderr: {}", backend, e);
                break;
            }
        }
    }
}

/// Forward events from the child's stdout until a terminal event, EOF,
/// cancellation or the consumer going away.
async fn pump_events(
    backend: String,
    mut child: Child,
    tx: TurnEventSender,
    own: Arc<AbortController>,
    caller: Option<AbortSignal>,
) {
    let Some(stdout) = child.stdout.take() else {
        let _ = tx
            .send(incomplete_turn(format!("ACP backend \"{}\" has no stdout", backend)))
            .await;
        return;
    };
    let own_signal = own.signal();
    let mut lines = BufReader::new(stdout).lines();

    loop {
        tokio::select! {
            biased;
            _ = aborted_either(&own_signal, caller.as_ref()) => {
                let _ = child.start_kill();
                let _ = tx.send(TurnEvent::done_with_reason(CANCELLED_STOP_REASON)).await;
                break;
            }
            _ = tx.closed() => {
                debug!("Turn stream for {} dropped; stopping backend", backend);
                let _ = child.start_kill();
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    trace!("ACP backend {} stdout: {}", backend, trimmed);
                    let event = match serde_json::from_str::<TurnEvent>(trimmed) {
                        Ok(event) => event,
                        Err(e) => {
                            debug!("Ignoring non-event line from {}: {}", backend, e);
                            continue;
                        }
                    };
                    let terminal = event.is_terminal();
                    if tx.send(event).await.is_err() || terminal {
                        let _ = child.start_kill();
                        break;
                    }
                }
                Ok(None) => {
                    let status = child.wait().await;
                    let detail = match status {
                        Ok(status) => status.to_string(),
                        Err(e) => e.to_string(),
                    };
                    let _ = tx
                        .send(incomplete_turn(format!(
                            "ACP backend \"{}\" exited before finishing the turn ({})",
                            backend, detail
                        )))
                        .await;
                    break;
                }
                Err(e) => {
                    let _ = child.start_kill();
                    let _ = tx
                        .send(incomplete_turn(format!(
                            "Failed to read from ACP backend \"{}\": {}",
                            backend, e
                        )))
                        .await;
                    break;
                }
            }
        }
    }

    let _ = child.wait().await;
}

#[async_trait]
impl AcpRuntime for ProcessRuntime {
    fn id(&self) -> &str {
        &self.config.id
    }

    async fn ensure_session(&self, input: EnsureSessionInput) -> RuntimeResult<RuntimeHandle> {
        let session_key = input.session_key.trim().to_string();
        if session_key.is_empty() {
            return Err(AcpRuntimeError::new(
                AcpErrorCode::SessionInitFailed,
                "ACP session key is required",
            ));
        }

        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.get(&session_key) {
            if !session.closed {
                return Ok(session.handle.clone());
            }
        }

        let agent = if input.agent.trim().is_empty() {
            self.config.id.clone()
        } else {
            input.agent.trim().to_string()
        };
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let mut handle = RuntimeHandle::new(
            session_key.clone(),
            self.config.id.clone(),
            format!("{}:{}", agent, &suffix[..8]),
        );
        handle.cwd = input.cwd.clone();

        sessions.insert(
            session_key,
            ProcessSession {
                handle: handle.clone(),
                agent,
                env: input.env,
                closed: false,
                active: None,
            },
        );
        Ok(handle)
    }

    async fn run_turn(&self, input: TurnInput) -> RuntimeResult<TurnEventStream> {
        let controller = Arc::new(AbortController::new());
        let (agent, env) = {
            let mut sessions = self.sessions.lock();
            match sessions.get_mut(&input.handle.session_key) {
                Some(session)
                    if !session.closed
                        && session.handle.runtime_session_name
                            == input.handle.runtime_session_name =>
                {
                    session.active = Some(controller.clone());
                    (session.agent.clone(), session.env.clone())
                }
                _ => {
                    return Err(AcpRuntimeError::turn_failed(format!(
                        "ACP session \"{}\" is not open on backend \"{}\"",
                        input.handle.session_key, self.config.id
                    ))
                    .with_retryable(false))
                }
            }
        };

        let mut child = self.spawn_child(input.handle.cwd.as_deref(), &env)?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| missing_pipe(&self.config.id, "stdin"))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_stderr(self.config.id.clone(), stderr));
        }

        let request = TurnRequestLine {
            session_key: &input.handle.session_key,
            session_name: &input.handle.runtime_session_name,
            agent: &agent,
            text: &input.text,
            mode: input.mode.as_str(),
            request_id: &input.request_id,
            cwd: input.handle.cwd.as_deref(),
        };
        let mut line = serde_json::to_string(&request).map_err(|e| {
            AcpRuntimeError::turn_failed(format!("Failed to encode turn request: {}", e))
        })?;
        line.push('\n');
        stdin.write_all(line.as_bytes()).await.map_err(|e| {
            AcpRuntimeError::new(
                AcpErrorCode::BackendUnavailable,
                format!("Failed to write to ACP backend \"{}\": {}", self.config.id, e),
            )
        })?;
        // EOF on stdin tells the child the request is complete.
        drop(stdin);

        let (tx, stream) = turn_channel(DEFAULT_TURN_BUFFER);
        tokio::spawn(pump_events(
            self.config.id.clone(),
            child,
            tx,
            controller,
            input.signal.clone(),
        ));
        Ok(stream)
    }

    async fn doctor(&self) -> Option<DoctorReport> {
        if command_on_path(&self.config.command) {
            let mut report = DoctorReport::ok(format!(
                "ACP backend \"{}\" found: {}",
                self.config.id, self.config.command
            ));
            report.details.push(format!("args: {:?}", self.config.args));
            return Some(report);
        }

        let mut report = DoctorReport::failed(
            AcpErrorCode::BackendUnavailable,
            format!(
                "ACP backend \"{}\" command not found: {}",
                self.config.id, self.config.command
            ),
        );
        report.install_command = self.config.install_command.clone();
        Some(report)
    }

    async fn cancel(&self, handle: &RuntimeHandle, reason: Option<&str>) -> RuntimeResult<()> {
        let mut sessions = self.sessions.lock();
        if let Some(active) = sessions
            .get_mut(&handle.session_key)
            .and_then(|s| s.active.take())
        {
            debug!(
                "Cancelling ACP backend turn for {} ({})",
                handle.session_key,
                reason.unwrap_or("no reason")
            );
            active.abort();
        }
        Ok(())
    }

    async fn close(&self, handle: &RuntimeHandle, reason: &str) -> RuntimeResult<()> {
        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.get_mut(&handle.session_key) {
            if session.handle.runtime_session_name == handle.runtime_session_name {
                debug!("Closing ACP backend session {}: {}", handle.session_key, reason);
                if let Some(active) = session.active.take() {
                    active.abort();
                }
                session.closed = true;
            }
        }
        Ok(())
    }
}
