//! `/acp` command handlers
//!
//! Each command takes one trailing value plus an optional `--session <key>`
//! target, goes through the error boundary with its own fallback, and
//! renders a confirmation or an `ACP error (CODE): message` string.

use crate::acp::identity::{resolve_identifier_lines, IdentifierLineMode};
use crate::acp::runtime_options::parse_timeout_seconds;
use crate::acp::{RuntimeOptions, RuntimeResult};
use crate::error::{format_acp_runtime_error_text, with_error_boundary, AcpErrorCode};
use crate::manager::{SessionManager, SessionStatusReport};
use crate::types::DoctorReport;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

const USAGE: &str = "Usage: /acp <command> [value] [--session <key>]
commands:
  status                 show session runtime status
  set-mode <mode>        set the runtime mode
  set <key> <value>      set a backend config option
  cwd <path>             set the working directory
  permissions <profile>  set the permission profile
  timeout <seconds>      set the turn timeout
  model <id>             set the model
  reset-options          clear runtime options
  doctor                 check backend installation";

/// A parsed `/acp` invocation
#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedCommand {
    name: String,
    target: Option<String>,
    args: Vec<String>,
}

impl ParsedCommand {
    fn parse(raw: &str) -> Option<Self> {
        let mut tokens = raw.split_whitespace().peekable();
        if tokens.peek() == Some(&"/acp") {
            tokens.next();
        }
        let name = tokens.next()?.to_lowercase();

        let mut target = None;
        let mut args = Vec::new();
        while let Some(token) = tokens.next() {
            if token == "--session" {
                target = tokens.next().map(str::to_string);
            } else if let Some(key) = token.strip_prefix("--session=") {
                target = Some(key.to_string());
            } else {
                args.push(token.to_string());
            }
        }
        Some(Self { name, target, args })
    }

    fn value(&self) -> Option<String> {
        (!self.args.is_empty()).then(|| self.args.join(" "))
    }
}

/// Handles `/acp ...` text commands against a session manager
pub struct AcpCommandHandler {
    manager: Arc<dyn SessionManager>,
}

impl AcpCommandHandler {
    pub fn new(manager: Arc<dyn SessionManager>) -> Self {
        Self { manager }
    }

    /// Run `args` for `session_key` (or the `--session` target) and return
    /// the text to show the user.
    pub async fn handle(&self, session_key: &str, args: &str) -> String {
        let Some(command) = ParsedCommand::parse(args) else {
            return USAGE.to_string();
        };
        let key = command.target.as_deref().unwrap_or(session_key);
        debug!("Handling /acp {} for {}", command.name, key);

        match command.name.as_str() {
            "status" => {
                self.guarded(
                    self.manager.get_session_status(key),
                    "Could not read ACP session status.",
                    |report| render_status(&report),
                )
                .await
            }
            "set-mode" => {
                let Some(mode) = command.value() else {
                    return "Usage: /acp set-mode <mode> [--session <key>]".to_string();
                };
                self.guarded(
                    self.manager.set_session_runtime_mode(key, &mode),
                    "Could not update ACP runtime mode.",
                    |options| confirm(format!("Runtime mode set to {}.", mode), &options),
                )
                .await
            }
            "set" => {
                let (Some(option), true) = (command.args.first(), command.args.len() > 1) else {
                    return "Usage: /acp set <key> <value> [--session <key>]".to_string();
                };
                let value = command.args[1..].join(" ");
                self.guarded(
                    self.manager.set_session_config_option(key, option, &value),
                    "Could not set ACP config option.",
                    |options| confirm(format!("Config option {} set to {}.", option, value), &options),
                )
                .await
            }
            "cwd" => {
                let Some(cwd) = command.value() else {
                    return "Usage: /acp cwd <absolute-path> [--session <key>]".to_string();
                };
                let patch = RuntimeOptions {
                    cwd: Some(cwd.clone()),
                    ..RuntimeOptions::default()
                };
                self.guarded(
                    self.manager.update_session_runtime_options(key, patch),
                    "Could not update ACP working directory.",
                    |options| confirm(format!("Working directory set to {}.", cwd), &options),
                )
                .await
            }
            "permissions" => {
                let Some(profile) = command.value() else {
                    return "Usage: /acp permissions <profile> [--session <key>]".to_string();
                };
                let patch = RuntimeOptions {
                    permission_profile: Some(profile.clone()),
                    ..RuntimeOptions::default()
                };
                self.guarded(
                    self.manager.update_session_runtime_options(key, patch),
                    "Could not update ACP permission profile.",
                    |options| confirm(format!("Permission profile set to {}.", profile), &options),
                )
                .await
            }
            "timeout" => {
                let Some(raw) = command.value() else {
                    return "Usage: /acp timeout <seconds> [--session <key>]".to_string();
                };
                let manager = &self.manager;
                self.guarded(
                    async move {
                        let seconds = parse_timeout_seconds(&raw)?;
                        let patch = RuntimeOptions {
                            timeout_seconds: Some(seconds),
                            ..RuntimeOptions::default()
                        };
                        manager.update_session_runtime_options(key, patch).await
                    },
                    "Could not update ACP timeout.",
                    |options| {
                        let seconds = options.timeout_seconds.unwrap_or_default();
                        confirm(format!("Timeout set to {}s.", seconds), &options)
                    },
                )
                .await
            }
            "model" => {
                let Some(model) = command.value() else {
                    return "Usage: /acp model <id> [--session <key>]".to_string();
                };
                let patch = RuntimeOptions {
                    model: Some(model.clone()),
                    ..RuntimeOptions::default()
                };
                self.guarded(
                    self.manager.update_session_runtime_options(key, patch),
                    "Could not update ACP model.",
                    |options| confirm(format!("Model set to {}.", model), &options),
                )
                .await
            }
            "reset-options" => {
                self.guarded(
                    self.manager.reset_session_runtime_options(key),
                    "Could not reset ACP runtime options.",
                    |options| confirm("Runtime options reset.".to_string(), &options),
                )
                .await
            }
            "doctor" => {
                let target = command.target.as_deref().or(Some(session_key));
                render_doctor(&self.manager.doctor(target).await)
            }
            "help" => USAGE.to_string(),
            other => format!("Unknown /acp command \"{}\".\n{}", other, USAGE),
        }
    }

    async fn guarded<T, F, R>(&self, run: F, fallback_message: &str, render: R) -> String
    where
        F: Future<Output = RuntimeResult<T>>,
        R: FnOnce(T) -> String,
    {
        match with_error_boundary(run, AcpErrorCode::TurnFailed, fallback_message).await {
            Ok(value) => render(value),
            Err(error) => format_acp_runtime_error_text(&error),
        }
    }
}

fn confirm(headline: String, options: &RuntimeOptions) -> String {
    let lines = options.describe_lines();
    if lines.is_empty() {
        return headline;
    }
    format!("{}\n{}", headline, lines.join("\n"))
}

fn render_status(report: &SessionStatusReport) -> String {
    let mut lines = vec![
        format!("ACP session: {}", report.session_key),
        format!("backend: {}", report.backend),
        format!("agent: {}", report.agent),
        format!("runtime session: {}", report.runtime_session_name),
        format!("state: {}", report.state.as_str()),
    ];
    lines.extend(report.runtime_options.describe_lines());
    lines.extend(resolve_identifier_lines(
        &report.backend,
        &report.agent,
        report.identity.as_ref(),
        IdentifierLineMode::Status,
    ));
    match &report.capabilities {
        Some(capabilities) if capabilities.controls.is_empty() => {
            lines.push("controls: none".to_string())
        }
        Some(capabilities) => {
            let controls: Vec<&str> = capabilities.controls.iter().map(|c| c.as_str()).collect();
            lines.push(format!("controls: {}", controls.join(", ")));
        }
        None => lines.push("runtime: not started".to_string()),
    }
    if let Some(summary) = report
        .runtime_status
        .as_ref()
        .and_then(|status| status.summary.as_deref())
    {
        lines.push(format!("status: {}", summary));
    }
    if let Some(error) = &report.last_error {
        lines.push(format!("last error: {}", error));
    }
    lines.join("\n")
}

fn render_doctor(reports: &[(String, DoctorReport)]) -> String {
    if reports.is_empty() {
        return "No ACP backends registered.".to_string();
    }
    let mut lines = Vec::new();
    for (backend, report) in reports {
        if report.ok {
            lines.push(format!("{}: ok ({})", backend, report.message));
            continue;
        }
        let code = report.code.map(|c| c.as_str()).unwrap_or("unknown");
        lines.push(format!("{}: FAILED {} ({})", backend, code, report.message));
        if let Some(install) = &report.install_command {
            lines.push(format!("  install: {}", install));
        }
        lines.extend(report.details.iter().map(|d| format!("  {}", d)));
    }
    lines.join("\n")
}
