mod cli;

use acp_relay_core::types::SessionMode;
use acp_relay_core::{
    format_acp_runtime_error_text, AbortController, AcpCommandHandler, AcpTurnDispatcher,
    DeliveryKind, GatewayConfig, InMemorySessionManager, InboundContext, ProcessRuntime,
    ReplyDispatcher, ReplyPayload, RuntimeBackendRegistry, ScriptedRuntime, SessionManager,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use clap::Parser;
use cli::Cli;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Prints every payload to stdout
struct StdoutDispatcher;

#[async_trait]
impl ReplyDispatcher for StdoutDispatcher {
    async fn deliver(&self, kind: DeliveryKind, payload: ReplyPayload) -> bool {
        let tag = if payload.is_error { "error" } else { kind.as_str() };
        if let Some(text) = payload.text.as_deref() {
            println!("[{}] {}", tag, text);
        }
        if let Some(url) = payload.media_url.as_deref() {
            println!("[{} audio] {}", tag, url);
        }
        true
    }
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn build_registry(config: &GatewayConfig) -> RuntimeBackendRegistry {
    let mut registry =
        RuntimeBackendRegistry::new().with_backend(Arc::new(ScriptedRuntime::new("scripted")));
    for backend in &config.acp.backends {
        info!("Registering subprocess backend {}", backend.id);
        registry.register(Arc::new(ProcessRuntime::new(backend.clone())));
    }
    registry
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());
    info!("acp-relay v{}", env!("CARGO_PKG_VERSION"));

    let config = match &cli.config {
        Some(path) => GatewayConfig::load(path)?,
        None => GatewayConfig::default(),
    };
    let config = Arc::new(config);

    let backend = cli.backend.clone().unwrap_or_else(|| config.acp.backend.clone());
    let agent = cli
        .agent
        .clone()
        .unwrap_or_else(|| config.acp.default_agent.clone());
    let manager = Arc::new(InMemorySessionManager::new(
        build_registry(&config),
        backend.clone(),
    ));
    manager
        .initialize_session(
            &cli.session_key,
            &agent,
            SessionMode::Persistent,
            cli.cwd.as_deref(),
            Some(&backend),
        )
        .await
        .map_err(|e| anyhow!(format_acp_runtime_error_text(&e)))?;

    let dispatcher = AcpTurnDispatcher::new(config.clone(), manager.clone());
    let commands = AcpCommandHandler::new(manager.clone());
    let channel: Arc<dyn ReplyDispatcher> = Arc::new(StdoutDispatcher);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with("/acp") {
            println!("{}", commands.handle(&cli.session_key, line).await);
            continue;
        }

        let mut ctx = InboundContext::new(cli.session_key.as_str(), line);
        if let Some(name) = &cli.channel {
            ctx = ctx.with_channel(name.as_str());
        }

        let controller = AbortController::new();
        let dispatch = dispatcher.try_dispatch(&ctx, channel.clone(), Some(controller.signal()));
        tokio::pin!(dispatch);
        let result = loop {
            tokio::select! {
                result = &mut dispatch => break result,
                _ = tokio::signal::ctrl_c(), if !controller.is_aborted() => {
                    warn!("Cancelling the running turn");
                    controller.abort();
                }
            }
        };
        match result {
            Some(result) => info!(
                "Turn {} ({} payloads)",
                result.outcome.as_str(),
                result.counts.total()
            ),
            None => warn!("No ACP session bound to {}", cli.session_key),
        }
    }

    if let Err(e) = manager.close_session(&cli.session_key, "cli exit").await {
        warn!("Failed to close session: {}", e);
    }
    Ok(())
}
