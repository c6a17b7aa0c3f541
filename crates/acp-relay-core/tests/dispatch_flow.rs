//! End-to-end dispatch: inbound message through manager, runtime and projector

mod common;

use acp_relay_core::dispatch::{AcpTurnDispatcher, InboundContext, TurnOutcome, EMPTY_PROMPT_REASON};
use acp_relay_core::types::{SessionAcpMeta, SessionMode, SessionRuntimeState};
use acp_relay_core::{
    AbortController, AcpErrorCode, DeliveryKind, GatewayConfig, InMemorySessionManager,
    ReplyPayload, RuntimeBackendRegistry, RuntimeOptions, ScriptedRuntime, SessionManager,
    SpeechSynthesizer, TurnEvent,
};
use async_trait::async_trait;
use chrono::Utc;
use common::{bound_manager, RecordingChannel, RecordingDiagnostics, SESSION_KEY};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn dispatcher(manager: Arc<InMemorySessionManager>) -> AcpTurnDispatcher {
    AcpTurnDispatcher::new(Arc::new(GatewayConfig::default()), manager)
}

fn config(raw: &str) -> Arc<GatewayConfig> {
    Arc::new(GatewayConfig::from_json_str(raw).unwrap())
}

#[tokio::test(start_paused = true)]
async fn test_hello_turn_delivers_one_block() {
    let runtime = ScriptedRuntime::new("scripted").on_prompt(
        "hello",
        vec![
            TurnEvent::output("hi "),
            TurnEvent::output("there"),
            TurnEvent::done(),
        ],
    );
    let manager = bound_manager(runtime).await;
    let diagnostics = Arc::new(RecordingDiagnostics::default());
    let dispatcher = dispatcher(manager.clone()).with_diagnostics(diagnostics.clone());
    let channel = Arc::new(RecordingChannel::default());

    let result = dispatcher
        .try_dispatch(&InboundContext::new(SESSION_KEY, "hello"), channel.clone(), None)
        .await
        .expect("ACP handles the message");

    assert_eq!(
        channel.payloads(),
        vec![(DeliveryKind::Block, ReplyPayload::text("hi there"))]
    );
    assert_eq!(result.outcome, TurnOutcome::completed());
    assert!(!result.queued_final);
    assert_eq!(result.counts.get(DeliveryKind::Block), 1);
    assert_eq!(
        *diagnostics.processed.lock(),
        vec![(SESSION_KEY.to_string(), TurnOutcome::completed())]
    );
    assert_eq!(*diagnostics.idle.lock(), vec![SESSION_KEY.to_string()]);
    assert_eq!(
        manager.session_meta(SESSION_KEY).unwrap().state,
        SessionRuntimeState::Idle
    );
}

#[tokio::test]
async fn test_unbound_session_is_a_no_op() {
    let manager = bound_manager(ScriptedRuntime::new("scripted")).await;
    let diagnostics = Arc::new(RecordingDiagnostics::default());
    let dispatcher = dispatcher(manager).with_diagnostics(diagnostics.clone());
    let channel = Arc::new(RecordingChannel::default());

    let result = dispatcher
        .try_dispatch(&InboundContext::new("slack:other", "hello"), channel.clone(), None)
        .await;

    assert!(result.is_none());
    assert!(channel.payloads().is_empty());
    assert!(diagnostics.processed.lock().is_empty());
}

#[tokio::test]
async fn test_empty_prompt_never_reaches_backend() {
    let runtime = ScriptedRuntime::new("scripted");
    let probe = runtime.clone();
    let manager = bound_manager(runtime).await;
    let diagnostics = Arc::new(RecordingDiagnostics::default());
    let dispatcher = dispatcher(manager).with_diagnostics(diagnostics.clone());
    let channel = Arc::new(RecordingChannel::default());

    let ctx = InboundContext {
        session_key: SESSION_KEY.to_string(),
        body: Some("   ".into()),
        raw_body: Some("\n".into()),
        command_body: Some(String::new()),
        body_for_commands: Some(" \t".into()),
        body_for_agent: Some("  ".into()),
        ..InboundContext::default()
    };
    let result = dispatcher
        .try_dispatch(&ctx, channel.clone(), None)
        .await
        .unwrap();

    assert!(probe.prompts().is_empty());
    assert!(channel.payloads().is_empty());
    assert_eq!(
        result.outcome,
        TurnOutcome::completed_with_reason(EMPTY_PROMPT_REASON)
    );
    assert_eq!(diagnostics.processed.lock().len(), 1);
    assert_eq!(diagnostics.idle.lock().len(), 1);
}

#[tokio::test]
async fn test_dispatch_policy_rejects_before_backend() {
    let runtime = ScriptedRuntime::new("scripted");
    let probe = runtime.clone();
    let manager = bound_manager(runtime).await;
    let diagnostics = Arc::new(RecordingDiagnostics::default());
    let dispatcher = AcpTurnDispatcher::new(
        config(r#"{"acp": {"dispatch": {"enabled": false}}}"#),
        manager,
    )
    .with_diagnostics(diagnostics.clone());
    let channel = Arc::new(RecordingChannel::default());

    let result = dispatcher
        .try_dispatch(&InboundContext::new(SESSION_KEY, "hello"), channel.clone(), None)
        .await
        .unwrap();

    assert!(probe.prompts().is_empty());
    let payloads = channel.payloads();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].0, DeliveryKind::Final);
    assert!(payloads[0].1.is_error);
    assert!(payloads[0]
        .1
        .text_str()
        .starts_with("ACP error (ACP_DISPATCH_DISABLED)"));
    match result.outcome {
        TurnOutcome::Failed { error } => assert_eq!(error.code, AcpErrorCode::DispatchDisabled),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(diagnostics.idle.lock().len(), 1);
}

#[tokio::test]
async fn test_agent_allow_list_rejects_other_agents() {
    let manager = bound_manager(ScriptedRuntime::new("scripted")).await;
    let dispatcher = AcpTurnDispatcher::new(config(r#"{"acp": {"allowedAgents": ["claude"]}}"#), manager);
    let channel = Arc::new(RecordingChannel::default());

    let result = dispatcher
        .try_dispatch(&InboundContext::new(SESSION_KEY, "hello"), channel.clone(), None)
        .await
        .unwrap();

    assert!(matches!(result.outcome, TurnOutcome::Failed { .. }));
    assert!(channel.texts(DeliveryKind::Final)[0].contains("\"codex\" is not allowed"));
}

#[tokio::test]
async fn test_stale_binding_reports_missing_backend() {
    let manager = Arc::new(InMemorySessionManager::new(
        RuntimeBackendRegistry::new(),
        "scripted",
    ));
    manager.restore_session(
        SESSION_KEY,
        SessionAcpMeta {
            backend: "retired".into(),
            agent: "codex".into(),
            runtime_session_name: "codex-1".into(),
            mode: SessionMode::Persistent,
            cwd: None,
            identity: None,
            runtime_options: RuntimeOptions::default(),
            state: SessionRuntimeState::Idle,
            last_activity_at: Utc::now(),
            last_error: None,
        },
    );
    let dispatcher = dispatcher(manager);
    let channel = Arc::new(RecordingChannel::default());

    let result = dispatcher
        .try_dispatch(&InboundContext::new(SESSION_KEY, "hello"), channel.clone(), None)
        .await
        .unwrap();

    assert!(result.queued_final);
    let finals = channel.texts(DeliveryKind::Final);
    assert!(finals[0].starts_with("ACP error (ACP_BACKEND_MISSING)"));
}

#[tokio::test(start_paused = true)]
async fn test_failure_flushes_partial_text_before_error() {
    let runtime = ScriptedRuntime::new("scripted").on_prompt(
        "crash",
        vec![
            TurnEvent::output("working on "),
            TurnEvent::output("it"),
            TurnEvent::Error {
                message: "backend went away".into(),
                code: Some("ACP_BACKEND_UNAVAILABLE".into()),
                retryable: Some(true),
            },
        ],
    );
    let manager = bound_manager(runtime).await;
    let dispatcher = dispatcher(manager.clone());
    let channel = Arc::new(RecordingChannel::default());

    let result = dispatcher
        .try_dispatch(&InboundContext::new(SESSION_KEY, "crash"), channel.clone(), None)
        .await
        .unwrap();

    let payloads = channel.payloads();
    assert_eq!(payloads.len(), 2);
    assert_eq!(payloads[0], (DeliveryKind::Block, ReplyPayload::text("working on it")));
    assert_eq!(payloads[1].0, DeliveryKind::Final);
    assert!(payloads[1].1.is_error);
    assert!(payloads[1]
        .1
        .text_str()
        .starts_with("ACP error (ACP_BACKEND_UNAVAILABLE): backend went away"));
    assert!(matches!(result.outcome, TurnOutcome::Failed { .. }));

    let meta = manager.session_meta(SESSION_KEY).unwrap();
    assert_eq!(meta.state, SessionRuntimeState::Error);
    assert_eq!(manager.observability_snapshot().turns.active, 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_drains_partial_output() {
    let runtime = ScriptedRuntime::new("scripted")
        .on_prompt(
            "long task",
            vec![
                TurnEvent::output("partial answer"),
                TurnEvent::output(" never sent"),
                TurnEvent::done(),
            ],
        )
        .with_event_delay(Duration::from_millis(100));
    let manager = bound_manager(runtime).await;
    let dispatcher = dispatcher(manager);
    let channel = Arc::new(RecordingChannel::default());

    let controller = Arc::new(AbortController::new());
    let abort = controller.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        abort.abort();
    });

    let result = dispatcher
        .try_dispatch(
            &InboundContext::new(SESSION_KEY, "long task"),
            channel.clone(),
            Some(controller.signal()),
        )
        .await
        .unwrap();

    assert_eq!(result.outcome, TurnOutcome::Aborted);
    assert_eq!(
        channel.payloads(),
        vec![(DeliveryKind::Block, ReplyPayload::text("partial answer"))]
    );
}

#[tokio::test(start_paused = true)]
async fn test_idle_gap_splits_blocks() {
    let runtime = ScriptedRuntime::new("scripted")
        .on_prompt(
            "slow",
            vec![
                TurnEvent::output("first thought"),
                TurnEvent::output("second thought"),
                TurnEvent::done(),
            ],
        )
        .with_event_delay(Duration::from_secs(1));
    let manager = bound_manager(runtime).await;
    let dispatcher = dispatcher(manager);
    let channel = Arc::new(RecordingChannel::default());

    dispatcher
        .try_dispatch(&InboundContext::new(SESSION_KEY, "slow"), channel.clone(), None)
        .await
        .unwrap();

    assert_eq!(
        channel.texts(DeliveryKind::Block),
        vec!["first thought".to_string(), "second thought".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_tool_and_status_never_overtake_text() {
    let runtime = ScriptedRuntime::new("scripted").on_prompt(
        "inspect",
        vec![
            TurnEvent::output("Let me look."),
            TurnEvent::tool_call("read_file Cargo.toml"),
            TurnEvent::thought("the manifest looks fine"),
            TurnEvent::output("Found the workspace."),
            TurnEvent::status("summarizing"),
            TurnEvent::output("Done."),
            TurnEvent::done(),
        ],
    );
    let manager = bound_manager(runtime).await;
    let dispatcher = dispatcher(manager);
    let channel = Arc::new(RecordingChannel::default());

    let result = dispatcher
        .try_dispatch(&InboundContext::new(SESSION_KEY, "inspect"), channel.clone(), None)
        .await
        .unwrap();

    let sequence: Vec<(DeliveryKind, String)> = channel
        .payloads()
        .into_iter()
        .map(|(kind, payload)| (kind, payload.text_str().to_string()))
        .collect();
    assert_eq!(
        sequence,
        vec![
            (DeliveryKind::Block, "Let me look.".to_string()),
            (DeliveryKind::Tool, "🛠️ read_file Cargo.toml".to_string()),
            (DeliveryKind::Block, "Found the workspace.".to_string()),
            (DeliveryKind::Tool, "⚙️ summarizing".to_string()),
            (DeliveryKind::Block, "Done.".to_string()),
        ]
    );
    assert_eq!(result.counts.get(DeliveryKind::Tool), 2);
    assert_eq!(result.counts.get(DeliveryKind::Block), 3);
}

#[tokio::test(start_paused = true)]
async fn test_channel_chunk_limit_bounds_blocks() {
    let sentence = "Chunked replies stay readable on every channel. ";
    let events: Vec<TurnEvent> = std::iter::repeat_with(|| TurnEvent::output(sentence))
        .take(60)
        .chain(std::iter::once(TurnEvent::done()))
        .collect();
    let runtime = ScriptedRuntime::new("scripted").on_prompt("essay", events);
    let manager = bound_manager(runtime).await;
    let dispatcher = AcpTurnDispatcher::new(
        config(r#"{"channels": {"discord": {"acpStream": {"maxChunkChars": 120}}}}"#),
        manager,
    );
    let channel = Arc::new(RecordingChannel::default());

    let ctx = InboundContext::new(SESSION_KEY, "essay").with_channel("discord");
    let result = dispatcher
        .try_dispatch(&ctx, channel.clone(), None)
        .await
        .unwrap();

    let blocks = channel.texts(DeliveryKind::Block);
    assert!(blocks.len() >= 60 * sentence.len() / 120);
    assert!(blocks.iter().all(|b| b.chars().count() <= 120));
    assert_eq!(result.counts.get(DeliveryKind::Block), blocks.len());
    let words: usize = blocks.iter().map(|b| b.split_whitespace().count()).sum();
    assert_eq!(words, 60 * sentence.split_whitespace().count());
}

#[tokio::test(start_paused = true)]
async fn test_thread_gets_identity_notice_once() {
    let manager = bound_manager(ScriptedRuntime::new("scripted")).await;
    let dispatcher = dispatcher(manager.clone());

    let ctx = InboundContext::new(SESSION_KEY, "first").with_thread("thread-7");
    let channel = Arc::new(RecordingChannel::default());
    let result = dispatcher
        .try_dispatch(&ctx, channel.clone(), None)
        .await
        .unwrap();

    assert!(result.queued_final);
    let finals = channel.texts(DeliveryKind::Final);
    assert_eq!(finals.len(), 1);
    let notice = &finals[0];
    assert!(notice.starts_with("Session ids resolved.\n"));
    assert!(notice.contains("agent session id: "));
    assert!(notice.contains("scripted session id: "));
    assert!(notice.contains("codex resume "));

    let ctx = InboundContext::new(SESSION_KEY, "second").with_thread("thread-7");
    let channel = Arc::new(RecordingChannel::default());
    let result = dispatcher
        .try_dispatch(&ctx, channel.clone(), None)
        .await
        .unwrap();
    assert!(!result.queued_final);
    assert!(channel.texts(DeliveryKind::Final).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unthreaded_messages_get_no_identity_notice() {
    let manager = bound_manager(ScriptedRuntime::new("scripted")).await;
    let dispatcher = dispatcher(manager);
    let channel = Arc::new(RecordingChannel::default());

    dispatcher
        .try_dispatch(&InboundContext::new(SESSION_KEY, "hi"), channel.clone(), None)
        .await
        .unwrap();

    assert!(channel.texts(DeliveryKind::Final).is_empty());
    assert_eq!(channel.texts(DeliveryKind::Block), vec!["hi".to_string()]);
}

struct FakeSpeech;

#[async_trait]
impl SpeechSynthesizer for FakeSpeech {
    async fn synthesize(&self, text: &str) -> acp_relay_core::Result<String> {
        Ok(format!("file:///tmp/tts-{}.ogg", text.lines().count()))
    }
}

#[tokio::test(start_paused = true)]
async fn test_final_mode_speech_follows_blocks() {
    let runtime = ScriptedRuntime::new("scripted").on_prompt(
        "speak",
        vec![
            TurnEvent::output("line one"),
            TurnEvent::tool_call("lookup"),
            TurnEvent::output("line two"),
            TurnEvent::done(),
        ],
    );
    let manager = bound_manager(runtime).await;
    let dispatcher = AcpTurnDispatcher::new(
        config(r#"{"tts": {"mode": "final", "auto": "always"}}"#),
        manager,
    )
    .with_speech(Arc::new(FakeSpeech));
    let channel = Arc::new(RecordingChannel::default());

    let result = dispatcher
        .try_dispatch(&InboundContext::new(SESSION_KEY, "speak"), channel.clone(), None)
        .await
        .unwrap();

    let payloads = channel.payloads();
    let (kind, last) = payloads.last().unwrap();
    assert_eq!(*kind, DeliveryKind::Final);
    assert_eq!(last.media_url.as_deref(), Some("file:///tmp/tts-2.ogg"));
    assert!(last.audio_as_voice);
    assert!(result.queued_final);
    assert!(payloads[..payloads.len() - 1]
        .iter()
        .all(|(_, p)| p.media_url.is_none()));
}

#[tokio::test(start_paused = true)]
async fn test_originating_route_bypasses_channel() {
    let manager = bound_manager(ScriptedRuntime::new("scripted")).await;
    let router = Arc::new(RecordingChannel::default());
    let dispatcher = dispatcher(manager).with_router(router.clone());
    let channel = Arc::new(RecordingChannel::default());

    let ctx = InboundContext::new(SESSION_KEY, "relay this").with_originating("telegram", "chat-9");
    let result = dispatcher
        .try_dispatch(&ctx, channel.clone(), None)
        .await
        .unwrap();

    assert!(channel.payloads().is_empty());
    assert_eq!(router.texts(DeliveryKind::Block), vec!["relay this".to_string()]);
    assert_eq!(result.counts.get(DeliveryKind::Block), 1);
}
