//! ACP turn dispatch
//!
//! Per inbound message:
//!
//! ```text
//! resolve session ─▶ none? ─▶ return None (caller falls through)
//!        │
//!        ▼
//! empty prompt? ─▶ record completed (acp_empty_prompt)
//!        │
//!        ▼
//! policy gates ─▶ run turn ─▶ projector flush ─▶ error payload | speech final
//!                                                 ─▶ identity notice
//!        │
//!        ▼
//! record outcome, mark idle
//! ```

use super::context::InboundContext;
use super::delivery::{DeliveryCoordinator, OriginatingRouter, SpeechPlan, SpeechSynthesizer};
use super::diagnostics::{DispatchDiagnostics, TracingDiagnostics, TurnOutcome};
use super::policy::{AcpPolicy, ConfigAcpPolicy};
use crate::acp::identity::{
    is_identity_pending, resolve_identifier_lines, resolve_identity_from_meta, IdentifierLineMode,
};
use crate::acp::AbortSignal;
use crate::config::GatewayConfig;
use crate::error::{format_acp_runtime_error_text, with_error_boundary, AcpErrorCode};
use crate::manager::{ManagerTurnRequest, SessionManager, SessionResolution};
use crate::reply::{ReplyDispatcher, ReplyProjector, ReplyStreamSettings};
use crate::types::{DeliveryCounts, DeliveryKind, ReplyPayload};
use std::sync::Arc;
use tracing::{debug, info};

/// Reason tag recorded for messages with no prompt text
pub const EMPTY_PROMPT_REASON: &str = "acp_empty_prompt";

const IDENTITY_NOTICE_HEADER: &str = "Session ids resolved.";

/// Result of a message handled by ACP
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcpDispatchResult {
    /// A final payload was handed off
    pub queued_final: bool,
    pub counts: DeliveryCounts,
    pub outcome: TurnOutcome,
}

/// Routes inbound messages bound to an ACP session through the runtime
pub struct AcpTurnDispatcher {
    config: Arc<GatewayConfig>,
    manager: Arc<dyn SessionManager>,
    policy: Arc<dyn AcpPolicy>,
    diagnostics: Arc<dyn DispatchDiagnostics>,
    speech: Option<Arc<dyn SpeechSynthesizer>>,
    router: Option<Arc<dyn OriginatingRouter>>,
}

impl AcpTurnDispatcher {
    pub fn new(config: Arc<GatewayConfig>, manager: Arc<dyn SessionManager>) -> Self {
        let policy = Arc::new(ConfigAcpPolicy::new(&config));
        Self {
            config,
            manager,
            policy,
            diagnostics: Arc::new(TracingDiagnostics),
            speech: None,
            router: None,
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn AcpPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn DispatchDiagnostics>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn with_speech(mut self, speech: Arc<dyn SpeechSynthesizer>) -> Self {
        self.speech = Some(speech);
        self
    }

    pub fn with_router(mut self, router: Arc<dyn OriginatingRouter>) -> Self {
        self.router = Some(router);
        self
    }

    /// Handle `ctx` through ACP.
    ///
    /// Returns `None` when the message is not ACP's to handle.
    pub async fn try_dispatch(
        &self,
        ctx: &InboundContext,
        channel: Arc<dyn ReplyDispatcher>,
        signal: Option<AbortSignal>,
    ) -> Option<AcpDispatchResult> {
        if ctx.handled_as_command {
            return None;
        }
        let session_key = ctx.session_key.as_str();
        let resolution = self.manager.resolve_session(session_key).await;
        let meta = resolution.meta()?.clone();

        let coordinator = Arc::new(self.coordinator(ctx, channel));

        let prompt = ctx.resolve_prompt_text();
        if prompt.is_empty() {
            debug!("Skipping empty ACP prompt for {}", session_key);
            let outcome = TurnOutcome::completed_with_reason(EMPTY_PROMPT_REASON);
            return Some(self.finalize(session_key, &coordinator, outcome));
        }

        let watch_identity = ctx.is_thread_bound()
            && is_identity_pending(resolve_identity_from_meta(Some(&meta)).as_ref());

        let settings = ReplyStreamSettings::resolve(
            &self.config,
            ctx.channel.as_deref(),
            ctx.account_id.as_deref(),
        );
        let mut projector = ReplyProjector::spawn(settings, coordinator.clone());

        info!(
            "Dispatching ACP turn for {} (backend {}, agent {})",
            session_key, meta.backend, meta.agent
        );
        let turn = with_error_boundary(
            async {
                if let Some(error) = self.policy.dispatch_policy_error() {
                    return Err(error);
                }
                if let Some(error) = self.policy.agent_policy_error(&meta.agent) {
                    return Err(error);
                }
                if let SessionResolution::Stale { error, .. } = &resolution {
                    return Err(error.clone());
                }
                let request =
                    ManagerTurnRequest::new(session_key, prompt.as_str()).with_signal(signal.clone());
                self.manager.run_turn(request, &mut projector).await
            },
            AcpErrorCode::TurnFailed,
            "ACP turn failed before completion.",
        )
        .await;

        // Partial output goes out before anything else about this turn.
        let summary = projector.finish().await;

        let outcome = match turn {
            Err(error) => {
                let text = format_acp_runtime_error_text(&error);
                coordinator
                    .deliver(DeliveryKind::Final, ReplyPayload::error(text))
                    .await;
                TurnOutcome::Failed { error }
            }
            Ok(()) if signal.as_ref().is_some_and(|s| s.is_aborted()) => TurnOutcome::Aborted,
            Ok(()) => {
                if summary.blocks > 0 {
                    if let Some(payload) = coordinator
                        .accumulated_speech_payload(&summary.delivered_text)
                        .await
                    {
                        coordinator.deliver(DeliveryKind::Final, payload).await;
                    }
                }
                if watch_identity {
                    self.deliver_identity_notice(session_key, &coordinator).await;
                }
                TurnOutcome::completed()
            }
        };

        Some(self.finalize(session_key, &coordinator, outcome))
    }

    fn coordinator(
        &self,
        ctx: &InboundContext,
        channel: Arc<dyn ReplyDispatcher>,
    ) -> DeliveryCoordinator {
        let speech = SpeechPlan::resolve(
            &self.config.tts,
            self.speech.as_ref(),
            ctx.inbound_audio,
            ctx.voice_tagged,
        );
        let coordinator = DeliveryCoordinator::new(channel).with_speech(speech);
        match (&self.router, &ctx.originating) {
            (Some(router), Some(target)) => coordinator.with_route(router.clone(), target.clone()),
            _ => coordinator,
        }
    }

    async fn deliver_identity_notice(&self, session_key: &str, coordinator: &DeliveryCoordinator) {
        let resolution = self.manager.resolve_session(session_key).await;
        let Some(meta) = resolution.meta() else {
            return;
        };
        let identity = resolve_identity_from_meta(Some(meta));
        if is_identity_pending(identity.as_ref()) {
            return;
        }
        let lines = resolve_identifier_lines(
            &meta.backend,
            &meta.agent,
            identity.as_ref(),
            IdentifierLineMode::Thread,
        );
        if lines.is_empty() {
            return;
        }
        let text = format!("{}\n{}", IDENTITY_NOTICE_HEADER, lines.join("\n"));
        coordinator
            .deliver(DeliveryKind::Final, ReplyPayload::text(text))
            .await;
    }

    fn finalize(
        &self,
        session_key: &str,
        coordinator: &DeliveryCoordinator,
        outcome: TurnOutcome,
    ) -> AcpDispatchResult {
        self.diagnostics.record_processed(session_key, &outcome);
        self.diagnostics.mark_idle(session_key);

        let snapshot = self.manager.observability_snapshot();
        debug!(
            "ACP dispatch for {} {}: queue depth {}, active sessions {}",
            session_key,
            outcome.as_str(),
            snapshot.turns.queue_depth,
            snapshot.runtime_cache.active_sessions
        );

        let counts = coordinator.counts();
        AcpDispatchResult {
            queued_final: counts.get(DeliveryKind::Final) > 0,
            counts,
            outcome,
        }
    }
}
