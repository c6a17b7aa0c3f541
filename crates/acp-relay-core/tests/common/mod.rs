//! Shared doubles for integration tests

#![allow(dead_code)]

use acp_relay_core::dispatch::{DispatchDiagnostics, OriginatingTarget, TurnOutcome};
use acp_relay_core::types::SessionMode;
use acp_relay_core::{
    DeliveryKind, InMemorySessionManager, OriginatingRouter, ReplyDispatcher, ReplyPayload,
    RuntimeBackendRegistry, ScriptedRuntime,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

pub const SESSION_KEY: &str = "discord:channel:42";

/// Channel sink recording every payload in order
#[derive(Default)]
pub struct RecordingChannel {
    payloads: Mutex<Vec<(DeliveryKind, ReplyPayload)>>,
}

impl RecordingChannel {
    pub fn payloads(&self) -> Vec<(DeliveryKind, ReplyPayload)> {
        self.payloads.lock().clone()
    }

    pub fn texts(&self, kind: DeliveryKind) -> Vec<String> {
        self.payloads
            .lock()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, p)| p.text_str().to_string())
            .collect()
    }
}

#[async_trait]
impl ReplyDispatcher for RecordingChannel {
    async fn deliver(&self, kind: DeliveryKind, payload: ReplyPayload) -> bool {
        self.payloads.lock().push((kind, payload));
        true
    }
}

#[async_trait]
impl OriginatingRouter for RecordingChannel {
    async fn route(
        &self,
        _target: &OriginatingTarget,
        kind: DeliveryKind,
        payload: ReplyPayload,
    ) -> bool {
        self.payloads.lock().push((kind, payload));
        true
    }
}

#[derive(Default)]
pub struct RecordingDiagnostics {
    pub processed: Mutex<Vec<(String, TurnOutcome)>>,
    pub idle: Mutex<Vec<String>>,
}

impl DispatchDiagnostics for RecordingDiagnostics {
    fn record_processed(&self, session_key: &str, outcome: &TurnOutcome) {
        self.processed
            .lock()
            .push((session_key.to_string(), outcome.clone()));
    }

    fn mark_idle(&self, session_key: &str) {
        self.idle.lock().push(session_key.to_string());
    }
}

/// Manager with `runtime` registered and [`SESSION_KEY`] bound to it
pub async fn bound_manager(runtime: ScriptedRuntime) -> Arc<InMemorySessionManager> {
    let registry = RuntimeBackendRegistry::new().with_backend(Arc::new(runtime));
    let manager = InMemorySessionManager::new(registry, "scripted");
    manager
        .initialize_session(SESSION_KEY, "codex", SessionMode::Persistent, None, None)
        .await
        .expect("session initializes");
    Arc::new(manager)
}
