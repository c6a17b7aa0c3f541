//! Turn event projection into channel deliveries
//!
//! A [`ReplyProjector`] owns a background task that turns a live stream of
//! [`TurnEvent`]s into ordered tool and block payloads. Output deltas are
//! buffered in a [`BlockChunker`] and flushed when a chunk fills up, when the
//! stream goes idle for `coalesce_idle_ms`, before any tool or status marker,
//! and when the turn ends.

use super::chunker::BlockChunker;
use super::settings::{ReplyStreamSettings, BLOCK_DELIVERY_TIMEOUT};
use crate::manager::TurnEventHandler;
use crate::types::{DeliveryKind, ReplyPayload, TextStream, TurnEvent};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, warn};

pub const STATUS_MARKER: &str = "⚙️ ";
pub const TOOL_CALL_MARKER: &str = "🛠️ ";

const PROJECTOR_BUFFER: usize = 64;

/// Hands payloads to the originating channel
#[async_trait]
pub trait ReplyDispatcher: Send + Sync {
    /// Returns `true` when the payload was accepted for delivery.
    async fn deliver(&self, kind: DeliveryKind, payload: ReplyPayload) -> bool;
}

/// What the projector delivered over one turn
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectionSummary {
    /// Text of every delivered block, joined with newlines
    pub delivered_text: String,
    pub blocks: usize,
    pub tool_payloads: usize,
    pub failed_deliveries: usize,
}

impl ProjectionSummary {
    fn record_block(&mut self, text: &str) {
        if !self.delivered_text.is_empty() {
            self.delivered_text.push('\n');
        }
        self.delivered_text.push_str(text);
        self.blocks += 1;
    }
}

/// Streaming projector for a single turn
pub struct ReplyProjector {
    tx: mpsc::Sender<TurnEvent>,
    task: JoinHandle<ProjectionSummary>,
}

impl ReplyProjector {
    pub fn spawn(settings: ReplyStreamSettings, dispatcher: Arc<dyn ReplyDispatcher>) -> Self {
        let (tx, rx) = mpsc::channel(PROJECTOR_BUFFER);
        let state = ProjectorState {
            chunker: BlockChunker::new(settings.max_chunk_chars),
            dispatcher,
            summary: ProjectionSummary::default(),
        };
        let task = tokio::spawn(run_projector(state, settings, rx));
        Self { tx, task }
    }

    pub async fn push(&self, event: TurnEvent) {
        if self.tx.send(event).await.is_err() {
            warn!("Reply projector stopped before the turn ended");
        }
    }

    /// Flush everything still buffered and wait for pending deliveries.
    pub async fn finish(self) -> ProjectionSummary {
        drop(self.tx);
        match self.task.await {
            Ok(summary) => summary,
            Err(e) => {
                warn!("Reply projector task failed: {}", e);
                ProjectionSummary::default()
            }
        }
    }
}

#[async_trait]
impl TurnEventHandler for ReplyProjector {
    async fn on_event(&mut self, event: TurnEvent) {
        self.push(event).await;
    }
}

struct ProjectorState {
    chunker: BlockChunker,
    dispatcher: Arc<dyn ReplyDispatcher>,
    summary: ProjectionSummary,
}

impl ProjectorState {
    /// Returns `true` when output text was buffered.
    async fn handle(&mut self, event: TurnEvent) -> bool {
        match event {
            TurnEvent::TextDelta {
                text,
                stream: TextStream::Output,
            } => {
                self.chunker.push(&text);
                self.flush(false).await;
                true
            }
            TurnEvent::TextDelta {
                stream: TextStream::Thought,
                ..
            } => false,
            TurnEvent::Status { text } => {
                self.flush(true).await;
                self.deliver_tool(STATUS_MARKER, &text).await;
                false
            }
            TurnEvent::ToolCall { text } => {
                self.flush(true).await;
                self.deliver_tool(TOOL_CALL_MARKER, &text).await;
                false
            }
            TurnEvent::Done { .. } | TurnEvent::Error { .. } => {
                self.flush(true).await;
                false
            }
        }
    }

    async fn flush(&mut self, force: bool) {
        for chunk in self.chunker.drain(force) {
            if self.deliver(DeliveryKind::Block, ReplyPayload::text(chunk.clone())).await {
                self.summary.record_block(&chunk);
            }
        }
    }

    async fn deliver_tool(&mut self, marker: &str, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let payload = ReplyPayload::text(format!("{}{}", marker, text));
        if self.deliver(DeliveryKind::Tool, payload).await {
            self.summary.tool_payloads += 1;
        }
    }

    async fn deliver(&mut self, kind: DeliveryKind, payload: ReplyPayload) -> bool {
        match timeout(BLOCK_DELIVERY_TIMEOUT, self.dispatcher.deliver(kind, payload)).await {
            Ok(true) => true,
            Ok(false) => {
                debug!("ACP {} payload was not delivered", kind.as_str());
                self.summary.failed_deliveries += 1;
                false
            }
            Err(_) => {
                warn!(
                    "ACP {} delivery timed out after {:?}",
                    kind.as_str(),
                    BLOCK_DELIVERY_TIMEOUT
                );
                self.summary.failed_deliveries += 1;
                false
            }
        }
    }
}

async fn run_projector(
    mut state: ProjectorState,
    settings: ReplyStreamSettings,
    mut rx: mpsc::Receiver<TurnEvent>,
) -> ProjectionSummary {
    let idle = settings.coalesce_idle();
    let mut deadline: Option<Instant> = None;

    loop {
        let idle_flush = async {
            match deadline {
                Some(at) => sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;

            event = rx.recv() => match event {
                Some(event) => {
                    let buffered = state.handle(event).await;
                    if !state.chunker.has_pending() {
                        deadline = None;
                    } else if buffered {
                        deadline = Some(Instant::now() + idle);
                    }
                }
                None => break,
            },
            _ = idle_flush => {
                state.flush(true).await;
                deadline = None;
            }
        }
    }

    state.flush(true).await;
    state.summary
}
