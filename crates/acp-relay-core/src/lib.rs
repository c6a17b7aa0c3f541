//! acp-relay Core Library
//!
//! This crate provides the ACP (Agent Control Protocol) runtime layer of a
//! multi-channel messaging gateway:
//! - Runtime adapter contract, built-in adapters and a conformance harness
//! - Session identity tracking and runtime option negotiation
//! - A control-plane session manager that serializes turns per session
//! - Reply projection of streamed turn events into chunked channel payloads
//! - Turn dispatch for inbound messages and `/acp` command handling
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      acp-relay-core                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  dispatch/     - Inbound message → ACP turn orchestration   │
//! │  commands.rs   - /acp command handlers                      │
//! │  reply/        - Block chunking, coalescing, projection     │
//! │  manager/      - Control-plane session manager              │
//! │  acp/          - Adapter contract, adapters, identity       │
//! │  config.rs     - Gateway configuration                      │
//! │  types/        - Shared type definitions                    │
//! │  error.rs      - Error types and error boundary             │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod acp;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod manager;
pub mod reply;
pub mod types;

// Re-export commonly used types
pub use error::{
    format_acp_runtime_error_text, to_acp_runtime_error, with_error_boundary, AcpErrorCode,
    AcpRuntimeError, Error, Result,
};
pub use types::*;

// Re-export the adapter contract and its implementations
pub use acp::{
    run_adapter_conformance, AbortController, AbortSignal, AcpRuntime, ConformanceFailure,
    ConformanceOptions, ConformanceReport, ProcessBackendConfig, ProcessRuntime,
    RuntimeBackendRegistry, RuntimeOptions, RuntimeResult, ScriptedRuntime, TurnEventStream,
    TurnInput,
};

pub use commands::AcpCommandHandler;
pub use config::GatewayConfig;
pub use dispatch::{
    AcpDispatchResult, AcpPolicy, AcpTurnDispatcher, ConfigAcpPolicy, DispatchDiagnostics,
    InboundContext, OriginatingRouter, SpeechSynthesizer, TracingDiagnostics, TurnOutcome,
};
pub use manager::{InMemorySessionManager, SessionManager, SessionResolution, TurnEventHandler};
pub use reply::{ReplyDispatcher, ReplyProjector, ReplyStreamSettings};
