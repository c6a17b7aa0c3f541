//! ACP runtime layer
//!
//! The adapter contract every agent-runtime backend implements, the turn
//! event stream it produces, and the pieces the control plane builds on top:
//! session identity, runtime options, the backend registry and the
//! conformance harness.
//!
//! # Architecture
//!
//! - `AcpRuntime` - capability-set interface implemented by each backend
//! - `TurnEventStream` - single-consumer, backpressured stream of one turn
//! - `RuntimeBackendRegistry` - explicit, constructor-injected backend lookup
//!
//! Built-in backends are `ScriptedRuntime` (in-process) and `ProcessRuntime`
//! (NDJSON subprocess).

pub mod conformance;
pub mod identity;
mod process;
mod registry;
pub mod runtime_options;
mod scripted;
mod stream;
pub mod traits;

pub use conformance::{
    run_adapter_conformance, ConformanceFailure, ConformanceOptions, ConformanceReport,
};
pub use identity::{
    identity_from_handle, identity_from_status, is_identity_pending, merge_session_identity,
    resolve_identifier_lines, resolve_identity_from_meta, IdentifierLineMode,
};
pub use process::{ProcessBackendConfig, ProcessRuntime};
pub use registry::RuntimeBackendRegistry;
pub use runtime_options::RuntimeOptions;
pub use scripted::ScriptedRuntime;
pub use stream::{
    turn_channel, AbortController, AbortSignal, StreamClosed, TurnEventSender, TurnEventStream,
    CANCELLED_STOP_REASON, DEFAULT_TURN_BUFFER,
};
pub use traits::{AcpRuntime, RuntimeResult, TurnInput};
