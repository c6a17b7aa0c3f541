//! Inbound message dispatch into ACP turns

mod context;
mod delivery;
mod diagnostics;
mod dispatcher;
mod policy;

pub use context::{InboundContext, OriginatingTarget};
pub use delivery::{DeliveryCoordinator, OriginatingRouter, SpeechSynthesizer};
pub use diagnostics::{DispatchDiagnostics, TracingDiagnostics, TurnOutcome};
pub use dispatcher::{AcpDispatchResult, AcpTurnDispatcher, EMPTY_PROMPT_REASON};
pub use policy::{AcpPolicy, ConfigAcpPolicy};
