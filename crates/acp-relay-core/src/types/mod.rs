//! Core type definitions for acp-relay
//!
//! Shared data types used across the runtime layer: runtime handles and turn
//! events, session identity and metadata, and reply payloads.

mod acp_types;
mod reply_types;
mod session_types;

pub use acp_types::*;
pub use reply_types::*;
pub use session_types::*;
