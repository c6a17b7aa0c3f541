//! Control-plane session management

mod memory;
mod traits;

pub use memory::InMemorySessionManager;
pub use traits::{
    ManagerTurnRequest, ObservabilitySnapshot, RuntimeCacheSnapshot, SessionManager,
    SessionResolution, SessionStatusReport, TurnCounters, TurnEventHandler,
};
