//! Reply projection: turn events to channel payloads

mod chunker;
mod projector;
mod settings;

pub use chunker::BlockChunker;
pub use projector::{
    ProjectionSummary, ReplyDispatcher, ReplyProjector, STATUS_MARKER, TOOL_CALL_MARKER,
};
pub use settings::{
    ReplyStreamSettings, BLOCK_DELIVERY_TIMEOUT, DEFAULT_COALESCE_IDLE_MS,
    DEFAULT_MAX_CHUNK_CHARS, MAX_COALESCE_IDLE_MS, MAX_MAX_CHUNK_CHARS, MIN_MAX_CHUNK_CHARS,
};
