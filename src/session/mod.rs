//! Streaming session management.
//!
//! A session tracks one assistant response as it streams in: raw chunks
//! arrive, content and tool calls accumulate, and interested parties get
//! signals and callbacks along the way. Each session runs as its own
//! actor task; the [`SessionManager`] owns the table that maps
//! conversation ids to live sessions.

mod actor;
mod actor_types;
mod handle;
mod manager;
mod signals;

// Session table and event routing
pub use manager::SessionManager;

// Per-session handle and actor surface
pub use actor_types::{
    ActorError, ChunkCallback, CompleteCallback, ErrorCallback, SessionCallbacks,
    SessionOptions, SessionStatus, SessionView, CHANNEL_CAPACITY, SESSION_ID_PREFIX,
    STREAM_OPERATION,
};
pub use handle::SessionHandle;

// Signals
pub use signals::{CloseReason, StreamSignal, StreamSignalPayload};
