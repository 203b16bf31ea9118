//! Shared types for session actors and their handles.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::chunk::ToolCallDraft;
use crate::config::DeliveryMode;
use crate::recovery::ErrorDetails;

// ============================================================================
// Session Commands
// ============================================================================

/// Commands accepted by a session actor.
///
/// Each command carries a oneshot reply channel; the actor always answers,
/// so a dropped reply means the actor is gone.
pub enum SessionCommand {
    /// Promote the session to streaming.
    Start { reply: oneshot::Sender<()> },

    /// Fold one raw provider chunk into the session.
    Chunk {
        raw: Value,
        reply: oneshot::Sender<()>,
    },

    /// Finish the stream. `final_message` is adopted as content only when
    /// no content was accumulated from chunks.
    End {
        final_message: Option<String>,
        reply: oneshot::Sender<()>,
    },

    /// Fail the stream with a classified error.
    Fail {
        details: ErrorDetails,
        reply: oneshot::Sender<()>,
    },

    /// Suspend flushing. Replies false unless currently streaming.
    Pause { reply: oneshot::Sender<bool> },

    /// Resume flushing. Replies false unless currently paused.
    Resume { reply: oneshot::Sender<bool> },

    /// Drop the session without callbacks or completion signals.
    Cancel { reply: oneshot::Sender<()> },

    /// Snapshot the session's observable state.
    Inspect {
        reply: oneshot::Sender<SessionView>,
    },

    /// Replace the registered callbacks.
    SetCallbacks {
        callbacks: SessionCallbacks,
        reply: oneshot::Sender<()>,
    },
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors from talking to a session actor.
#[derive(Debug, Error)]
pub enum ActorError {
    /// The actor stopped before the command could be delivered or
    /// answered.
    #[error("session actor shut down")]
    ActorShutdown,
}

// ============================================================================
// Status & View
// ============================================================================

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Allocated, no stream activity yet.
    Idle,
    /// Receiving and processing chunks.
    Streaming,
    /// Buffering chunks without flushing.
    Paused,
    /// Terminal: stream finished normally.
    Completed,
    /// Terminal: stream failed or timed out.
    Error,
}

impl SessionStatus {
    /// True for `Completed` and `Error`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// Point-in-time copy of a session's observable state.
#[derive(Debug, Clone)]
pub struct SessionView {
    pub status: SessionStatus,
    pub content: String,
    pub tool_calls: Vec<ToolCallDraft>,
    pub error: Option<ErrorDetails>,
}

// ============================================================================
// Callbacks & Options
// ============================================================================

/// Called with each text delta as it is folded in.
pub type ChunkCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Called once with the final content and assembled tool calls.
pub type CompleteCallback = Arc<dyn Fn(&str, &[ToolCallDraft]) + Send + Sync>;

/// Called once with the classified error when the session fails.
pub type ErrorCallback = Arc<dyn Fn(&ErrorDetails) + Send + Sync>;

/// Consumer callbacks for one session. At most one of each; registering
/// again replaces the previous set.
#[derive(Default, Clone)]
pub struct SessionCallbacks {
    pub on_chunk: Option<ChunkCallback>,
    pub on_complete: Option<CompleteCallback>,
    pub on_error: Option<ErrorCallback>,
}

impl fmt::Debug for SessionCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCallbacks")
            .field("on_chunk", &self.on_chunk.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Per-session settings applied at creation.
#[derive(Debug, Default, Clone)]
pub struct SessionOptions {
    /// Callbacks registered from the start.
    pub callbacks: SessionCallbacks,
    /// Overrides the manager-wide delivery mode for this session.
    pub delivery: Option<DeliveryMode>,
}

// ============================================================================
// Constants
// ============================================================================

/// Command channel capacity per session actor.
pub const CHANNEL_CAPACITY: usize = 64;

/// Prefix for generated session ids.
pub const SESSION_ID_PREFIX: &str = "stream_";

/// Breaker key for failures surfaced through the streaming pipeline.
pub const STREAM_OPERATION: &str = "chat_stream";
