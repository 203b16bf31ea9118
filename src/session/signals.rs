//! Signals published by streaming sessions.
//!
//! Every lifecycle transition and every processed chunk is reported
//! through a closed, serde-tagged enum so hosts can render progress,
//! persist transcripts, or forward the stream across process boundaries.
//! The receiver is returned by
//! [`SessionManager::new`](super::SessionManager::new).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chunk::ToolCallDraft;
use crate::recovery::ErrorDetails;

/// One session signal with its origin and emission time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSignal {
    pub session_id: String,
    pub conversation_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: StreamSignalPayload,
}

impl StreamSignal {
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        conversation_id: impl Into<String>,
        payload: StreamSignalPayload,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            conversation_id: conversation_id.into(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Signal payloads, tagged by `type` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamSignalPayload {
    /// A session was allocated for a conversation.
    Created,

    /// The session moved to streaming.
    Started,

    /// One chunk was folded into the session.
    ChunkProcessed {
        /// Text carried by this chunk, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        delta: Option<String>,
        /// Accumulated content after the chunk.
        content: String,
    },

    /// A buffered or debounced flush drained the buffer.
    BufferProcessed { chunks: usize, content: String },

    /// A malformed chunk was skipped.
    ChunkError { message: String },

    /// The stream ended normally.
    Completed {
        content: String,
        tool_calls: Vec<ToolCallDraft>,
        duration_ms: u64,
    },

    /// The stream ended with an error (including timeout).
    Failed { error: ErrorDetails },

    Paused,

    Resumed,

    Cancelled,

    /// The session's table entry is gone; always the final signal.
    Closed { reason: CloseReason },
}

/// Why a session left the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Completed,
    Error,
    Cancelled,
    Timeout,
    Shutdown,
}
