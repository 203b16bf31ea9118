//! Per-session actor.
//!
//! Each streaming session runs as its own task that owns all session
//! state. Mutation happens only on command delivery or when one of the
//! actor's timers fires, so chunk ordering and flush atomicity need no
//! locking. The two timers are owned by the select loop: the inactivity
//! watchdog (armed from creation, refreshed by activity) and the debounce
//! flush deadline (armed per chunk in debounced mode).
//!
//! The actor removes its own table entry before answering any terminal
//! command, so a caller that observes the reply also observes the session
//! gone.

use std::future::pending;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use super::actor_types::{
    SessionCallbacks, SessionCommand, SessionStatus, SessionView, CHANNEL_CAPACITY,
    STREAM_OPERATION,
};
use super::handle::SessionHandle;
use super::signals::{CloseReason, StreamSignal, StreamSignalPayload};
use crate::chunk::{apply_tool_call_deltas, decode_chunk};
use crate::config::{DeliveryMode, StreamingConfig};
use crate::recovery::{ErrorCategory, ErrorDetails, RecoveryCoordinator};

enum Flow {
    Continue,
    Stop,
}

pub(crate) struct SessionActor {
    id: String,
    conversation_id: String,
    config: StreamingConfig,
    status: SessionStatus,
    content: String,
    buffer: Vec<Value>,
    tool_calls: Vec<crate::chunk::ToolCallDraft>,
    error: Option<ErrorDetails>,
    callbacks: SessionCallbacks,
    started_at: Instant,
    last_activity: Instant,
    debounce_deadline: Option<Instant>,
    command_rx: mpsc::Receiver<SessionCommand>,
    shutdown_rx: watch::Receiver<bool>,
    signal_tx: mpsc::UnboundedSender<StreamSignal>,
    recovery: Option<Arc<RecoveryCoordinator>>,
    handles: Arc<DashMap<String, SessionHandle>>,
}

impl SessionActor {
    /// Spawn a session actor and return its command channel and task.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn spawn(
        id: String,
        conversation_id: String,
        config: StreamingConfig,
        callbacks: SessionCallbacks,
        signal_tx: mpsc::UnboundedSender<StreamSignal>,
        recovery: Option<Arc<RecoveryCoordinator>>,
        handles: Arc<DashMap<String, SessionHandle>>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> (mpsc::Sender<SessionCommand>, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let now = Instant::now();

        let actor = Self {
            id,
            conversation_id,
            config,
            status: SessionStatus::Idle,
            content: String::new(),
            buffer: Vec::new(),
            tool_calls: Vec::new(),
            error: None,
            callbacks,
            started_at: now,
            last_activity: now,
            debounce_deadline: None,
            command_rx,
            shutdown_rx,
            signal_tx,
            recovery,
            handles,
        };

        let task_handle = tokio::spawn(actor.run());
        (command_tx, task_handle)
    }

    async fn run(mut self) {
        debug!(session_id = %self.id, "Session actor started");
        self.command_loop().await;
        debug!(session_id = %self.id, "Session actor stopped");
    }

    async fn command_loop(&mut self) {
        loop {
            let watchdog_at = self.last_activity + self.config.streaming_timeout();
            let debounce_at = self.debounce_deadline;

            // Biased so an expired flush deadline is honored before the
            // command that arrived after it.
            tokio::select! {
                biased;

                changed = self.shutdown_rx.changed() => {
                    // A dropped sender means the manager is gone.
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        self.drain_commands();
                        self.teardown(CloseReason::Shutdown);
                        break;
                    }
                }
                _ = async {
                    match debounce_at {
                        Some(at) => sleep_until(at).await,
                        None => pending().await,
                    }
                } => {
                    self.debounce_deadline = None;
                    self.flush_buffer(true);
                }
                _ = sleep_until(watchdog_at) => {
                    self.on_timeout();
                    break;
                }
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if matches!(self.handle_command(cmd), Flow::Stop) {
                                break;
                            }
                        }
                        // All handles dropped; nothing can reach us again.
                        None => {
                            self.teardown(CloseReason::Shutdown);
                            break;
                        }
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Command handling
    // ------------------------------------------------------------------------

    fn handle_command(&mut self, cmd: SessionCommand) -> Flow {
        match cmd {
            SessionCommand::Start { reply } => {
                self.on_start();
                let _ = reply.send(());
                Flow::Continue
            }
            SessionCommand::Chunk { raw, reply } => {
                self.on_chunk(raw);
                let _ = reply.send(());
                Flow::Continue
            }
            SessionCommand::End {
                final_message,
                reply,
            } => {
                self.on_end(final_message);
                let _ = reply.send(());
                Flow::Stop
            }
            SessionCommand::Fail { details, reply } => {
                self.on_fail(details);
                let _ = reply.send(());
                Flow::Stop
            }
            SessionCommand::Pause { reply } => {
                let paused = self.on_pause();
                let _ = reply.send(paused);
                Flow::Continue
            }
            SessionCommand::Resume { reply } => {
                let resumed = self.on_resume();
                let _ = reply.send(resumed);
                Flow::Continue
            }
            SessionCommand::Cancel { reply } => {
                self.on_cancel();
                let _ = reply.send(());
                Flow::Stop
            }
            SessionCommand::Inspect { reply } => {
                let _ = reply.send(self.view());
                Flow::Continue
            }
            SessionCommand::SetCallbacks { callbacks, reply } => {
                self.callbacks = callbacks;
                let _ = reply.send(());
                Flow::Continue
            }
        }
    }

    fn on_start(&mut self) {
        self.last_activity = Instant::now();
        if self.status == SessionStatus::Idle {
            self.status = SessionStatus::Streaming;
            debug!(session_id = %self.id, "Session streaming");
            self.emit(StreamSignalPayload::Started);
        }
    }

    fn on_chunk(&mut self, raw: Value) {
        self.last_activity = Instant::now();
        if self.status == SessionStatus::Idle {
            self.status = SessionStatus::Streaming;
            self.emit(StreamSignalPayload::Started);
        }

        self.buffer.push(raw);

        // Paused sessions only accumulate; resume re-evaluates the
        // strategy.
        if self.status == SessionStatus::Paused {
            return;
        }

        match self.config.delivery {
            DeliveryMode::Immediate => self.flush_buffer(false),
            DeliveryMode::Buffered => {
                if self.buffer.len() >= self.config.buffer_size {
                    self.flush_buffer(true);
                }
            }
            DeliveryMode::Debounced => {
                self.debounce_deadline = Some(Instant::now() + self.config.debounce());
            }
        }
    }

    fn on_end(&mut self, final_message: Option<String>) {
        self.last_activity = Instant::now();
        self.flush_buffer(true);

        if self.content.is_empty() {
            if let Some(message) = final_message {
                self.content = message;
            }
        }

        self.status = SessionStatus::Completed;
        let duration_ms = self.started_at.elapsed().as_millis() as u64;
        debug!(session_id = %self.id, duration_ms, "Session completed");

        self.run_complete_callback();
        self.emit(StreamSignalPayload::Completed {
            content: self.content.clone(),
            tool_calls: self.tool_calls.clone(),
            duration_ms,
        });
        self.teardown(CloseReason::Completed);
    }

    fn on_fail(&mut self, details: ErrorDetails) {
        self.status = SessionStatus::Error;
        self.error = Some(details.clone());
        warn!(session_id = %self.id, code = details.code, "Session failed");

        self.run_error_callback(&details);
        self.emit(StreamSignalPayload::Failed { error: details });
        self.teardown(CloseReason::Error);
    }

    fn on_timeout(&mut self) {
        let timeout_ms = self.config.streaming_timeout_ms;
        warn!(session_id = %self.id, timeout_ms, "Session timed out");

        let details = ErrorDetails::new(
            ErrorCategory::Timeout,
            format!("streaming timeout: no activity for {timeout_ms}ms"),
        )
        .with_conversation(self.conversation_id.clone())
        .with_operation(STREAM_OPERATION);

        self.status = SessionStatus::Error;
        self.error = Some(details.clone());

        self.run_error_callback(&details);
        self.emit(StreamSignalPayload::Failed {
            error: details.clone(),
        });

        if let Some(recovery) = &self.recovery {
            let recovery = Arc::clone(recovery);
            tokio::spawn(async move {
                let _ = recovery.handle_error(details).await;
            });
        }

        self.teardown(CloseReason::Timeout);
    }

    fn on_pause(&mut self) -> bool {
        if self.status != SessionStatus::Streaming {
            return false;
        }
        self.status = SessionStatus::Paused;
        self.debounce_deadline = None;
        debug!(session_id = %self.id, "Session paused");
        self.emit(StreamSignalPayload::Paused);
        true
    }

    fn on_resume(&mut self) -> bool {
        if self.status != SessionStatus::Paused {
            return false;
        }
        self.status = SessionStatus::Streaming;
        debug!(session_id = %self.id, "Session resumed");
        self.emit(StreamSignalPayload::Resumed);

        match self.config.delivery {
            DeliveryMode::Immediate => {
                if !self.buffer.is_empty() {
                    self.flush_buffer(true);
                }
            }
            DeliveryMode::Buffered => {
                if self.buffer.len() >= self.config.buffer_size {
                    self.flush_buffer(true);
                }
            }
            DeliveryMode::Debounced => {
                if !self.buffer.is_empty() {
                    self.debounce_deadline = Some(Instant::now() + self.config.debounce());
                }
            }
        }
        true
    }

    fn on_cancel(&mut self) {
        debug!(session_id = %self.id, "Session cancelled");
        self.emit(StreamSignalPayload::Cancelled);
        self.teardown(CloseReason::Cancelled);
    }

    fn view(&self) -> SessionView {
        SessionView {
            status: self.status,
            content: self.content.clone(),
            tool_calls: self.tool_calls.clone(),
            error: self.error.clone(),
        }
    }

    // ------------------------------------------------------------------------
    // Flushing
    // ------------------------------------------------------------------------

    /// Drain and process the buffer as one atomic step.
    ///
    /// The buffer is swapped out before processing, so a competing flush
    /// trigger sees it already empty and no chunk is handled twice.
    fn flush_buffer(&mut self, batched: bool) {
        self.debounce_deadline = None;
        if self.buffer.is_empty() {
            return;
        }

        let chunks = std::mem::take(&mut self.buffer);
        let drained = chunks.len();

        for raw in &chunks {
            match decode_chunk(raw) {
                Ok(payload) => {
                    if payload.is_empty() {
                        continue;
                    }
                    let delta = payload.content;
                    if let Some(text) = &delta {
                        self.content.push_str(text);
                        self.run_chunk_callback(text);
                    }
                    apply_tool_call_deltas(&mut self.tool_calls, &payload.tool_calls);
                    self.emit(StreamSignalPayload::ChunkProcessed {
                        delta,
                        content: self.content.clone(),
                    });
                }
                Err(e) => {
                    warn!(session_id = %self.id, "Skipping malformed chunk: {e}");
                    self.emit(StreamSignalPayload::ChunkError {
                        message: e.to_string(),
                    });
                }
            }
        }

        if batched {
            self.emit(StreamSignalPayload::BufferProcessed {
                chunks: drained,
                content: self.content.clone(),
            });
        }
    }

    // ------------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------------

    /// Remove the table entry and announce the close. Always the last
    /// thing a session does.
    fn teardown(&mut self, reason: CloseReason) {
        self.handles.remove(self.conversation_id.as_str());
        self.emit(StreamSignalPayload::Closed { reason });
    }

    /// Answer anything still queued so callers do not block on a dying
    /// actor.
    fn drain_commands(&mut self) {
        while let Ok(cmd) = self.command_rx.try_recv() {
            match cmd {
                SessionCommand::Start { reply } => {
                    let _ = reply.send(());
                }
                SessionCommand::Chunk { reply, .. } => {
                    let _ = reply.send(());
                }
                SessionCommand::End { reply, .. } => {
                    let _ = reply.send(());
                }
                SessionCommand::Fail { reply, .. } => {
                    let _ = reply.send(());
                }
                SessionCommand::Pause { reply } => {
                    let _ = reply.send(false);
                }
                SessionCommand::Resume { reply } => {
                    let _ = reply.send(false);
                }
                SessionCommand::Cancel { reply } => {
                    let _ = reply.send(());
                }
                SessionCommand::Inspect { reply } => {
                    let _ = reply.send(self.view());
                }
                SessionCommand::SetCallbacks { reply, .. } => {
                    let _ = reply.send(());
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Callbacks & signals
    // ------------------------------------------------------------------------

    fn run_chunk_callback(&self, delta: &str) {
        if let Some(cb) = &self.callbacks.on_chunk {
            if catch_unwind(AssertUnwindSafe(|| cb(delta))).is_err() {
                warn!(session_id = %self.id, "Chunk callback panicked");
            }
        }
    }

    fn run_complete_callback(&self) {
        if let Some(cb) = &self.callbacks.on_complete {
            if catch_unwind(AssertUnwindSafe(|| cb(&self.content, &self.tool_calls))).is_err() {
                warn!(session_id = %self.id, "Complete callback panicked");
            }
        }
    }

    fn run_error_callback(&self, details: &ErrorDetails) {
        if let Some(cb) = &self.callbacks.on_error {
            if catch_unwind(AssertUnwindSafe(|| cb(details))).is_err() {
                warn!(session_id = %self.id, "Error callback panicked");
            }
        }
    }

    fn emit(&self, payload: StreamSignalPayload) {
        let _ = self.signal_tx.send(StreamSignal::new(
            self.id.clone(),
            self.conversation_id.clone(),
            payload,
        ));
    }
}
