//! Session table and event routing.
//!
//! The manager owns one [`SessionHandle`] per conversation and routes the
//! four transport events (start, chunk, end, error) to the right actor,
//! creating sessions on demand for start and chunk. Error events also
//! feed the attached recovery coordinator, session or not.
//!
//! Actors remove their own table entries on terminal transitions, so a
//! conversation key disappearing from the table is the authoritative
//! "session over" signal.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use ulid::Ulid;

use super::actor::SessionActor;
use super::actor_types::{
    SessionCallbacks, SessionOptions, SessionStatus, SessionView, SESSION_ID_PREFIX,
    STREAM_OPERATION,
};
use super::handle::SessionHandle;
use super::signals::{StreamSignal, StreamSignalPayload};
use crate::chunk::ToolCallDraft;
use crate::config::StreamingConfig;
use crate::recovery::{classify, RecoveryCoordinator};

/// Creates, routes to, and destroys streaming sessions.
///
/// Cloning is cheap; clones share the session table and shutdown
/// signal.
#[derive(Clone)]
pub struct SessionManager {
    config: StreamingConfig,
    handles: Arc<DashMap<String, SessionHandle>>,
    task_handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    signal_tx: mpsc::UnboundedSender<StreamSignal>,
    recovery: Option<Arc<RecoveryCoordinator>>,
}

impl SessionManager {
    /// Create a manager and the receiver for its session signals.
    #[must_use]
    pub fn new(config: StreamingConfig) -> (Self, mpsc::UnboundedReceiver<StreamSignal>) {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let manager = Self {
            config,
            handles: Arc::new(DashMap::new()),
            task_handles: Arc::new(Mutex::new(Vec::new())),
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
            signal_tx,
            recovery: None,
        };
        (manager, signal_rx)
    }

    /// Create a manager bridged to a recovery coordinator. Error events
    /// are routed to both the session and the coordinator.
    #[must_use]
    pub fn with_recovery(
        config: StreamingConfig,
        recovery: Arc<RecoveryCoordinator>,
    ) -> (Self, mpsc::UnboundedReceiver<StreamSignal>) {
        let (mut manager, signal_rx) = Self::new(config);
        manager.recovery = Some(recovery);
        (manager, signal_rx)
    }

    // ------------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------------

    /// Create a session for a conversation with default options.
    ///
    /// Returns the session id. If the conversation already has a live
    /// session, that session's id is returned instead of erroring.
    pub async fn create_session(&self, conversation_id: &str) -> String {
        self.create_session_with(conversation_id, SessionOptions::default())
            .await
    }

    /// Create a session with explicit options.
    pub async fn create_session_with(
        &self,
        conversation_id: &str,
        options: SessionOptions,
    ) -> String {
        let mut created = None;

        let id = match self.handles.entry(conversation_id.to_string()) {
            Entry::Occupied(entry) => entry.get().id().to_string(),
            Entry::Vacant(entry) => {
                let id = format!("{SESSION_ID_PREFIX}{}", Ulid::new());
                let mut config = self.config.clone();
                if let Some(delivery) = options.delivery {
                    config.delivery = delivery;
                }

                let (command_tx, task_handle) = SessionActor::spawn(
                    id.clone(),
                    conversation_id.to_string(),
                    config,
                    options.callbacks,
                    self.signal_tx.clone(),
                    self.recovery.clone(),
                    Arc::clone(&self.handles),
                    self.shutdown_rx.clone(),
                );
                entry.insert(SessionHandle::new(command_tx, id.clone(), conversation_id));
                created = Some(task_handle);
                id
            }
        };

        if let Some(task_handle) = created {
            let mut tasks = self.task_handles.lock().await;
            tasks.retain(|t| !t.is_finished());
            tasks.push(task_handle);
            drop(tasks);

            debug!(session_id = %id, conversation_id, "Session created");
            let _ = self.signal_tx.send(StreamSignal::new(
                id.clone(),
                conversation_id,
                StreamSignalPayload::Created,
            ));
        }
        id
    }

    /// Route a stream-start event, creating the session if needed.
    pub async fn handle_start(&self, conversation_id: &str) {
        self.create_session(conversation_id).await;
        if let Some(handle) = self.get(conversation_id) {
            if handle.start().await.is_err() {
                debug!(conversation_id, "Start raced session teardown");
            }
        }
    }

    /// Route one raw chunk, creating the session if needed.
    pub async fn handle_chunk(&self, conversation_id: &str, chunk: Value) {
        self.create_session(conversation_id).await;
        if let Some(handle) = self.get(conversation_id) {
            if handle.chunk(chunk).await.is_err() {
                debug!(conversation_id, "Chunk raced session teardown");
            }
        }
    }

    /// Route a stream-end event. Returns false when no session exists.
    pub async fn handle_end(&self, conversation_id: &str, final_message: Option<String>) -> bool {
        match self.get(conversation_id) {
            Some(handle) => handle.end(final_message).await.is_ok(),
            None => false,
        }
    }

    /// Route an error event.
    ///
    /// The error is classified, the conversation's session (if any) is
    /// failed and destroyed, and the record is handed to the recovery
    /// coordinator in the background. Returns false when no session
    /// existed; the coordinator still runs.
    pub async fn handle_error(&self, conversation_id: &str, error: &str) -> bool {
        let details = match &self.recovery {
            Some(recovery) => recovery.classify(error),
            None => classify(error),
        }
        .with_conversation(conversation_id)
        .with_operation(STREAM_OPERATION);

        let failed = match self.get(conversation_id) {
            Some(handle) => handle.fail(details.clone()).await.is_ok(),
            None => false,
        };

        if let Some(recovery) = &self.recovery {
            let recovery = Arc::clone(recovery);
            tokio::spawn(async move {
                let _ = recovery.handle_error(details).await;
            });
        }
        failed
    }

    /// Pause a streaming session. False when absent or not streaming.
    pub async fn pause(&self, conversation_id: &str) -> bool {
        match self.get(conversation_id) {
            Some(handle) => handle.pause().await.unwrap_or(false),
            None => false,
        }
    }

    /// Resume a paused session. False when absent or not paused.
    pub async fn resume(&self, conversation_id: &str) -> bool {
        match self.get(conversation_id) {
            Some(handle) => handle.resume().await.unwrap_or(false),
            None => false,
        }
    }

    /// Cancel a session immediately, skipping callbacks. False when
    /// absent.
    pub async fn cancel(&self, conversation_id: &str) -> bool {
        match self.get(conversation_id) {
            Some(handle) => handle.cancel().await.is_ok(),
            None => false,
        }
    }

    /// Replace a session's callbacks. False when absent.
    pub async fn set_callbacks(
        &self,
        conversation_id: &str,
        callbacks: SessionCallbacks,
    ) -> bool {
        match self.get(conversation_id) {
            Some(handle) => handle.set_callbacks(callbacks).await.is_ok(),
            None => false,
        }
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Current status of a conversation's session.
    pub async fn status(&self, conversation_id: &str) -> Option<SessionStatus> {
        Some(self.view(conversation_id).await?.status)
    }

    /// Accumulated content of a conversation's session.
    pub async fn content(&self, conversation_id: &str) -> Option<String> {
        Some(self.view(conversation_id).await?.content)
    }

    /// Assembled tool calls of a conversation's session.
    pub async fn tool_calls(&self, conversation_id: &str) -> Option<Vec<ToolCallDraft>> {
        Some(self.view(conversation_id).await?.tool_calls)
    }

    /// True when the conversation has a live session.
    #[must_use]
    pub fn has_session(&self, conversation_id: &str) -> bool {
        self.handles.contains_key(conversation_id)
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// True when no sessions are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Conversation ids with live sessions.
    #[must_use]
    pub fn conversations(&self) -> Vec<String> {
        self.handles.iter().map(|e| e.key().clone()).collect()
    }

    // ------------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------------

    /// Stop all session actors and wait for them.
    pub async fn shutdown(&self) {
        info!("Shutting down session manager");
        let _ = self.shutdown_tx.send(true);

        let handles = std::mem::take(&mut *self.task_handles.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Session actor panicked during shutdown: {e}");
            }
        }
    }

    fn get(&self, conversation_id: &str) -> Option<SessionHandle> {
        self.handles.get(conversation_id).map(|r| r.clone())
    }

    async fn view(&self, conversation_id: &str) -> Option<SessionView> {
        let handle = self.get(conversation_id)?;
        handle.inspect().await.ok()
    }
}
