//! Cheap-clone handle to a session actor.
//!
//! A handle owns nothing but the actor's command channel and identity, so
//! the manager's table can hand out clones freely. Every method is a
//! command round trip; [`ActorError::ActorShutdown`] means the actor is
//! gone, which for terminal sessions is the expected end of life.

use std::fmt;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use super::actor_types::{
    ActorError, SessionCallbacks, SessionCommand, SessionView,
};
use crate::recovery::ErrorDetails;

#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
    id: String,
    conversation_id: String,
}

impl SessionHandle {
    pub(crate) fn new(
        tx: mpsc::Sender<SessionCommand>,
        id: impl Into<String>,
        conversation_id: impl Into<String>,
    ) -> Self {
        Self {
            tx,
            id: id.into(),
            conversation_id: conversation_id.into(),
        }
    }

    /// The session's generated id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The conversation this session belongs to.
    #[must_use]
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Promote the session to streaming.
    pub async fn start(&self) -> Result<(), ActorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Start { reply: reply_tx })
            .await
            .map_err(|_| ActorError::ActorShutdown)?;
        reply_rx.await.map_err(|_| ActorError::ActorShutdown)
    }

    /// Deliver one raw provider chunk.
    pub async fn chunk(&self, raw: Value) -> Result<(), ActorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Chunk {
                raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ActorError::ActorShutdown)?;
        reply_rx.await.map_err(|_| ActorError::ActorShutdown)
    }

    /// Finish the stream.
    pub async fn end(&self, final_message: Option<String>) -> Result<(), ActorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::End {
                final_message,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ActorError::ActorShutdown)?;
        reply_rx.await.map_err(|_| ActorError::ActorShutdown)
    }

    /// Fail the stream with a classified error.
    pub async fn fail(&self, details: ErrorDetails) -> Result<(), ActorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Fail {
                details,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ActorError::ActorShutdown)?;
        reply_rx.await.map_err(|_| ActorError::ActorShutdown)
    }

    /// Suspend flushing. False unless the session was streaming.
    pub async fn pause(&self) -> Result<bool, ActorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Pause { reply: reply_tx })
            .await
            .map_err(|_| ActorError::ActorShutdown)?;
        reply_rx.await.map_err(|_| ActorError::ActorShutdown)
    }

    /// Resume flushing. False unless the session was paused.
    pub async fn resume(&self) -> Result<bool, ActorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Resume { reply: reply_tx })
            .await
            .map_err(|_| ActorError::ActorShutdown)?;
        reply_rx.await.map_err(|_| ActorError::ActorShutdown)
    }

    /// Drop the session immediately, skipping callbacks.
    pub async fn cancel(&self) -> Result<(), ActorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Cancel { reply: reply_tx })
            .await
            .map_err(|_| ActorError::ActorShutdown)?;
        reply_rx.await.map_err(|_| ActorError::ActorShutdown)
    }

    /// Snapshot the session's observable state.
    pub async fn inspect(&self) -> Result<SessionView, ActorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Inspect { reply: reply_tx })
            .await
            .map_err(|_| ActorError::ActorShutdown)?;
        reply_rx.await.map_err(|_| ActorError::ActorShutdown)
    }

    /// Replace the session's callbacks.
    pub async fn set_callbacks(&self, callbacks: SessionCallbacks) -> Result<(), ActorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::SetCallbacks {
                callbacks,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ActorError::ActorShutdown)?;
        reply_rx.await.map_err(|_| ActorError::ActorShutdown)
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("conversation_id", &self.conversation_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::actor::SessionActor;
    use crate::session::actor_types::SessionStatus;
    use crate::session::signals::StreamSignal;
    use dashmap::DashMap;
    use std::sync::Arc;
    use tokio::sync::watch;
    use tokio::task::JoinHandle;

    fn create_test_handle() -> (
        SessionHandle,
        tokio::sync::mpsc::UnboundedReceiver<StreamSignal>,
        watch::Sender<bool>,
        JoinHandle<()>,
    ) {
        let (signal_tx, signal_rx) = tokio::sync::mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = Arc::new(DashMap::new());

        let (command_tx, task_handle) = SessionActor::spawn(
            "stream_h".to_string(),
            "conv-h".to_string(),
            crate::config::StreamingConfig::default(),
            SessionCallbacks::default(),
            signal_tx,
            None,
            Arc::clone(&handles),
            shutdown_rx,
        );
        let handle = SessionHandle::new(command_tx, "stream_h", "conv-h");
        handles.insert("conv-h".to_string(), handle.clone());

        (handle, signal_rx, shutdown_tx, task_handle)
    }

    #[tokio::test]
    async fn accessors_expose_identity() {
        let (handle, _rx, _shutdown, _task) = create_test_handle();

        assert_eq!(handle.id(), "stream_h");
        assert_eq!(handle.conversation_id(), "conv-h");
        assert!(format!("{handle:?}").contains("stream_h"));
    }

    #[tokio::test]
    async fn commands_round_trip() {
        let (handle, _rx, _shutdown, _task) = create_test_handle();

        handle.start().await.unwrap();
        let view = handle.inspect().await.unwrap();
        assert_eq!(view.status, SessionStatus::Streaming);
    }

    #[tokio::test]
    async fn commands_after_terminal_report_shutdown() {
        let (handle, _rx, _shutdown, task) = create_test_handle();

        handle.cancel().await.unwrap();
        task.await.unwrap();

        assert!(matches!(
            handle.start().await,
            Err(ActorError::ActorShutdown)
        ));
        assert!(matches!(
            handle.inspect().await,
            Err(ActorError::ActorShutdown)
        ));
    }
}
