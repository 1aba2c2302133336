//! Outbound events for the presentation layer.

use tokio::sync::mpsc;

use crate::{ConnectionStatus, SessionId};

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Raw terminal output, including formatted lifecycle messages.
    Output { session_id: SessionId, data: Vec<u8> },
    /// A status transition, scoped to the tab that owns the session.
    StatusChanged {
        tab_id: String,
        session_id: SessionId,
        status: ConnectionStatus,
        error_message: Option<String>,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> &str {
        match self {
            Self::Output { session_id, .. } | Self::StatusChanged { session_id, .. } => session_id,
        }
    }
}

/// Receiver of session events. Called from reader threads and runtime
/// tasks, so implementations must not block.
pub trait EventSink: Send + Sync + 'static {
    fn emit(&self, event: SessionEvent);
}

/// Forwards events into an unbounded tokio channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Event receiver dropped, discarding event");
        }
    }
}
