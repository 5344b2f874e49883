use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Conversation lifecycle events published while a turn is in flight.
///
/// `TextFlush` carries the full accumulated text so far, not a delta, so a
/// late subscriber can render the current state from any single event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SessionEvent {
    TurnStarted,
    TextFlush { content: String },
    TurnCompleted { content: String },
    TurnFailed { message: String },
    TurnCancelled,
    #[serde(other)]
    Unknown,
}

pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: SessionEvent) -> usize {
        let receivers = self.sender.send(event).unwrap_or(0);
        debug!(receivers, "session event published");
        receivers
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
