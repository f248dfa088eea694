use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Payload of the terminal success event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionSummary {
    pub conversation_id: String,
    pub tokens_used: u64,
    pub remaining_tokens: u64,
}

/// Events streamed to the client during a consultation turn.
///
/// Serialized as `{"type": "...", "content": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum StreamEvent {
    Step(String),
    ResponseChunk(String),
    Error(String),
    Completion(CompletionSummary),
}

impl StreamEvent {
    pub fn step(text: impl Into<String>) -> Self {
        StreamEvent::Step(text.into())
    }

    pub fn is_completion(&self) -> bool {
        matches!(self, StreamEvent::Completion(_))
    }
}

/// The receiving side went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("event stream consumer disconnected")]
pub struct Disconnected;

/// Single writer end of a turn's event stream. Dropping it ends the stream.
#[derive(Debug)]
pub struct EventSink {
    sender: mpsc::Sender<StreamEvent>,
}

impl EventSink {
    pub fn new(sender: mpsc::Sender<StreamEvent>) -> Self {
        Self { sender }
    }

    /// Creates a sink and the receiver the transport drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self::new(sender), receiver)
    }

    pub async fn emit(&self, event: StreamEvent) -> Result<(), Disconnected> {
        self.sender.send(event).await.map_err(|_| Disconnected)
    }

    pub async fn step(&self, text: impl Into<String>) -> Result<(), Disconnected> {
        self.emit(StreamEvent::step(text)).await
    }

    /// Resolves once the consumer has dropped its receiver.
    pub async fn closed(&self) {
        self.sender.closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
