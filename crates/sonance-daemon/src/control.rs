//! Shared handle the control surfaces use to reach the engine.

use std::sync::Arc;

use sonance_core::{AudioCommand, AudioState, BusPublisher, Error, InputEvent, Result, SourceId, StatusBoard};
use tokio::sync::{broadcast, oneshot};

/// Publishes direct commands and reads snapshots.
///
/// Cheap to clone; every HTTP, IPC and D-Bus request holds one.
#[derive(Debug, Clone)]
pub struct Controller {
    publisher: BusPublisher,
    board: StatusBoard,
    step: u8,
}

impl Controller {
    #[must_use]
    pub fn new(publisher: BusPublisher, board: StatusBoard, step: u8) -> Self {
        Self { publisher, board, step }
    }

    /// Latest published state.
    #[must_use]
    pub fn state(&self) -> Arc<AudioState> {
        self.board.snapshot()
    }

    /// Stream of published states.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<AudioState>> {
        self.board.subscribe()
    }

    /// Volume step used when a caller gives none.
    #[must_use]
    pub fn step(&self) -> u8 {
        self.step
    }

    /// Queue a command without waiting for it.
    ///
    /// Commands from one caller reach the engine in the order `submit` is
    /// called. The receiver yields the dispatcher's answer.
    pub fn submit(&self, source: SourceId, command: AudioCommand) -> oneshot::Receiver<Result<AudioState>> {
        let (event, reply) = InputEvent::direct(source, command);
        self.publisher.publish(event);
        reply
    }

    /// Queue a command and wait for the dispatcher's answer.
    ///
    /// # Errors
    /// Returns the dispatcher's error, or [`Error::CommandDropped`] if the
    /// engine went away before answering.
    pub async fn execute(&self, source: SourceId, command: AudioCommand) -> Result<AudioState> {
        answer(self.submit(source, command)).await
    }
}

/// Wait for a submitted command's answer.
///
/// # Errors
/// Returns the dispatcher's error, or [`Error::CommandDropped`] if the reply
/// channel closed unanswered.
pub async fn answer(reply: oneshot::Receiver<Result<AudioState>>) -> Result<AudioState> {
    reply.await.unwrap_or(Err(Error::CommandDropped))
}
