// src/hardware/channel.rs - Bounded FIFO between the scheduler and the transport
use thiserror::Error;
use tokio::sync::mpsc;

use crate::gcode::MovementCommand;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Command channel closed")]
pub struct ChannelClosed;

#[derive(Debug, Error, PartialEq)]
pub enum TryEnqueueError {
    #[error("Command channel full")]
    Full(MovementCommand),
    #[error("Command channel closed")]
    Closed(MovementCommand),
}

/// Create a channel that holds at most `capacity` commands.
///
/// # Panics
///
/// Panics when `capacity` is zero; configuration validation rejects that.
pub fn command_channel(capacity: usize) -> (CommandSender, CommandReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (CommandSender { tx }, CommandReceiver { rx })
}

/// Producer half, owned by the scheduling task.
#[derive(Debug)]
pub struct CommandSender {
    tx: mpsc::Sender<MovementCommand>,
}

impl CommandSender {
    /// Queue a command, waiting while the channel is full. Fails only when
    /// the transport side is gone.
    pub async fn enqueue(&self, command: MovementCommand) -> Result<(), ChannelClosed> {
        self.tx.send(command).await.map_err(|_| ChannelClosed)
    }

    pub fn try_enqueue(&self, command: MovementCommand) -> Result<(), TryEnqueueError> {
        self.tx.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(c) => TryEnqueueError::Full(c),
            mpsc::error::TrySendError::Closed(c) => TryEnqueueError::Closed(c),
        })
    }

    /// Commands currently waiting for the transport.
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Signal that no more commands follow. Queued commands are still delivered.
    pub fn close(self) {}
}

/// Consumer half, owned by the transport task.
#[derive(Debug)]
pub struct CommandReceiver {
    rx: mpsc::Receiver<MovementCommand>,
}

impl CommandReceiver {
    /// Next command in FIFO order; `None` once the sender closed and the queue is drained.
    pub async fn dequeue(&mut self) -> Option<MovementCommand> {
        self.rx.recv().await
    }
}
