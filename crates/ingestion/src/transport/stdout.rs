//! JSON-lines transport writing to standard output.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::error::PublishError;
use crate::publisher::{BusMessage, BusTransport, DeliveryFuture, DeliveryStatus};

/// Default number of lines queued ahead of the writer task.
pub const DEFAULT_LINE_QUEUE: usize = 1024;

enum Command {
    Write(Vec<u8>, oneshot::Sender<DeliveryStatus>),
    Flush(oneshot::Sender<()>),
}

/// Writes each payload as one line, used when no broker is configured.
///
/// Lines are written by a background task fed through a bounded queue, so a
/// slow reader on the other end of the pipe fills the queue and surfaces as
/// [`PublishError::Overloaded`] instead of stalling the caller.
#[derive(Debug)]
pub struct StdoutTransport {
    commands: mpsc::Sender<Command>,
}

impl StdoutTransport {
    /// Write to the process's stdout. Must be called inside a Tokio runtime.
    pub fn new(queue_capacity: usize) -> Self {
        Self::with_writer(tokio::io::stdout(), queue_capacity)
    }

    /// Write to `writer` instead of stdout.
    pub fn with_writer<W>(writer: W, queue_capacity: usize) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (commands, receiver) = mpsc::channel(queue_capacity.max(1));
        tokio::spawn(write_lines(writer, receiver));
        Self { commands }
    }
}

async fn write_lines<W: AsyncWrite + Unpin>(mut writer: W, mut commands: mpsc::Receiver<Command>) {
    let mut offset = 0i64;
    while let Some(command) = commands.recv().await {
        match command {
            Command::Write(payload, delivered) => {
                let written = async {
                    writer.write_all(&payload).await?;
                    writer.write_all(b"\n").await
                }
                .await;
                let status = match written {
                    Ok(()) => {
                        offset += 1;
                        DeliveryStatus::Delivered { partition: 0, offset: offset - 1 }
                    }
                    Err(e) => DeliveryStatus::DeliveryFailed(e.to_string()),
                };
                let _ = delivered.send(status);
            }
            Command::Flush(done) => {
                if let Err(e) = writer.flush().await {
                    warn!("Failed to flush line output: {}", e);
                }
                let _ = done.send(());
            }
        }
    }
}

#[async_trait]
impl BusTransport for StdoutTransport {
    fn send(&self, message: BusMessage) -> Result<DeliveryFuture, PublishError> {
        let (tx, rx) = oneshot::channel();
        match self.commands.try_send(Command::Write(message.payload, tx)) {
            Ok(()) => Ok(Box::pin(async move {
                rx.await.unwrap_or_else(|_| {
                    DeliveryStatus::DeliveryFailed("line writer stopped".to_string())
                })
            })),
            Err(mpsc::error::TrySendError::Full(_)) => Err(PublishError::Overloaded),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(PublishError::Transport("line writer stopped".to_string()))
            }
        }
    }

    async fn flush(&self, timeout: Duration) -> Result<(), PublishError> {
        let (tx, rx) = oneshot::channel();
        let flushed = async {
            self.commands
                .send(Command::Flush(tx))
                .await
                .map_err(|_| PublishError::Transport("line writer stopped".to_string()))?;
            rx.await
                .map_err(|_| PublishError::Transport("line writer stopped".to_string()))
        };
        tokio::time::timeout(timeout, flushed)
            .await
            .map_err(|_| PublishError::Transport(format!("flush timed out after {timeout:?}")))?
    }
}
