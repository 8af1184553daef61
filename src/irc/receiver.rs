//! Background receive loop.
//!
//! Reads lines from the transport, answers PING with PONG through the shared
//! writer, drops PONG, and queues everything else in receipt order. The loop
//! ends when cancelled, when the server closes the stream, or on a read error.

use crate::error::ChatError;
use crate::irc::message::{MessageKind, ServerMessage};
use crate::irc::queue::MessageQueue;
use crate::irc::transport::{LineReader, LineWriter};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Why the receive loop stopped.
#[derive(Debug)]
pub enum LoopExit {
    /// Stopped by the cancellation token (normal disconnect).
    Cancelled,
    /// The server closed the connection.
    StreamClosed,
    /// Reading from the transport failed.
    Failed(ChatError),
}

impl LoopExit {
    pub fn is_abnormal(&self) -> bool {
        !matches!(self, LoopExit::Cancelled)
    }
}

pub struct ReceiveLoop {
    reader: LineReader,
    writer: LineWriter,
    queue: Arc<MessageQueue>,
    cancel: CancellationToken,
}

impl ReceiveLoop {
    pub fn new(
        reader: LineReader,
        writer: LineWriter,
        queue: Arc<MessageQueue>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            reader,
            writer,
            queue,
            cancel,
        }
    }

    /// Drive inbound traffic until cancelled or the transport fails.
    ///
    /// The read is raced against the cancellation token, so a pending read
    /// never outlives a disconnect. The reader is dropped on return.
    pub async fn run(mut self) -> LoopExit {
        info!("Start listening");
        let exit = loop {
            if self.cancel.is_cancelled() {
                break LoopExit::Cancelled;
            }

            let line = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break LoopExit::Cancelled,
                result = self.reader.read_line() => result,
            };

            match line {
                Ok(Some(line)) => self.handle_line(&line).await,
                Ok(None) => {
                    warn!("Server closed the connection");
                    break LoopExit::StreamClosed;
                }
                Err(e) => {
                    error!("Failed to receive from IRC server: {}", e);
                    break LoopExit::Failed(e);
                }
            }
        };
        info!(?exit, "Stop listening");
        exit
    }

    async fn handle_line(&mut self, line: &str) {
        debug!("<< {}", line);
        let message = ServerMessage::parse(line);

        match message.kind() {
            MessageKind::Pong => {}
            MessageKind::Ping => {
                let token = message.ping_token().unwrap_or_default();
                if let Err(e) = self.writer.write_line(&format!("PONG :{}", token)).await {
                    warn!("Failed to answer PING: {}", e);
                }
            }
            MessageKind::Unknown => {
                debug!(
                    "Unparseable line queued as unknown: {}",
                    message.parse_error().unwrap_or_default()
                );
                self.queue.push(message);
            }
            _ => self.queue.push(message),
        }
    }
}
