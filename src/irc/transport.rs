//! Line-oriented transport over a single duplex stream.
//!
//! [`TransportSession::open`] connects a TCP socket and splits it into a
//! [`LineReader`], owned by the receive loop, and a [`LineWriter`], shared by
//! every sender. The writer serializes whole lines behind one lock so
//! automatic PONG replies and application commands never interleave.

use crate::error::{ChatError, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

const LINE_TERMINATOR: &str = "\r\n";

/// Longest inbound line accepted. Twitch allows 8 KiB of tags plus a
/// 512 byte message.
pub const MAX_LINE_LEN: usize = 16 * 1024;

pub struct TransportSession {
    reader: LineReader,
    writer: LineWriter,
}

impl TransportSession {
    /// Connect to `host:port`. DNS and socket failures map to
    /// [`ChatError::Connection`]; there is no retry.
    pub async fn open(host: &str, port: u16) -> Result<Self> {
        let addr = format!("{}:{}", host, port);
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|source| ChatError::Connection { addr: addr.clone(), source })?;
        stream.set_nodelay(true).ok();
        tracing::debug!(%addr, "socket open");

        let (read, write) = stream.into_split();
        Ok(Self::from_parts(Box::new(read), Box::new(write)))
    }

    /// Wrap an already established stream (e.g. an in-memory duplex).
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read, write) = tokio::io::split(stream);
        Self::from_parts(Box::new(read), Box::new(write))
    }

    fn from_parts(read: BoxedRead, write: BoxedWrite) -> Self {
        Self {
            reader: LineReader {
                inner: BufReader::new(read),
                buf: Vec::new(),
                scanned: 0,
            },
            writer: LineWriter {
                inner: Arc::new(Mutex::new(Some(write))),
            },
        }
    }

    pub fn split(self) -> (LineReader, LineWriter) {
        (self.reader, self.writer)
    }
}

/// Read half. Dropping it releases the read direction of the socket.
pub struct LineReader {
    inner: BufReader<BoxedRead>,
    buf: Vec<u8>,
    // Prefix of `buf` already known to hold no '\n'.
    scanned: usize,
}

impl LineReader {
    /// Next complete line without its terminator, or `None` once the peer
    /// has closed the stream.
    ///
    /// Cancel safe: a partially read line stays buffered for the next call.
    /// A line longer than [`MAX_LINE_LEN`] fails with
    /// [`ChatError::LineTooLong`].
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(offset) = self.buf[self.scanned..].iter().position(|&b| b == b'\n') {
                let pos = self.scanned + offset;
                let line: Vec<u8> = self.buf.drain(..=pos).collect();
                self.scanned = 0;
                return Ok(Some(decode_line(&line)));
            }
            self.scanned = self.buf.len();
            if self.buf.len() > MAX_LINE_LEN {
                return Err(ChatError::LineTooLong { limit: MAX_LINE_LEN });
            }

            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                // Final line without a terminator.
                let line = std::mem::take(&mut self.buf);
                self.scanned = 0;
                return Ok(Some(decode_line(&line)));
            }
            let consumed = available.len();
            self.buf.extend_from_slice(available);
            self.inner.consume(consumed);
        }
    }
}

fn decode_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(['\r', '\n'])
        .to_string()
}

/// Shared, serialized write half.
#[derive(Clone)]
pub struct LineWriter {
    inner: Arc<Mutex<Option<BoxedWrite>>>,
}

impl LineWriter {
    /// Append the line terminator and flush. The whole line is written under
    /// a single lock acquisition.
    pub async fn write_line(&self, text: &str) -> Result<()> {
        if text.contains(['\r', '\n']) {
            return Err(ChatError::InvalidLine(text.to_string()));
        }

        let mut guard = self.inner.lock().await;
        let writer = guard.as_mut().ok_or(ChatError::NotConnected)?;

        tracing::debug!(">> {}", mask_secret(text));
        let mut line = String::with_capacity(text.len() + LINE_TERMINATOR.len());
        line.push_str(text);
        line.push_str(LINE_TERMINATOR);
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Shut down the write direction and release it. Idempotent.
    pub async fn close(&self) {
        let mut guard = self.inner.lock().await;
        if let Some(mut writer) = guard.take() {
            if let Err(e) = writer.shutdown().await {
                tracing::debug!("shutdown on close failed: {}", e);
            }
        }
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.is_none()
    }
}

fn mask_secret(text: &str) -> &str {
    if text.starts_with("PASS ") {
        "PASS ********"
    } else {
        text
    }
}
