//! Error types for the chat connection.
//!
//! Every failure is contained to the connection instance that produced it;
//! nothing in the core is fatal to the process.

/// Errors produced by the connection core.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// Socket open or write failure.
    #[error("Connection to {addr} failed: {source}")]
    Connection {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Reading or writing on an established session failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the connection.
    #[error("Connection closed by server")]
    StreamClosed,

    /// An outbound command was issued with no open session.
    #[error("Not connected")]
    NotConnected,

    /// An outbound line would not fit in a single protocol line.
    #[error("Invalid outbound line: {0}")]
    InvalidLine(String),

    /// The peer sent more than `limit` bytes without a line terminator.
    #[error("Inbound line exceeds {limit} bytes")]
    LineTooLong { limit: usize },
}

pub type Result<T> = std::result::Result<T, ChatError>;
