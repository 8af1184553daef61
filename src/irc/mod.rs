//! Chat protocol layer: transport, receive loop, message queue and the
//! connection controller built on top of them.

pub mod commands;
pub mod connection;
pub mod message;
pub mod queue;
pub mod receiver;
pub mod transport;

pub use connection::{Channel, ChatConnection, ConnectionSettings, ConnectionState};
pub use message::{MessageKind, ServerMessage};
