//! Persistent client connection to Twitch's IRC-style chat server.
//!
//! [`ChatConnection`] owns one socket, answers keep-alive PINGs on its own
//! and queues every other inbound line as a [`ServerMessage`] for the
//! application to poll.

pub mod config;
pub mod error;
pub mod irc;
pub mod logging;

pub use error::{ChatError, Result};
pub use irc::{
    Channel, ChatConnection, ConnectionSettings, ConnectionState, MessageKind, ServerMessage,
};
