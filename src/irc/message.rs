//! Inbound line classification.
//!
//! Wraps the `irc` crate's protocol parser and tags each line with a
//! [`MessageKind`] used for dispatch. Parsing never fails: lines the parser
//! rejects are kept as [`MessageKind::Unknown`] together with the reason.

use chrono::{DateTime, Local};
use irc::proto::{Command, Message};

/// Dispatch tag of an inbound line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Server keep-alive check; answered by the receive loop, never queued.
    Ping,
    /// Keep-alive acknowledgement; dropped by the receive loop.
    Pong,
    /// A PRIVMSG to a channel or user.
    Chat,
    Join,
    Part,
    Notice,
    /// Numeric server reply (`001`, `353`, ...).
    Numeric,
    /// Any other well-formed command (e.g. Twitch's `USERSTATE`, `CLEARCHAT`).
    Other,
    /// The line could not be parsed.
    Unknown,
}

/// One inbound protocol line, classified.
#[derive(Debug, Clone)]
pub struct ServerMessage {
    kind: MessageKind,
    raw: String,
    parsed: Option<Message>,
    parse_error: Option<String>,
    received_at: DateTime<Local>,
}

impl ServerMessage {
    /// Classify a raw line. The line terminator, if present, is stripped.
    pub fn parse(line: &str) -> Self {
        let raw = line.trim_end_matches(['\r', '\n']).to_string();
        let received_at = Local::now();

        match raw.parse::<Message>() {
            Ok(message) => Self {
                kind: classify(&message.command),
                raw,
                parsed: Some(message),
                parse_error: None,
                received_at,
            },
            Err(e) => Self {
                kind: MessageKind::Unknown,
                raw,
                parsed: None,
                parse_error: Some(e.to_string()),
                received_at,
            },
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// The line as received, without its terminator.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn parsed(&self) -> Option<&Message> {
        self.parsed.as_ref()
    }

    /// Why the parser rejected the line, for [`MessageKind::Unknown`].
    pub fn parse_error(&self) -> Option<&str> {
        self.parse_error.as_deref()
    }

    pub fn received_at(&self) -> DateTime<Local> {
        self.received_at
    }

    /// Nickname from the message prefix (`nick!user@host`).
    pub fn source_nick(&self) -> Option<&str> {
        self.parsed.as_ref()?.source_nickname()
    }

    /// First parameter: the channel or user the command addresses.
    pub fn target(&self) -> Option<&str> {
        match &self.parsed.as_ref()?.command {
            Command::PRIVMSG(target, _) | Command::NOTICE(target, _) => Some(target),
            Command::JOIN(chanlist, _, _) | Command::PART(chanlist, _) => Some(chanlist),
            _ => None,
        }
    }

    /// Trailing text of a PRIVMSG or NOTICE.
    pub fn text(&self) -> Option<&str> {
        match &self.parsed.as_ref()?.command {
            Command::PRIVMSG(_, text) | Command::NOTICE(_, text) => Some(text),
            _ => None,
        }
    }

    /// Payload a PING expects echoed back in the PONG.
    pub fn ping_token(&self) -> Option<&str> {
        match &self.parsed.as_ref()?.command {
            Command::PING(token, _) => Some(token),
            _ => None,
        }
    }
}

fn classify(command: &Command) -> MessageKind {
    match command {
        Command::PING(_, _) => MessageKind::Ping,
        Command::PONG(_, _) => MessageKind::Pong,
        Command::PRIVMSG(_, _) => MessageKind::Chat,
        Command::JOIN(_, _, _) => MessageKind::Join,
        Command::PART(_, _) => MessageKind::Part,
        Command::NOTICE(_, _) => MessageKind::Notice,
        Command::Response(_, _) => MessageKind::Numeric,
        _ => MessageKind::Other,
    }
}
