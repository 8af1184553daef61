//! Console slash-command parser.
//!
//! Parses `/command arg1 arg2 ...` input lines into typed [`ParsedCommand`]
//! values for the console loop to act on.

use crate::irc::connection::Channel;

/// A parsed console command. Each variant corresponds to a `/command`.
#[derive(Debug, PartialEq)]
pub enum ParsedCommand {
    Join { channel: Channel },
    Part { channel: Option<Channel> },
    Msg { target: String, text: String },
    Raw { line: String },
    Channels,
    Quit,
    Help,
}

/// Parse a slash-command string into a [`ParsedCommand`].
///
/// Returns `None` if the input does not start with `/` or is not a recognized
/// command. Command names are case-insensitive.
pub fn parse_command(input: &str) -> Option<ParsedCommand> {
    let input = input.trim();
    let body = input.strip_prefix('/')?;

    let parts: Vec<&str> = body.splitn(3, ' ').collect();
    let cmd = parts.first()?.to_lowercase();

    match cmd.as_str() {
        "join" | "j" => {
            let name = parts.get(1).filter(|s| !s.is_empty())?;
            Some(ParsedCommand::Join {
                channel: Channel::new(name),
            })
        }
        "part" | "leave" => {
            let channel = parts.get(1).filter(|s| !s.is_empty()).map(|s| Channel::new(s));
            Some(ParsedCommand::Part { channel })
        }
        "msg" => {
            let target = parts.get(1).filter(|s| !s.is_empty())?.to_string();
            let text = parts.get(2).unwrap_or(&"").to_string();
            Some(ParsedCommand::Msg { target, text })
        }
        "raw" | "quote" => {
            let line = body[cmd.len()..].trim_start();
            if line.is_empty() {
                return None;
            }
            Some(ParsedCommand::Raw {
                line: line.to_string(),
            })
        }
        "channels" => Some(ParsedCommand::Channels),
        "quit" | "exit" => Some(ParsedCommand::Quit),
        "help" | "h" => Some(ParsedCommand::Help),
        _ => None,
    }
}
