//! Diagnostics and chat transcripts.
//!
//! [`init_tracing`] installs the stderr `tracing` subscriber. [`ChatLogger`]
//! optionally writes chat traffic to daily transcript files named
//! `<channel>_<date>.log` in the configured log directory
//! (default: `~/.local/share/tmichat/logs/`).

use crate::config::LoggingConfig;
use crate::irc::message::{MessageKind, ServerMessage};
use anyhow::Result;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Environment variable that overrides the configured filter.
pub const LOG_ENV: &str = "TMICHAT_LOG";

/// Install the global stderr subscriber.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;
    Ok(())
}

/// Writes chat lines to per-channel daily transcript files.
///
/// File handles are cached for the lifetime of the logger. Lines that cannot
/// be written are reported through `tracing` and otherwise dropped.
pub struct ChatLogger {
    enabled: bool,
    log_dir: PathBuf,
    file_handles: HashMap<String, fs::File>,
}

impl ChatLogger {
    pub fn new(config: &LoggingConfig) -> Self {
        Self {
            enabled: config.transcript,
            log_dir: expand_home(&config.log_dir),
            file_handles: HashMap::new(),
        }
    }

    /// Append a message to its channel's transcript. Only chat, join and
    /// part lines addressed to a channel are recorded.
    pub fn log_message(&mut self, msg: &ServerMessage) {
        if !self.enabled {
            return;
        }
        let Some(target) = msg.target().filter(|t| t.starts_with('#')) else {
            return;
        };

        let timestamp = msg.received_at().format("%H:%M:%S");
        let sender = msg.source_nick().unwrap_or("*");
        let line = match msg.kind() {
            MessageKind::Chat => {
                format!("[{}] <{}> {}", timestamp, sender, msg.text().unwrap_or_default())
            }
            MessageKind::Join => format!("[{}] *** {} joined", timestamp, sender),
            MessageKind::Part => format!("[{}] *** {} left", timestamp, sender),
            _ => return,
        };

        let date = msg.received_at().format("%Y-%m-%d");
        let filename = format!("{}_{}.log", sanitize(target), date);

        let handle = match self.file_handles.entry(filename) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                let path = self.log_dir.join(entry.key());
                let opened = fs::create_dir_all(&self.log_dir).and_then(|_| {
                    OpenOptions::new().create(true).append(true).open(&path)
                });
                match opened {
                    Ok(file) => entry.insert(file),
                    Err(e) => {
                        tracing::warn!("Cannot open transcript {}: {}", path.display(), e);
                        return;
                    }
                }
            }
        };

        if let Err(e) = writeln!(handle, "{}", line) {
            tracing::warn!("Failed to write transcript line: {}", e);
        }
    }
}

fn sanitize(target: &str) -> String {
    target
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect()
}

fn expand_home(dir: &str) -> PathBuf {
    match dir.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(dir)),
        None => PathBuf::from(dir),
    }
}
