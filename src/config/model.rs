//! Configuration data model.
//!
//! All structs derive `Serialize`/`Deserialize` for TOML persistence.
//! Every field has a sensible default so an empty file connects anonymously.

use serde::{Deserialize, Serialize};

use super::nickname::generate_anonymous_nickname;
use crate::irc::connection::ConnectionSettings;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Chat server endpoint and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Login name. Left empty, an anonymous read-only nickname is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    /// OAuth token, sent as `PASS`. Usually of the form `oauth:...`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Channels joined right after connecting.
    #[serde(default)]
    pub channels: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            nickname: None,
            password: None,
            channels: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Settings for a [`ChatConnection`](crate::irc::ChatConnection).
    pub fn connection_settings(&self) -> ConnectionSettings {
        let nickname = self
            .nickname
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_lowercase)
            .unwrap_or_else(generate_anonymous_nickname);
        ConnectionSettings {
            host: self.host.clone(),
            port: self.port,
            nickname,
            password: self.password.clone().filter(|p| !p.is_empty()),
        }
    }
}

/// Diagnostics and chat transcript settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. `info` or `tmichat=debug`.
    #[serde(default = "default_level")]
    pub level: String,
    /// Write chat lines to daily transcript files.
    #[serde(default)]
    pub transcript: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            transcript: false,
            log_dir: default_log_dir(),
        }
    }
}

fn default_host() -> String {
    "irc.chat.twitch.tv".to_string()
}
fn default_port() -> u16 {
    6667
}
fn default_level() -> String {
    "info".to_string()
}
fn default_log_dir() -> String {
    "~/.local/share/tmichat/logs".to_string()
}
