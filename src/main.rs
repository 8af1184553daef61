use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tmichat::config;
use tmichat::irc::commands::{parse_command, ParsedCommand};
use tmichat::logging::{self, ChatLogger};
use tmichat::{Channel, ChatConnection, ConnectionState, MessageKind, ServerMessage};
use tokio::sync::mpsc;

const HELP: &str = "Commands: /join <channel>, /part [channel], /msg <target> <text>, \
/raw <line>, /channels, /quit. Plain text goes to the current channel.";

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = parse_args()?;
    let cfg = config::load_config(&config_path)?;
    logging::init_tracing(&cfg.logging)?;
    if !config_path.exists() {
        config::save_config(&config_path, &cfg)?;
        tracing::info!("Wrote default config to {}", config_path.display());
    }

    let conn = ChatConnection::new(cfg.server.connection_settings());
    conn.connect().await.with_context(|| {
        format!("Failed to connect to {}:{}", cfg.server.host, cfg.server.port)
    })?;

    let mut current: Option<Channel> = None;
    for name in &cfg.server.channels {
        let channel = Channel::new(name);
        conn.join_channel(&channel).await?;
        current = Some(channel);
    }

    let result = run(&conn, &cfg, current).await;
    conn.disconnect().await;
    result
}

/// `--config <path>` is the only option.
fn parse_args() -> Result<PathBuf> {
    let mut args = std::env::args().skip(1);
    let mut path = config::config_path();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                path = args.next().map(PathBuf::from).context("--config needs a path")?;
            }
            "--help" | "-h" => {
                println!("Usage: tmichat [--config <path>]");
                std::process::exit(0);
            }
            other => anyhow::bail!("Unknown argument: {}", other),
        }
    }
    Ok(path)
}

async fn run(
    conn: &ChatConnection,
    cfg: &config::AppConfig,
    mut current: Option<Channel>,
) -> Result<()> {
    let mut chat_logger = ChatLogger::new(&cfg.logging);
    let mut state_rx = conn.subscribe_state();
    let mut tick = tokio::time::interval(Duration::from_millis(50));
    let mut console = spawn_console_reader();
    let mut console_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = tick.tick() => {
                while let Some(msg) = conn.pop_server_message() {
                    conn.apply_membership(&msg);
                    chat_logger.log_message(&msg);
                    print_message(&msg);
                }
            }
            changed = state_rx.changed() => {
                if changed.is_err() || *state_rx.borrow_and_update() == ConnectionState::Disconnected {
                    tracing::warn!("Connection to server lost");
                    break;
                }
            }
            line = console.recv(), if console_open => match line {
                Some(line) => {
                    if !handle_input(conn, &line, &mut current).await {
                        break;
                    }
                }
                None => console_open = false,
            },
        }
    }
    Ok(())
}

/// Read stdin on a plain thread so a pending read never holds up shutdown.
fn spawn_console_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Act on one console line. Returns `false` when the user asked to quit.
async fn handle_input(conn: &ChatConnection, line: &str, current: &mut Option<Channel>) -> bool {
    let line = line.trim();
    if line.is_empty() {
        return true;
    }

    let result = match parse_command(line) {
        Some(ParsedCommand::Join { channel }) => {
            let sent = conn.join_channel(&channel).await;
            *current = Some(channel);
            sent
        }
        Some(ParsedCommand::Part { channel }) => match channel.or_else(|| current.take()) {
            Some(channel) => conn.part_channel(&channel).await,
            None => {
                println!("Not in a channel");
                Ok(())
            }
        },
        Some(ParsedCommand::Msg { target, text }) => conn.send_chat_message(&target, &text).await,
        Some(ParsedCommand::Raw { line }) => conn.send_raw(&line).await,
        Some(ParsedCommand::Channels) => {
            let joined: Vec<String> = conn.joined_channels().iter().map(|c| c.irc_name()).collect();
            println!("Joined: {}", joined.join(", "));
            Ok(())
        }
        Some(ParsedCommand::Quit) => return false,
        Some(ParsedCommand::Help) => {
            println!("{}", HELP);
            Ok(())
        }
        None if line.starts_with('/') => {
            println!("Unknown command. {}", HELP);
            Ok(())
        }
        None => match current {
            Some(channel) => conn.send_chat_message(&channel.irc_name(), line).await,
            None => {
                println!("Join a channel first: /join <channel>");
                Ok(())
            }
        },
    };

    if let Err(e) = result {
        tracing::error!("Send failed: {}", e);
    }
    true
}

fn print_message(msg: &ServerMessage) {
    let time = msg.received_at().format("%H:%M:%S");
    let nick = msg.source_nick().unwrap_or("*");
    match msg.kind() {
        MessageKind::Chat => println!(
            "[{}] {} <{}> {}",
            time,
            msg.target().unwrap_or_default(),
            nick,
            msg.text().unwrap_or_default()
        ),
        MessageKind::Join => {
            println!("[{}] *** {} joined {}", time, nick, msg.target().unwrap_or_default())
        }
        MessageKind::Part => {
            println!("[{}] *** {} left {}", time, nick, msg.target().unwrap_or_default())
        }
        MessageKind::Notice => println!("[{}] -{}- {}", time, nick, msg.text().unwrap_or_default()),
        _ => tracing::debug!("{}", msg.raw()),
    }
}
