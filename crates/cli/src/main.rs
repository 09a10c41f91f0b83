//! deskpin CLI
//!
//! Command-line interface for the deskpin daemon.
//!
//! Commands are sent to the daemon via IPC (named pipe).

#[cfg(windows)]
mod autostart;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use deskpin_ipc::{IpcCommand, IpcDirection, IpcRect, IpcResponse};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

#[derive(Parser)]
#[command(name = "deskpin-cli")]
#[command(author, version, about = "Control the deskpin daemon")]
struct Cli {
    /// Print the raw JSON response instead of formatted output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pin a window at its current position
    Pin {
        /// Window handle (decimal or 0x-prefixed hex)
        #[arg(value_parser = parse_window_id)]
        window_id: u64,
    },
    /// Unpin a window
    Unpin {
        #[arg(value_parser = parse_window_id)]
        window_id: u64,
    },
    /// Make a pinned window's current position its new baseline
    Refresh {
        #[arg(value_parser = parse_window_id)]
        window_id: u64,
    },
    /// List pinned windows
    List,
    /// List windows that can be pinned
    Windows,
    /// List connected monitors
    Monitors,
    /// Restore pinned windows now
    Restore,
    /// Simulate a desktop switch hotkey
    Switch {
        #[arg(value_enum)]
        direction: DirectionArg,
    },
    /// Show daemon status
    Status,
    /// Reload configuration
    Reload,
    /// Stop the daemon
    Stop,
    /// Start the daemon at login
    Autostart {
        #[command(subcommand)]
        action: AutostartAction,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DirectionArg {
    #[value(alias = "left")]
    Previous,
    #[value(alias = "right")]
    Next,
}

#[derive(Subcommand)]
enum AutostartAction {
    /// Register the daemon to start at login
    Enable,
    /// Remove the login entry
    Disable,
    /// Show whether the daemon starts at login
    Status,
}

/// Parse a window handle given as decimal or `0x` hex.
fn parse_window_id(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse::<u64>(),
    };
    match parsed {
        Ok(0) => Err("window id must be non-zero".to_string()),
        Ok(id) => Ok(id),
        Err(e) => Err(format!("invalid window id '{}': {}", s, e)),
    }
}

impl Commands {
    fn to_ipc(&self) -> Option<IpcCommand> {
        let cmd = match self {
            Commands::Pin { window_id } => IpcCommand::Pin { window_id: *window_id },
            Commands::Unpin { window_id } => IpcCommand::Unpin { window_id: *window_id },
            Commands::Refresh { window_id } => IpcCommand::RefreshSnapshot { window_id: *window_id },
            Commands::List => IpcCommand::ListPinned,
            Commands::Windows => IpcCommand::ListWindows,
            Commands::Monitors => IpcCommand::ListMonitors,
            Commands::Restore => IpcCommand::Restore,
            Commands::Switch { direction } => IpcCommand::Switch {
                direction: match direction {
                    DirectionArg::Previous => IpcDirection::Previous,
                    DirectionArg::Next => IpcDirection::Next,
                },
            },
            Commands::Status => IpcCommand::QueryStatus,
            Commands::Reload => IpcCommand::Reload,
            Commands::Stop => IpcCommand::Stop,
            Commands::Autostart { .. } => return None,
        };
        Some(cmd)
    }
}

/// Write one command line and read one response line.
async fn exchange<S>(stream: S, cmd: &IpcCommand) -> Result<IpcResponse>
where
    S: AsyncRead + AsyncWrite,
{
    let (reader, mut writer) = tokio::io::split(stream);

    let mut request = serde_json::to_string(cmd).context("Failed to encode command")?;
    request.push('\n');
    writer.write_all(request.as_bytes()).await.context("Failed to send command")?;
    writer.flush().await?;

    let mut line = String::new();
    let n = BufReader::new(reader)
        .read_line(&mut line)
        .await
        .context("Failed to read response")?;
    if n == 0 {
        bail!("Daemon closed the connection without responding");
    }
    serde_json::from_str(line.trim()).context("Malformed response from daemon")
}

#[cfg(windows)]
async fn send_command(cmd: &IpcCommand) -> Result<IpcResponse> {
    use deskpin_ipc::PIPE_NAME;
    use std::time::Duration;
    use tokio::net::windows::named_pipe::ClientOptions;

    const ERROR_PIPE_BUSY: i32 = 231;
    const MAX_BUSY_RETRIES: u32 = 20;

    let mut attempts = 0;
    let client = loop {
        match ClientOptions::new().open(PIPE_NAME) {
            Ok(client) => break client,
            Err(e) if e.raw_os_error() == Some(ERROR_PIPE_BUSY) && attempts < MAX_BUSY_RETRIES => {
                attempts += 1;
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                bail!("deskpin daemon is not running (no pipe at {})", PIPE_NAME);
            }
            Err(e) => return Err(e).context("Failed to connect to deskpin daemon"),
        }
    };

    exchange(client, cmd).await
}

#[cfg(not(windows))]
async fn send_command(_cmd: &IpcCommand) -> Result<IpcResponse> {
    bail!("deskpin only runs on Windows")
}

fn format_rect(rect: &IpcRect) -> String {
    format!("{}x{} at ({}, {})", rect.width, rect.height, rect.x, rect.y)
}

fn format_uptime(secs: u64) -> String {
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h {:02}m {:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m {:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}

/// Turn a response into text for the terminal. Error responses become errors.
fn render(response: &IpcResponse) -> Result<String> {
    let text = match response {
        IpcResponse::Ok => "OK".to_string(),
        IpcResponse::Error { message } => bail!("{}", message),
        IpcResponse::PinnedWindows { windows } => {
            if windows.is_empty() {
                "No pinned windows.".to_string()
            } else {
                windows
                    .iter()
                    .map(|w| {
                        format!(
                            "0x{:08X}  {:<24} {:<9} {:<18} {} [{}]",
                            w.window_id,
                            format_rect(&w.rect),
                            w.show_state,
                            w.monitor,
                            w.title,
                            w.class_name
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        IpcResponse::Windows { windows } => {
            if windows.is_empty() {
                "No windows.".to_string()
            } else {
                windows
                    .iter()
                    .map(|w| {
                        format!(
                            "{} 0x{:08X}  pid {:<6} {:<24} {} [{}]",
                            if w.pinned { "*" } else { " " },
                            w.window_id,
                            w.process_id,
                            format_rect(&w.rect),
                            w.title,
                            w.class_name
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        IpcResponse::Monitors { monitors } => monitors
            .iter()
            .map(|m| {
                format!(
                    "{}{}  {}  work area {}",
                    m.id,
                    if m.is_primary { " (primary)" } else { "" },
                    m.device_name,
                    format_rect(&m.work_area)
                )
            })
            .collect::<Vec<_>>()
            .join("\n"),
        IpcResponse::Restored {
            count_restored,
            count_pruned,
            vanished,
        } => {
            let mut text = format!("Restored {} window(s), pruned {}", count_restored, count_pruned);
            if !vanished.is_empty() {
                let ids: Vec<String> = vanished.iter().map(|id| format!("0x{:08X}", id)).collect();
                text.push_str(&format!("\nMonitor gone for: {}", ids.join(", ")));
            }
            text
        }
        IpcResponse::Status {
            enabled,
            pinned,
            monitors,
            detector,
            last_result,
            uptime_secs,
        } => {
            let last = match last_result {
                Some(r) => format!("{} restored, {} pruned", r.count_restored, r.count_pruned),
                None => "none yet".to_string(),
            };
            format!(
                "Enabled:     {}\nPinned:      {}\nMonitors:    {}\nDetector:    {}\nLast cycle:  {}\nUptime:      {}",
                if *enabled { "yes" } else { "no" },
                pinned,
                monitors,
                detector,
                last,
                format_uptime(*uptime_secs)
            )
        }
    };
    Ok(text)
}

#[cfg(windows)]
fn run_autostart(action: &AutostartAction) -> Result<()> {
    match action {
        AutostartAction::Enable => {
            let command = autostart::enable()?;
            println!("Autostart enabled: {}", command);
        }
        AutostartAction::Disable => {
            if autostart::disable()? {
                println!("Autostart disabled");
            } else {
                println!("Autostart was not enabled");
            }
        }
        AutostartAction::Status => match autostart::status()? {
            Some(command) => println!("Autostart enabled: {}", command),
            None => println!("Autostart disabled"),
        },
    }
    Ok(())
}

#[cfg(not(windows))]
fn run_autostart(_action: &AutostartAction) -> Result<()> {
    bail!("autostart is only available on Windows")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let Some(cmd) = cli.command.to_ipc() else {
        if let Commands::Autostart { action } = &cli.command {
            run_autostart(action)?;
        }
        return Ok(());
    };

    let response = send_command(&cmd).await?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        if let IpcResponse::Error { .. } = response {
            std::process::exit(1);
        }
        return Ok(());
    }

    println!("{}", render(&response)?);
    Ok(())
}
