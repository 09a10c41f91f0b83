//! Named-pipe IPC server.
//!
//! Each connection carries one JSON line in each direction. Commands are handed
//! to the event loop with a oneshot responder; `stop` triggers shutdown after the
//! reply has been written.

use crate::DaemonEvent;
use anyhow::Result;
use deskpin_ipc::{IpcCommand, IpcResponse, MAX_IPC_MESSAGE_SIZE};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// IPC read timeout - clients must send within this period.
pub const IPC_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Run the IPC server, accepting connections and dispatching commands.
#[cfg(windows)]
pub async fn run_ipc_server(event_tx: mpsc::Sender<DaemonEvent>) {
    use deskpin_ipc::PIPE_NAME;
    use tokio::net::windows::named_pipe::{PipeMode, ServerOptions};
    use tracing::error;

    let mut is_first_instance = true;

    loop {
        let server = match ServerOptions::new()
            .first_pipe_instance(is_first_instance)
            .pipe_mode(PipeMode::Byte)
            .create(PIPE_NAME)
        {
            Ok(s) => {
                is_first_instance = false;
                s
            }
            Err(e) => {
                error!("Failed to create named pipe server: {}", e);
                if is_first_instance {
                    error!("Is another deskpin daemon already running?");
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        debug!("Waiting for client connection on {}", PIPE_NAME);

        if let Err(e) = server.connect().await {
            error!("Failed to accept client connection: {}", e);
            continue;
        }

        debug!("Client connected");

        let event_tx = event_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_client(server, event_tx).await {
                warn!("Client handler error: {}", e);
            }
        });
    }
}

/// Check if another daemon instance is already running by probing the named pipe.
#[cfg(windows)]
pub fn check_already_running() -> bool {
    tokio::net::windows::named_pipe::ClientOptions::new()
        .open(deskpin_ipc::PIPE_NAME)
        .is_ok()
}

fn encode_response(response: &IpcResponse) -> String {
    match serde_json::to_string(response) {
        Ok(json) => json + "\n",
        Err(e) => {
            warn!("Failed to serialize IPC response: {}", e);
            "{\"status\":\"error\",\"message\":\"Internal serialization error\"}\n".to_string()
        }
    }
}

/// Handle a single client connection.
pub async fn handle_client<S>(stream: S, event_tx: mpsc::Sender<DaemonEvent>) -> Result<()>
where
    S: AsyncRead + AsyncWrite,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader.take(MAX_IPC_MESSAGE_SIZE as u64));
    let mut line = String::new();

    let bytes_read = match tokio::time::timeout(IPC_READ_TIMEOUT, reader.read_line(&mut line)).await {
        Ok(Ok(n)) => n,
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            debug!("Client sent nothing within {:?}; closing", IPC_READ_TIMEOUT);
            return Ok(());
        }
    };
    if bytes_read == 0 {
        return Ok(());
    }

    let line = line.trim();
    debug!("Received command: {}", line);

    let cmd: IpcCommand = match serde_json::from_str(line) {
        Ok(cmd) => cmd,
        Err(e) => {
            let response = IpcResponse::error(format!("Invalid command: {}", e));
            writer.write_all(encode_response(&response).as_bytes()).await?;
            return Ok(());
        }
    };

    let is_stop = matches!(cmd, IpcCommand::Stop);
    let (resp_tx, resp_rx) = oneshot::channel();

    if event_tx
        .send(DaemonEvent::IpcCommand {
            cmd,
            responder: resp_tx,
        })
        .await
        .is_err()
    {
        let response = IpcResponse::error("Daemon is shutting down");
        writer.write_all(encode_response(&response).as_bytes()).await?;
        return Ok(());
    }

    let response = match resp_rx.await {
        Ok(resp) => resp,
        Err(_) => IpcResponse::error("Failed to get response from daemon"),
    };
    writer.write_all(encode_response(&response).as_bytes()).await?;
    writer.flush().await?;

    if is_stop {
        let _ = event_tx.send(DaemonEvent::Shutdown).await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn roundtrip(request: &str, reply: Option<IpcResponse>) -> (String, mpsc::Receiver<DaemonEvent>) {
        let (client, server) = tokio::io::duplex(4096);
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let handler = tokio::spawn(handle_client(server, event_tx));

        let (mut client_read, mut client_write) = tokio::io::split(client);
        client_write.write_all(request.as_bytes()).await.unwrap();

        if let Some(reply) = reply {
            match event_rx.recv().await {
                Some(DaemonEvent::IpcCommand { responder, .. }) => {
                    responder.send(reply).unwrap();
                }
                _ => panic!("Expected an IPC command event"),
            }
        }

        handler.await.unwrap().unwrap();
        let mut response = String::new();
        BufReader::new(&mut client_read).read_line(&mut response).await.unwrap();
        (response, event_rx)
    }

    #[tokio::test]
    async fn test_command_is_dispatched_and_answered() {
        let (response, _rx) = roundtrip("{\"type\":\"list_pinned\"}\n", Some(IpcResponse::Ok)).await;
        let parsed: IpcResponse = serde_json::from_str(&response).unwrap();
        assert_eq!(parsed, IpcResponse::Ok);
    }

    #[tokio::test]
    async fn test_invalid_command_gets_error() {
        let (response, mut rx) = roundtrip("{\"type\":\"explode\"}\n", None).await;
        let parsed: IpcResponse = serde_json::from_str(&response).unwrap();
        assert!(matches!(parsed, IpcResponse::Error { message } if message.starts_with("Invalid command")));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stop_triggers_shutdown_after_reply() {
        let (response, mut rx) = roundtrip("{\"type\":\"stop\"}\n", Some(IpcResponse::Ok)).await;
        assert!(response.contains("\"status\":\"ok\""));
        assert!(matches!(rx.recv().await, Some(DaemonEvent::Shutdown)));
    }

    #[tokio::test]
    async fn test_closed_event_loop_reports_shutdown() {
        let (client, server) = tokio::io::duplex(4096);
        let (event_tx, event_rx) = mpsc::channel(8);
        drop(event_rx);

        let handler = tokio::spawn(handle_client(server, event_tx));
        let (mut client_read, mut client_write) = tokio::io::split(client);
        client_write.write_all(b"{\"type\":\"query_status\"}\n").await.unwrap();
        handler.await.unwrap().unwrap();

        let mut response = String::new();
        BufReader::new(&mut client_read).read_line(&mut response).await.unwrap();
        assert!(response.contains("Daemon is shutting down"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_client_times_out() {
        let (_client, server) = tokio::io::duplex(4096);
        let (event_tx, mut event_rx) = mpsc::channel(8);
        handle_client(server, event_tx).await.unwrap();
        assert!(event_rx.try_recv().is_err());
    }
}
