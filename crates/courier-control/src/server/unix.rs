//! Unix domain socket control server.
//!
//! Newline-delimited JSON: one [`ControlCommand`] per line in, one
//! [`ControlResponse`] per line out. The socket is owner-only.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tracing::{debug, info, warn};

use crate::command::{ControlCommand, ControlResponse};
use crate::server::handler::handle_command;
use crate::server::{CommandTx, StatusSource, SHUTDOWN_POLL};

/// Maximum allowed line length for incoming commands (1 MB).
const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Serve until `shutdown` is set, then remove the socket file.
pub async fn serve(
    socket_path: PathBuf,
    command_tx: CommandTx,
    status: Arc<dyn StatusSource>,
    shutdown: Arc<AtomicBool>,
) -> Result<(), String> {
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| format!("failed to create socket dir: {e}"))?;
    }

    // Stale socket from a previous run.
    match std::fs::remove_file(&socket_path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(format!("failed to remove stale socket: {e}")),
    }

    let listener = UnixListener::bind(&socket_path).map_err(|e| {
        format!(
            "failed to bind unix socket at {}: {e}",
            socket_path.display()
        )
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) =
            std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o600))
        {
            warn!(path = %socket_path.display(), error = %e, "failed to restrict socket permissions");
        }
    }

    info!(path = %socket_path.display(), "control socket listening");

    while !shutdown.load(Ordering::Relaxed) {
        match tokio::time::timeout(SHUTDOWN_POLL, listener.accept()).await {
            Ok(Ok((stream, _addr))) => {
                let tx = command_tx.clone();
                let status = Arc::clone(&status);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, tx, status).await {
                        debug!(error = %e, "control connection ended");
                    }
                });
            }
            Ok(Err(e)) => warn!(error = %e, "control socket accept error"),
            Err(_) => {}
        }
    }

    let _ = std::fs::remove_file(&socket_path);
    info!("control socket stopped");
    Ok(())
}

async fn write_response(
    writer: &mut tokio::net::unix::OwnedWriteHalf,
    response: &ControlResponse,
) -> Result<(), String> {
    let mut json = serde_json::to_string(response).map_err(|e| e.to_string())?;
    json.push('\n');
    writer
        .write_all(json.as_bytes())
        .await
        .map_err(|e| e.to_string())?;
    writer.flush().await.map_err(|e| e.to_string())
}

async fn handle_connection(
    stream: tokio::net::UnixStream,
    command_tx: CommandTx,
    status: Arc<dyn StatusSource>,
) -> Result<(), String> {
    let (reader, mut writer) = stream.into_split();
    // Bound the bytes read per connection so a line without a newline
    // cannot grow without limit.
    let mut lines = BufReader::new(reader.take(10 * 1024 * 1024)).lines();

    while let Some(line) = lines.next_line().await.map_err(|e| e.to_string())? {
        if line.len() > MAX_LINE_LENGTH {
            let _ = write_response(&mut writer, &ControlResponse::error("command too large")).await;
            return Err("oversized command".into());
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let command: ControlCommand = match serde_json::from_str(line) {
            Ok(cmd) => cmd,
            Err(e) => {
                write_response(&mut writer, &ControlResponse::error(format!("invalid JSON: {e}")))
                    .await?;
                continue;
            }
        };

        let response = handle_command(&command_tx, status.as_ref(), command).await;
        write_response(&mut writer, &response).await?;
    }

    Ok(())
}
