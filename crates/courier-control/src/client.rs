//! Blocking client for the daemon control socket.

use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

use crate::command::{ControlCommand, ControlResponse};

/// Upper bound on how long the daemon may take to answer.
///
/// Stop can wait out a full join timeout, so this is generous.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the daemon control socket (NDJSON over a Unix socket).
pub struct ControlClient {
    socket_path: PathBuf,
}

impl ControlClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    /// Send a command and wait for the response.
    pub fn send(&self, command: &ControlCommand) -> Result<ControlResponse, String> {
        let stream = UnixStream::connect(&self.socket_path).map_err(|e| {
            format!(
                "failed to connect to daemon at {}: {e}",
                self.socket_path.display()
            )
        })?;
        stream
            .set_read_timeout(Some(RESPONSE_TIMEOUT))
            .map_err(|e| format!("failed to set read timeout: {e}"))?;

        let mut writer = stream
            .try_clone()
            .map_err(|e| format!("failed to clone stream: {e}"))?;

        let mut json = serde_json::to_string(command)
            .map_err(|e| format!("failed to serialize command: {e}"))?;
        json.push('\n');
        writer
            .write_all(json.as_bytes())
            .map_err(|e| format!("failed to send command: {e}"))?;
        writer.flush().map_err(|e| format!("failed to flush: {e}"))?;

        let reader = BufReader::new(stream);
        let mut line = String::new();
        reader
            .take(1_000_000)
            .read_line(&mut line)
            .map_err(|e| format!("failed to read response: {e}"))?;

        serde_json::from_str(&line).map_err(|e| format!("failed to parse response: {e}"))
    }

    /// Whether a daemon answers on the socket.
    pub fn is_running(&self) -> bool {
        self.send(&ControlCommand::Ping).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_socket_is_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let client = ControlClient::new(dir.path().join("absent.sock"));
        assert!(!client.is_running());
        let err = client.send(&ControlCommand::Status).unwrap_err();
        assert!(err.contains("failed to connect"));
    }
}
