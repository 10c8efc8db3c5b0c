//! Control plane servers.
//!
//! - [`handler`]: transport-agnostic command dispatch
//! - [`unix`]: Unix domain socket server (NDJSON protocol)
//! - [`http`]: axum-based HTTP JSON server
//!
//! Mutating commands are forwarded to the daemon main loop over a
//! [`CommandTx`]; status reads are answered directly from a
//! [`StatusSource`] so they never queue behind a slow start or stop.

pub mod handler;
pub mod http;
pub mod unix;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{info, warn};

use courier_types::{ControlConfig, StatusReport};

use crate::command::{ControlCommand, ControlResponse};

/// Sender half used by the servers to reach the daemon main loop.
///
/// `std::sync::mpsc` so the main loop can block in `recv_timeout()`.
pub type CommandTx = std::sync::mpsc::Sender<(ControlCommand, oneshot::Sender<ControlResponse>)>;
pub type CommandRx = std::sync::mpsc::Receiver<(ControlCommand, oneshot::Sender<ControlResponse>)>;

pub fn command_channel() -> (CommandTx, CommandRx) {
    std::sync::mpsc::channel()
}

/// Read-only view of the supervisor status.
pub trait StatusSource: Send + Sync {
    fn status(&self) -> StatusReport;
}

/// How often the servers poll the shutdown flag.
pub(crate) const SHUTDOWN_POLL: Duration = Duration::from_millis(500);

/// Resolves once `shutdown` is set.
pub(crate) async fn wait_for_shutdown(shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::Relaxed) {
        tokio::time::sleep(SHUTDOWN_POLL).await;
    }
}

/// Run the Unix socket server (and the HTTP server, if configured) on a
/// background thread until `shutdown` is set.
pub fn spawn_control_servers(
    config: ControlConfig,
    command_tx: CommandTx,
    status: Arc<dyn StatusSource>,
    shutdown: Arc<AtomicBool>,
) -> Result<JoinHandle<()>, String> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("courier-control-rt")
        .enable_all()
        .build()
        .map_err(|e| format!("failed to build control runtime: {e}"))?;

    std::thread::Builder::new()
        .name("courier-control".into())
        .spawn(move || {
            runtime.block_on(async move {
                let unix = unix::serve(
                    config.socket_path.clone(),
                    command_tx.clone(),
                    Arc::clone(&status),
                    Arc::clone(&shutdown),
                );

                if config.http_listen.is_empty() {
                    if let Err(e) = unix.await {
                        warn!(error = %e, "unix control server failed");
                    }
                    return;
                }

                let http = http::serve(
                    config.http_listen.clone(),
                    command_tx,
                    status,
                    config.api_key.clone(),
                    shutdown,
                );
                let (unix_result, http_result) = tokio::join!(unix, http);
                if let Err(e) = unix_result {
                    warn!(error = %e, "unix control server failed");
                }
                if let Err(e) = http_result {
                    warn!(error = %e, "HTTP control server failed");
                }
            });
            info!("control servers stopped");
        })
        .map_err(|e| format!("failed to spawn control server thread: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_channel_carries_responder() {
        let (tx, rx) = command_channel();
        let (resp_tx, resp_rx) = oneshot::channel();
        tx.send((ControlCommand::Stop, resp_tx)).unwrap();

        let (cmd, responder) = rx.recv().unwrap();
        assert_eq!(cmd, ControlCommand::Stop);
        responder.send(ControlResponse::ok("stopped")).unwrap();
        assert!(resp_rx.blocking_recv().unwrap().ok);
    }

    #[tokio::test]
    async fn shutdown_wait_resolves_when_flag_set() {
        let flag = Arc::new(AtomicBool::new(false));
        let waiter = tokio::spawn(wait_for_shutdown(Arc::clone(&flag)));
        flag.store(true, Ordering::Relaxed);
        tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
