//! Transport-agnostic command dispatch.

use tokio::sync::oneshot;

use crate::command::{ControlCommand, ControlResponse};
use crate::server::{CommandTx, StatusSource};

/// Answer one command.
///
/// `Status` is answered in place. Everything else (including `Ping`, which
/// doubles as a main-loop liveness check) goes to the daemon main loop; a
/// disconnected loop yields an error response.
pub async fn handle_command(
    tx: &CommandTx,
    status: &dyn StatusSource,
    command: ControlCommand,
) -> ControlResponse {
    match command {
        ControlCommand::Status => status.status().into(),
        command => forward(tx, command).await,
    }
}

async fn forward(tx: &CommandTx, command: ControlCommand) -> ControlResponse {
    let (resp_tx, resp_rx) = oneshot::channel();
    if tx.send((command, resp_tx)).is_err() {
        return ControlResponse::error("daemon main loop disconnected");
    }
    match resp_rx.await {
        Ok(response) => response,
        Err(_) => ControlResponse::error("response channel dropped"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::command_channel;
    use courier_types::{Phase, StatusReport};

    struct Fixed;

    impl StatusSource for Fixed {
        fn status(&self) -> StatusReport {
            StatusReport {
                running: true,
                error: None,
                deployment_id: "dep".into(),
                phase: Phase::Running,
                manually_stopped: false,
                restart_count: 0,
                uptime_secs: Some(1),
            }
        }
    }

    #[tokio::test]
    async fn status_does_not_touch_main_loop() {
        let (tx, rx) = command_channel();
        drop(rx);
        let resp = handle_command(&tx, &Fixed, ControlCommand::Status).await;
        assert!(resp.ok);
        assert_eq!(resp.message, "running");
    }

    #[tokio::test]
    async fn stop_reports_disconnected_loop() {
        let (tx, rx) = command_channel();
        drop(rx);
        let resp = handle_command(&tx, &Fixed, ControlCommand::Stop).await;
        assert!(!resp.ok);
        assert!(resp.message.contains("disconnected"));
    }

    #[tokio::test]
    async fn ping_needs_main_loop() {
        let (tx, rx) = command_channel();
        drop(rx);
        let resp = handle_command(&tx, &Fixed, ControlCommand::Ping).await;
        assert!(!resp.ok);
    }

    #[tokio::test]
    async fn start_is_forwarded() {
        let (tx, rx) = command_channel();
        let loop_thread = std::thread::spawn(move || {
            let (cmd, responder) = rx.recv().unwrap();
            assert_eq!(cmd, ControlCommand::Start { token: Some("abc".into()) });
            responder.send(ControlResponse::ok("client started")).unwrap();
        });

        let resp = handle_command(
            &tx,
            &Fixed,
            ControlCommand::Start {
                token: Some("abc".into()),
            },
        )
        .await;
        assert!(resp.ok);
        loop_thread.join().unwrap();
    }
}
