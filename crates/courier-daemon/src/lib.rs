//! Courier daemon: lifecycle supervision for one long-lived platform client.
//!
//! The daemon keeps a single authenticated connection alive on a background
//! thread, restarts it after failures and lets operators start, stop and
//! inspect it over the control plane.
//!
//! # Architecture
//!
//! - [`supervisor::Supervisor`]: start/stop/health-check state machine
//! - [`runner`]: per-connection thread body (runtime + receive loop)
//! - [`status::StatusStore`]: observable state, readable without the supervisor lock
//! - [`watchdog::Watchdog`]: fixed-interval health-check timer
//! - [`state`]: persisted credential, destination and manual-stop flag
//! - [`persistence`]: PID file for single-instance enforcement

pub mod error;
pub mod persistence;
pub mod runner;
pub mod state;
pub mod status;
pub mod supervisor;
pub mod watchdog;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use courier_channel::{Forwarder, Platform};
use courier_control::{ControlCommand, ControlResponse, StatusSource};
use courier_types::{CourierConfig, Credential};

use crate::state::{JsonStateStore, Settings};
use crate::supervisor::{Supervisor, SupervisorOptions};
use crate::watchdog::Watchdog;

pub use error::SupervisorError;
pub use supervisor::HealthAction;

/// Payload of a `ping` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonPing {
    pub uptime_secs: u64,
    pub started_at: DateTime<Utc>,
    pub daemon_pid: u32,
    pub deployment_id: String,
}

/// How long the main loop waits for a control command before re-checking
/// the shutdown flag.
const COMMAND_POLL: Duration = Duration::from_millis(500);

/// The daemon runtime: main loop wiring the supervisor to the control plane.
pub struct DaemonRuntime {
    pub config: CourierConfig,
    supervisor: Arc<Supervisor>,
    settings: Arc<Settings>,
    pid_path: PathBuf,
    shutdown: Arc<AtomicBool>,
    started_at: Instant,
    started_at_utc: DateTime<Utc>,
}

impl DaemonRuntime {
    /// Build the runtime: load persisted state and create an idle supervisor.
    ///
    /// `env_credential` (from `DISCORD_TOKEN`) takes precedence over the
    /// persisted credential for automatic starts, but is not saved until an
    /// explicit start.
    pub fn new(
        config: CourierConfig,
        platform: Arc<dyn Platform>,
        env_credential: Option<Credential>,
    ) -> Self {
        let settings = Arc::new(Settings::load(JsonStateStore::new(config.state_path.clone())));
        let forwarder = Arc::new(Forwarder::new(settings.clone()));
        let supervisor = Arc::new(Supervisor::new(
            platform,
            forwarder,
            Arc::clone(&settings),
            SupervisorOptions::from(&config.runner),
        ));
        if let Some(credential) = env_credential {
            supervisor.seed_credential(credential);
        }

        Self {
            config,
            supervisor,
            settings,
            pid_path: courier_types::pid_path(),
            shutdown: Arc::new(AtomicBool::new(false)),
            started_at: Instant::now(),
            started_at_utc: Utc::now(),
        }
    }

    /// Use a different PID file location.
    pub fn with_pid_path(mut self, path: PathBuf) -> Self {
        self.pid_path = path;
        self
    }

    pub fn supervisor(&self) -> Arc<Supervisor> {
        Arc::clone(&self.supervisor)
    }

    pub fn settings(&self) -> Arc<Settings> {
        Arc::clone(&self.settings)
    }

    /// Run the daemon main loop. Blocks until shutdown is signaled.
    ///
    /// 1. Claim the PID file
    /// 2. Start the control servers
    /// 3. Run one health check (cold start from the stored credential)
    /// 4. Start the watchdog
    /// 5. Dispatch control commands until shutdown
    /// 6. Stop the watchdog and the client, clean up
    pub fn run(&mut self) -> Result<(), String> {
        persistence::ensure_single_instance(&self.pid_path)?;
        persistence::write_pid_file(&self.pid_path)?;

        let (cmd_tx, cmd_rx) = courier_control::command_channel();
        let status: Arc<dyn StatusSource> = self.supervisor.status_store();
        let control_thread = match courier_control::spawn_control_servers(
            self.config.control.clone(),
            cmd_tx,
            status,
            Arc::clone(&self.shutdown),
        ) {
            Ok(handle) => handle,
            Err(e) => {
                persistence::remove_pid_file(&self.pid_path);
                return Err(e);
            }
        };

        info!(
            deployment_id = %self.supervisor.status().deployment_id,
            socket = %self.config.control.socket_path.display(),
            http = %self.config.control.http_listen,
            "daemon starting"
        );

        match self.supervisor.health_check() {
            Ok(action) => info!(?action, "boot health check"),
            Err(e) => warn!(error = %e, "boot health check failed"),
        }

        let supervisor = Arc::clone(&self.supervisor);
        let watchdog = match Watchdog::spawn(self.config.watchdog.interval(), move || {
            supervisor.health_check()
        }) {
            Ok(w) => Some(w),
            Err(e) => {
                warn!(error = %e, "failed to start watchdog, automatic restarts disabled");
                None
            }
        };

        while !self.shutdown.load(Ordering::Relaxed) {
            match cmd_rx.recv_timeout(COMMAND_POLL) {
                Ok((cmd, reply_tx)) => {
                    let response = self.handle_command(cmd);
                    let _ = reply_tx.send(response);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("control servers exited, shutting down");
                    self.request_shutdown();
                }
            }
        }

        info!("daemon shutting down");

        if let Some(w) = watchdog {
            w.stop();
        }
        self.supervisor.shutdown();

        if control_thread.join().is_err() {
            warn!("control server thread panicked");
        }
        persistence::remove_pid_file(&self.pid_path);

        info!("daemon shutdown complete");
        Ok(())
    }

    /// Handle a single control command.
    pub fn handle_command(&self, cmd: ControlCommand) -> ControlResponse {
        match cmd {
            ControlCommand::Ping => {
                let ping = DaemonPing {
                    uptime_secs: self.started_at.elapsed().as_secs(),
                    started_at: self.started_at_utc,
                    daemon_pid: std::process::id(),
                    deployment_id: self.supervisor.status().deployment_id,
                };
                match serde_json::to_value(&ping) {
                    Ok(data) => ControlResponse::ok_with_data("pong", data),
                    Err(e) => ControlResponse::error(format!("serialization failed: {e}")),
                }
            }
            ControlCommand::Status => self.supervisor.status().into(),
            ControlCommand::Start { token } => self.supervisor.start(token.as_deref()).into(),
            ControlCommand::Stop => self.supervisor.stop().into(),
            ControlCommand::Shutdown => {
                self.request_shutdown();
                ControlResponse::ok("shutdown initiated")
            }
        }
    }

    /// Signal the daemon to shut down.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Get the shutdown flag for external signal handlers.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }
}
