//! Lifecycle supervisor for the single platform client.
//!
//! `start`, `stop`, `health_check` and `shutdown` are the only mutating
//! entry points and all of them serialize on one lock. Status reads go to
//! the [`StatusStore`] and never take that lock.
//!
//! # Transitions
//!
//! | From | Trigger | To |
//! |---|---|---|
//! | any | `start` | Running |
//! | any | `stop` | ManuallyStopped |
//! | Running | runner error exit | Crashed |
//! | Running | runner clean exit | Idle |
//! | Idle, Crashed | health check, credential known, not manually stopped | Running |
//! | ManuallyStopped | health check | ManuallyStopped |

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use courier_channel::{MessageHandler, Platform};
use courier_types::{
    CourierError, Credential, Phase, RunnerConfig, StartResult, StatusReport, StopResult,
};

use crate::error::SupervisorError;
use crate::runner::{JoinOutcome, ReadySignal, RunnerHandle, RunnerSpec};
use crate::state::Settings;
use crate::status::{RunnerExit, StatusStore};

/// Timing knobs for the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorOptions {
    /// Upper bound on joining an outgoing runner.
    pub join_timeout: Duration,
    /// How long a manual start waits for an immediate connect failure.
    pub settle: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self::from(&RunnerConfig::default())
    }
}

impl From<&RunnerConfig> for SupervisorOptions {
    fn from(config: &RunnerConfig) -> Self {
        Self {
            join_timeout: config.join_timeout(),
            settle: config.settle(),
        }
    }
}

/// What a health check did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthAction {
    /// The runner is alive.
    Healthy,
    /// A new runner was spawned.
    Restarted,
    /// Restarts are suppressed by an operator stop.
    Suppressed,
    /// Nothing to restart with.
    NoCredential,
}

struct Inner {
    runner: Option<RunnerHandle>,
    credential: Option<Credential>,
    generation: u64,
}

pub struct Supervisor {
    platform: Arc<dyn Platform>,
    handler: Arc<dyn MessageHandler>,
    settings: Arc<Settings>,
    status: Arc<StatusStore>,
    options: SupervisorOptions,
    inner: Mutex<Inner>,
}

impl Supervisor {
    /// Build an idle supervisor from the persisted settings.
    pub fn new(
        platform: Arc<dyn Platform>,
        handler: Arc<dyn MessageHandler>,
        settings: Arc<Settings>,
        options: SupervisorOptions,
    ) -> Self {
        let persisted = settings.snapshot();
        let status = Arc::new(StatusStore::new(persisted.manually_stopped));
        info!(
            deployment_id = %status.deployment_id(),
            manually_stopped = persisted.manually_stopped,
            has_credential = persisted.credential.is_some(),
            "supervisor initialized"
        );
        Self {
            platform,
            handler,
            settings,
            status,
            options,
            inner: Mutex::new(Inner {
                runner: None,
                credential: persisted.credential,
                generation: 0,
            }),
        }
    }

    /// Replace the credential used by automatic restarts without persisting it.
    pub fn seed_credential(&self, credential: Credential) {
        info!("credential seeded");
        self.inner.lock().credential = Some(credential);
    }

    pub fn status_store(&self) -> Arc<StatusStore> {
        Arc::clone(&self.status)
    }

    pub fn status(&self) -> StatusReport {
        self.status.report()
    }

    /// Start the client, with `token` or the stored credential.
    ///
    /// Malformed credentials fail synchronously. Otherwise the call waits
    /// up to the settle window so a rejected credential is reported here;
    /// later failures only show up in status reads.
    pub fn start(&self, token: Option<&str>) -> StartResult {
        let credential = match token {
            Some(raw) => match Credential::parse(raw) {
                Ok(c) => c,
                Err(e) => return StartResult::failed(e.to_string()),
            },
            None => match self.inner.lock().credential.clone() {
                Some(c) => c,
                None => return StartResult::failed(SupervisorError::NoCredential.to_string()),
            },
        };
        if let Err(e) = self.platform.validate_credential(&credential) {
            return StartResult::failed(CourierError::from(e).to_string());
        }

        let ready = {
            let mut inner = self.inner.lock();

            let already_running = self.status.snapshot().phase == Phase::Running
                && inner.credential.as_ref() == Some(&credential)
                && inner.runner.as_ref().is_some_and(RunnerHandle::is_alive);
            if already_running {
                info!("start requested while already running, nothing to do");
                return StartResult::ok();
            }

            info!("manual start");
            self.settings.record_start(&credential);
            inner.credential = Some(credential.clone());
            self.status.update(|l| l.manually_stopped = false);
            self.retire_runner(&mut inner);

            let (tx, rx) = mpsc::channel();
            if let Err(e) = self.spawn_runner(&mut inner, credential, Some(tx)) {
                return StartResult::failed(e.to_string());
            }
            rx
        };

        match ready.recv_timeout(self.options.settle) {
            Ok(Ok(())) => StartResult::ok(),
            Ok(Err(e)) => StartResult::failed(e.to_string()),
            Err(RecvTimeoutError::Timeout) => {
                debug!("still connecting after settle window");
                StartResult::ok()
            }
            // Runner ended without reporting a connect result.
            Err(RecvTimeoutError::Disconnected) => {
                let snap = self.status.snapshot();
                match (snap.phase, snap.last_error) {
                    (Phase::Crashed, Some(error)) => StartResult::failed(error),
                    _ => StartResult::ok(),
                }
            }
        }
    }

    /// Stop the client and suppress automatic restarts.
    pub fn stop(&self) -> StopResult {
        let mut inner = self.inner.lock();
        let was_running = self.retire_runner(&mut inner);
        self.status.update(|l| {
            l.phase = Phase::ManuallyStopped;
            l.manually_stopped = true;
        });
        self.settings.set_manually_stopped(true);
        info!(was_running, "client stopped by operator");
        StopResult {
            ok: true,
            was_running,
        }
    }

    /// One watchdog tick.
    pub fn health_check(&self) -> Result<HealthAction, SupervisorError> {
        let mut inner = self.inner.lock();
        let snap = self.status.snapshot();

        if snap.manually_stopped || snap.phase == Phase::ManuallyStopped {
            return Ok(HealthAction::Suppressed);
        }

        if snap.phase == Phase::Running {
            if inner.runner.as_ref().is_some_and(RunnerHandle::is_alive) {
                return Ok(HealthAction::Healthy);
            }
            warn!("phase is running but no live runner, restarting");
        }

        let Some(credential) = inner.credential.clone() else {
            debug!(phase = %snap.phase, "no credential, nothing to restart");
            return Ok(HealthAction::NoCredential);
        };

        info!(
            phase = %snap.phase,
            last_error = snap.last_error.as_deref().unwrap_or(""),
            "restarting client"
        );
        self.retire_runner(&mut inner);
        self.spawn_runner(&mut inner, credential, None)?;
        self.status.record_restart();
        Ok(HealthAction::Restarted)
    }

    /// Stop the runner for process exit. The manual-stop flag is untouched.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        if self.retire_runner(&mut inner) {
            info!("client stopped for shutdown");
        }
        self.status.update(|l| {
            if l.phase == Phase::Running {
                l.phase = Phase::Idle;
            }
        });
    }

    /// Stop and join the current runner, bounded by the join timeout.
    ///
    /// Returns whether the runner was still active.
    fn retire_runner(&self, inner: &mut Inner) -> bool {
        let Some(mut runner) = inner.runner.take() else {
            return false;
        };
        let generation = runner.generation();
        self.status.retire(generation);
        let was_active = runner.request_stop();
        match runner.join_timeout(self.options.join_timeout) {
            JoinOutcome::Joined => debug!(generation, "runner retired"),
            JoinOutcome::Panicked => warn!(generation, "retired runner had panicked"),
            JoinOutcome::Abandoned => warn!(
                generation,
                "runner abandoned, the platform will reap its session"
            ),
        }
        was_active
    }

    fn spawn_runner(
        &self,
        inner: &mut Inner,
        credential: Credential,
        ready: Option<ReadySignal>,
    ) -> Result<(), SupervisorError> {
        inner.generation += 1;
        let generation = inner.generation;
        self.status.begin(generation);

        let spec = RunnerSpec {
            generation,
            platform: Arc::clone(&self.platform),
            credential,
            handler: Arc::clone(&self.handler),
            status: Arc::clone(&self.status),
            ready,
        };
        match RunnerHandle::spawn(spec) {
            Ok(handle) => {
                inner.runner = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.status.report_exit(
                    generation,
                    RunnerExit::Failed(CourierError::UnexpectedRunnerFailure(e.to_string())),
                );
                Err(e)
            }
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if let Some(mut runner) = inner.runner.take() {
            self.status.retire(runner.generation());
            runner.request_stop();
        }
    }
}
