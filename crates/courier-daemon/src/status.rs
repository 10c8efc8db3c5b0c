//! Status store: the one place the supervisor's observable state lives.
//!
//! Guarded by its own short-lived lock. Readers (control plane) and the
//! runner thread's exit report never take the supervisor lock, so a status
//! read cannot wait on a start or stop in progress.

use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use courier_control::StatusSource;
use courier_types::{CourierError, Phase, StatusReport};

/// How a runner thread ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerExit {
    /// The platform ended the session, or it was closed locally.
    Clean,
    Failed(CourierError),
}

/// Copy of the supervisor state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorState {
    pub phase: Phase,
    /// Set only while `phase` is `Crashed`.
    pub last_error: Option<String>,
    pub manually_stopped: bool,
    pub deployment_id: Uuid,
}

/// The mutable part of [`SupervisorState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lifecycle {
    pub phase: Phase,
    pub last_error: Option<String>,
    pub manually_stopped: bool,
}

#[derive(Debug)]
struct Inner {
    lifecycle: Lifecycle,
    /// Generation whose exit report is still accepted.
    current_generation: Option<u64>,
    started_at: Option<Instant>,
    restart_count: u32,
}

#[derive(Debug)]
pub struct StatusStore {
    deployment_id: Uuid,
    inner: Mutex<Inner>,
}

impl StatusStore {
    /// Fresh store in `Idle`, with a new deployment id.
    pub fn new(manually_stopped: bool) -> Self {
        Self {
            deployment_id: Uuid::new_v4(),
            inner: Mutex::new(Inner {
                lifecycle: Lifecycle {
                    phase: Phase::Idle,
                    last_error: None,
                    manually_stopped,
                },
                current_generation: None,
                started_at: None,
                restart_count: 0,
            }),
        }
    }

    pub fn deployment_id(&self) -> Uuid {
        self.deployment_id
    }

    pub fn snapshot(&self) -> SupervisorState {
        let inner = self.inner.lock();
        SupervisorState {
            phase: inner.lifecycle.phase,
            last_error: inner.lifecycle.last_error.clone(),
            manually_stopped: inner.lifecycle.manually_stopped,
            deployment_id: self.deployment_id,
        }
    }

    /// Apply a transformation. Callers hold the supervisor lock.
    pub fn update(&self, mutator: impl FnOnce(&mut Lifecycle)) {
        let mut inner = self.inner.lock();
        mutator(&mut inner.lifecycle);
        if inner.lifecycle.phase != Phase::Crashed {
            inner.lifecycle.last_error = None;
        }
        if inner.lifecycle.phase != Phase::Running {
            inner.started_at = None;
        }
    }

    /// Enter `Running` for a runner about to be spawned as `generation`.
    pub fn begin(&self, generation: u64) {
        let mut inner = self.inner.lock();
        inner.lifecycle.phase = Phase::Running;
        inner.lifecycle.last_error = None;
        inner.current_generation = Some(generation);
        inner.started_at = Some(Instant::now());
    }

    /// Stop accepting exit reports from `generation`.
    pub fn retire(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.current_generation == Some(generation) {
            inner.current_generation = None;
        }
    }

    /// Record how runner `generation` ended.
    ///
    /// Returns `false` (and changes nothing) when the generation has been
    /// retired or superseded.
    pub fn report_exit(&self, generation: u64, exit: RunnerExit) -> bool {
        let mut inner = self.inner.lock();
        if inner.current_generation != Some(generation) {
            debug!(generation, ?exit, "ignoring exit report from retired runner");
            return false;
        }
        inner.current_generation = None;
        inner.started_at = None;
        match exit {
            RunnerExit::Clean => {
                info!(generation, "runner exited cleanly");
                inner.lifecycle.phase = Phase::Idle;
                inner.lifecycle.last_error = None;
            }
            RunnerExit::Failed(err) => {
                warn!(generation, error = %err, "runner crashed");
                inner.lifecycle.phase = Phase::Crashed;
                inner.lifecycle.last_error = Some(err.to_string());
            }
        }
        true
    }

    pub fn record_restart(&self) {
        self.inner.lock().restart_count += 1;
    }

    pub fn report(&self) -> StatusReport {
        let inner = self.inner.lock();
        StatusReport {
            running: inner.lifecycle.phase == Phase::Running,
            error: inner.lifecycle.last_error.clone(),
            deployment_id: self.deployment_id.to_string(),
            phase: inner.lifecycle.phase,
            manually_stopped: inner.lifecycle.manually_stopped,
            restart_count: inner.restart_count,
            uptime_secs: inner.started_at.map(|t| t.elapsed().as_secs()),
        }
    }
}

impl StatusSource for StatusStore {
    fn status(&self) -> StatusReport {
        self.report()
    }
}
