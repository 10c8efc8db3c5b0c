//! Lifecycle phase and the control-plane result types.

use serde::{Deserialize, Serialize};

/// Lifecycle phase of the supervised client.
///
/// There is no terminal phase; the process lifetime bounds the machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No runner exists and none has failed (fresh process, or clean exit).
    #[default]
    Idle,
    /// A runner has been spawned and has not reported an exit.
    Running,
    /// The last runner exited with an error.
    Crashed,
    /// An operator stopped the client; automatic restarts are suppressed.
    ManuallyStopped,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Idle => "idle",
            Phase::Running => "running",
            Phase::Crashed => "crashed",
            Phase::ManuallyStopped => "manually_stopped",
        };
        f.write_str(s)
    }
}

/// Result of a `Start` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StartResult {
    pub fn ok() -> Self {
        Self { ok: true, error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}

/// Result of a `Stop` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopResult {
    pub ok: bool,
    /// Whether an active runner was actually asked to stop.
    pub was_running: bool,
}

/// Status snapshot returned to the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub running: bool,
    pub error: Option<String>,
    pub deployment_id: String,
    pub phase: Phase,
    #[serde(default)]
    pub manually_stopped: bool,
    /// Number of restarts triggered by the watchdog in this process.
    #[serde(default)]
    pub restart_count: u32,
    /// Seconds since the current runner was spawned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime_secs: Option<u64>,
}
