//! Core types shared across all courier crates.
//!
//! Defines the daemon configuration, the supervised credential, lifecycle
//! status types, the persisted state record and the error taxonomy used by
//! the supervisor, the platform adapter and the control plane.

pub mod config;
pub mod credential;
pub mod error;
pub mod state;
pub mod status;

pub use config::{
    config_path, courier_dir, pid_path, ControlConfig, CourierConfig, DiscordSettings,
    RunnerConfig, WatchdogConfig,
};
pub use credential::Credential;
pub use error::CourierError;
pub use state::PersistedState;
pub use status::{Phase, StartResult, StatusReport, StopResult};
