//! Control plane for the courier daemon.
//!
//! Operators start, stop and inspect the supervised client through:
//! - a Unix domain socket (always on, owner-only, NDJSON)
//! - an optional HTTP JSON API with bearer-token auth
//!
//! [`client::ControlClient`] is the blocking socket client used by the CLI.

pub mod client;
pub mod command;
pub mod server;

pub use client::ControlClient;
pub use command::{ControlCommand, ControlResponse};
pub use server::{command_channel, spawn_control_servers, CommandRx, CommandTx, StatusSource};
