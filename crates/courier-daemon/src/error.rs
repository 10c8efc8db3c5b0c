//! Supervisor errors.

use thiserror::Error;

/// Failures of the supervisor machinery itself, as opposed to failures of
/// the supervised connection (those end up in the status store).
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to spawn thread: {0}")]
    Spawn(String),

    #[error("no credential configured")]
    NoCredential,

    #[error("{0}")]
    Credential(#[from] courier_types::CourierError),
}
