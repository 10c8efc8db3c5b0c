//! Error types shared across all courier crates.

/// Errors that can occur across the courier runtime.
///
/// The connection-level variants mirror how a failure is treated by the
/// supervisor: every one of them ends in a well-defined phase, none of them
/// terminates the process.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CourierError {
    /// Credential rejected by the platform at connect time.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Network-level drop or server-initiated close after a successful connect.
    #[error("connection lost: {0}")]
    TransientDisconnect(String),

    /// Persisted state could not be read or written.
    #[error("state persistence error: {0}")]
    ConfigPersistence(String),

    /// Uncaught error or panic inside the runner's receive loop.
    #[error("runner failed: {0}")]
    UnexpectedRunnerFailure(String),

    /// The credential is empty or malformed; detected before connecting.
    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    #[error("configuration error: {0}")]
    ConfigError(String),
}
