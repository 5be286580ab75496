//! Error types.
//!
//! Nothing in the per-frame decision path fails: bad input degrades to "no
//! decision". The errors here cover caller misuse of the countdown and
//! session, configuration loading, replay files and the async runtime.

use std::path::PathBuf;

use crate::countdown::AlertState;

/// Common result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Countdown error: {0}")]
    Countdown(#[from] CountdownError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Replay error: {0}")]
    Replay(#[from] ReplayError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}

/// Misuse of the alert countdown. State is unchanged when one is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CountdownError {
    /// A countdown is already running, or the last one has not been re-armed.
    #[error("countdown already {0:?}; re-arm before starting a new one")]
    AlreadyActive(AlertState),

    /// cancel/confirm called while no countdown is running.
    #[error("countdown is {0:?}, expected CountingDown")]
    NotCountingDown(AlertState),
}

/// Misuse of a monitoring session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("monitoring is not active")]
    NotMonitoring,

    #[error(transparent)]
    Countdown(#[from] CountdownError),
}

/// Configuration loading or validation failure.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Failure reading a recorded frame stream.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: {source}")]
    Json {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// The monitor task is no longer running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    #[error("monitor task has shut down")]
    Closed,
}
