//! Error types and exit codes for checkd
//!
//! Each layer of the daemon has its own error enum so the supervisor can tell
//! recoverable conditions (malformed input, saved-state fallbacks) apart from
//! the ones that must end the process (watch loss, transition faults).

use std::path::PathBuf;
use std::process::ExitCode;

use thiserror::Error;

/// Top-level error for the daemon process
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("A server is already running at {}", socket_path.display())]
    AlreadyRunning { socket_path: PathBuf },

    #[error("Failed to bind socket {}: {source}", socket_path.display())]
    Bind {
        socket_path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Watch service failure: {0}")]
    Watch(#[from] WatchError),

    #[error("Unrecoverable server fault: {message}")]
    Fault { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DaemonError {
    /// Convert error to the process exit code:
    /// - 1: any error-classified shutdown (bind, watch, fault, IO)
    /// - 2: configuration or usage error, detected before binding
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Config { .. } => ExitCode::from(2),
            Self::AlreadyRunning { .. } => ExitCode::from(1),
            Self::Bind { .. } => ExitCode::from(1),
            Self::Watch(_) => ExitCode::from(1),
            Self::Fault { .. } => ExitCode::from(1),
            Self::Io(_) => ExitCode::from(1),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// Errors reported by the file-watch service
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WatchError {
    #[error("watch connection failed: {0}")]
    Connection(String),

    #[error("watch query failed: {0}")]
    Query(String),

    #[error("watch subscription failed: {0}")]
    Subscription(String),
}

/// Errors reported by the snapshot store
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("snapshot not found at {}", path.display())]
    Missing { path: PathBuf },

    #[error("snapshot at {} is corrupt: {message}", path.display())]
    Corrupt { path: PathBuf, message: String },

    #[error("snapshot at {} has format version {found}, expected {expected}", path.display())]
    Version {
        path: PathBuf,
        found: u32,
        expected: u32,
    },

    #[error("snapshot IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fetch-class failures while restoring a saved state.
///
/// None of these are fatal: the bootstrapper logs one warning and falls back
/// to a cold start.
#[derive(Error, Debug)]
pub enum SavedStateError {
    #[error("could not read saved-state input {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("saved-state query failed: {0}")]
    Watch(#[from] WatchError),

    #[error("malformed saved-state descriptor: {0}")]
    Descriptor(String),

    #[error("loading saved state from a project requires watch integration")]
    WatchDisabled,

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/// Errors reported by the checker collaborator
#[derive(Error, Debug)]
pub enum CheckerError {
    #[error("checker IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parser setup failed: {0}")]
    Parser(String),

    #[error("checker failure: {0}")]
    Internal(String),
}

/// A fault while computing a state transition.
///
/// Faults are never answered with a partial response: the analysis state is
/// assumed tainted and the daemon shuts down.
#[derive(Error, Debug)]
pub enum TransitionFault {
    #[error(transparent)]
    Checker(#[from] CheckerError),

    #[error("critical file changed: {}", path.display())]
    CriticalFileChanged { path: PathBuf },

    #[error("panic during state transition: {message}")]
    Panic { message: String },
}

/// Result type alias for daemon operations
pub type Result<T> = std::result::Result<T, DaemonError>;
