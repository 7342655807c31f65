//! checkd: an incremental static-analysis daemon
//!
//! The daemon keeps a project's analysis results in memory and serves them to
//! editor and build-tool clients over a Unix domain socket speaking
//! line-delimited JSON. Clients query the current error set, push changed
//! files for re-analysis, and subscribe to be told whenever the error set
//! changes.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use checkd::{BincodeSnapshotStore, Collaborators, EventEmitter, ServerConfiguration,
//!     Supervisor, SyntaxChecker};
//!
//! let config = ServerConfiguration::for_project("/path/to/project");
//! let collaborators = Collaborators {
//!     checker: Arc::new(SyntaxChecker::new()),
//!     snapshots: Arc::new(BincodeSnapshotStore::new()),
//!     watch: None,
//! };
//! let reason = Supervisor::new(config, collaborators, EventEmitter::stdout())
//!     .run()
//!     .await?;
//! ```

pub mod checker;
pub mod cli;
pub mod config;
pub mod error;
pub mod paths;
pub mod protocol;
pub mod schema;
pub mod server;
pub mod snapshot;

// Re-export commonly used types
pub use checker::{CheckOutcome, Checker, Environment, Recheck, SyntaxChecker};
pub use cli::Cli;
pub use config::{SavedStateAction, ServerConfiguration};
pub use error::{
    CheckerError, DaemonError, Result, SavedStateError, SnapshotError, TransitionFault, WatchError,
};
pub use paths::derive_socket_path;
pub use protocol::{parse_client_request, ClientRequest, Request, Response, ServerInfo};
pub use schema::{AnalysisError, ErrorTable, ModuleName};
pub use server::{
    Collaborators, EventEmitter, NotifyWatchService, ServerEvent, ShutdownReason, Supervisor,
    WatchService,
};
pub use snapshot::{BincodeSnapshotStore, SavedEnvironment, SnapshotStore};
