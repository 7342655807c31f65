//! Daemon state
//!
//! There is exactly one [`ServerState`] per process and it is owned by the
//! state actor. Request handling never mutates it in place: a transition
//! computes a replacement, and the actor commits it by swapping it in.

use std::path::PathBuf;
use std::sync::Arc;

use crate::checker::{Checker, Environment, SyntaxChecker};
use crate::config::ServerConfiguration;
use crate::protocol::ServerInfo;
use crate::schema::ErrorTable;
use crate::snapshot::{BincodeSnapshotStore, SnapshotStore};

use super::bootstrap::BootstrapReport;
use super::subscriptions::SubscriptionRegistry;
use super::watcher::{NotifyWatchService, WatchService};

/// External collaborators the daemon drives
#[derive(Clone)]
pub struct Collaborators {
    pub checker: Arc<dyn Checker>,
    pub snapshots: Arc<dyn SnapshotStore>,
    /// `None` when watch integration is disabled
    pub watch: Option<Arc<dyn WatchService>>,
}

impl Collaborators {
    /// The bundled implementations.
    ///
    /// A watch service exists only when a watch root is configured; without
    /// one, project saved-state lookups fail and bootstrap starts cold.
    pub fn standard(config: &ServerConfiguration) -> Self {
        let watch: Option<Arc<dyn WatchService>> = match config.watch_root {
            Some(_) => Some(Arc::new(NotifyWatchService::new())),
            None => None,
        };
        Self {
            checker: Arc::new(SyntaxChecker::new()),
            snapshots: Arc::new(BincodeSnapshotStore::new()),
            watch,
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("watch", &self.watch.is_some())
            .finish_non_exhaustive()
    }
}

/// The analysis state of a running daemon
#[derive(Debug, Clone)]
pub struct ServerState {
    pub socket_path: PathBuf,
    pub configuration: Arc<ServerConfiguration>,
    pub environment: Environment,
    /// Always computed from `environment`'s generation
    pub errors: ErrorTable,
    pub subscriptions: SubscriptionRegistry,
    pub bootstrap: BootstrapReport,
    pub started_at: String,
}

impl ServerState {
    /// An empty state awaiting bootstrap
    pub fn seed(
        socket_path: PathBuf,
        configuration: Arc<ServerConfiguration>,
        started_at: String,
    ) -> Self {
        Self {
            socket_path,
            configuration,
            environment: Environment::default(),
            errors: ErrorTable::new(),
            subscriptions: SubscriptionRegistry::new(),
            bootstrap: BootstrapReport::default(),
            started_at,
        }
    }

    /// Same state with a new analysis result
    pub fn with_analysis(&self, environment: Environment, errors: ErrorTable) -> Self {
        Self {
            environment,
            errors,
            ..self.clone()
        }
    }

    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
            pid: std::process::id(),
            socket_path: self.socket_path.clone(),
            project_root: self.configuration.project_root.clone(),
            started_at: self.started_at.clone(),
            generation: self.environment.generation,
            module_count: self.environment.modules.len(),
            error_count: self.errors.error_count(),
            subscriptions: self.subscriptions.names(),
            bootstrap: self.bootstrap.to_string(),
        }
    }
}
