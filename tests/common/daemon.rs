//! A supervisor running on a private socket directory

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use checkd::server::{EventEmitter, ShutdownReason, Supervisor};
use checkd::{
    BincodeSnapshotStore, Checker, Collaborators, DaemonError, ServerConfiguration, SyntaxChecker,
};
use parking_lot::Mutex;
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::client::Client;

/// Shared in-memory sink for lifecycle events
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<u8>>>);

impl EventLog {
    /// Every event written so far, parsed
    pub fn events(&self) -> Vec<Value> {
        let bytes = self.0.lock().clone();
        String::from_utf8_lossy(&bytes)
            .lines()
            .map(|line| serde_json::from_str(line).expect("Event lines must be JSON"))
            .collect()
    }

    /// Number of events with the given key
    pub fn count(&self, kind: &str) -> usize {
        self.events()
            .iter()
            .filter(|event| event.get(kind).is_some())
            .count()
    }
}

impl Write for EventLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Collaborators backed by the real checker and snapshot store
pub fn default_collaborators() -> Collaborators {
    collaborators_with(Arc::new(SyntaxChecker::new()))
}

pub fn collaborators_with(checker: Arc<dyn Checker>) -> Collaborators {
    Collaborators {
        checker,
        snapshots: Arc::new(BincodeSnapshotStore::new()),
        watch: None,
    }
}

pub struct RunningDaemon {
    pub socket_path: PathBuf,
    pub events: EventLog,
    interrupt: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<ShutdownReason, DaemonError>>,
    _sockets: TempDir,
}

impl RunningDaemon {
    pub fn start(config: ServerConfiguration) -> Self {
        Self::start_with(config, default_collaborators())
    }

    pub fn start_with(config: ServerConfiguration, collaborators: Collaborators) -> Self {
        let sockets = TempDir::new().expect("Failed to create socket dir");
        let events = EventLog::default();
        let supervisor = Supervisor::new(config, collaborators, EventEmitter::writer(events.clone()))
            .with_socket_dir(sockets.path());
        let socket_path = supervisor.socket_path();

        let (interrupt, interrupted) = oneshot::channel::<()>();
        let task = tokio::spawn(supervisor.run_until(async move {
            let _ = interrupted.await;
        }));

        Self {
            socket_path,
            events,
            interrupt: Some(interrupt),
            task,
            _sockets: sockets,
        }
    }

    pub async fn client(&self) -> Client {
        Client::connect(&self.socket_path).await
    }

    /// Deliver an interrupt and wait for shutdown
    pub async fn interrupt(mut self) -> Result<ShutdownReason, DaemonError> {
        if let Some(interrupt) = self.interrupt.take() {
            let _ = interrupt.send(());
        }
        self.wait().await
    }

    /// Wait for the daemon to stop on its own
    pub async fn wait(self) -> Result<ShutdownReason, DaemonError> {
        let _keep_running = self.interrupt;
        timeout(Duration::from_secs(10), self.task)
            .await
            .expect("Daemon did not stop in time")
            .expect("Daemon task panicked")
    }
}
