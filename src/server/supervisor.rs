//! Daemon supervisor
//!
//! Startup order:
//! 1. subscribe to the watch service, if configured (failure aborts startup)
//! 2. derive the socket path
//! 3. remove a stale socket file and bind
//! 4. start the state actor, which bootstraps on first use
//!
//! Shutdown precedence, highest first:
//! 1. interrupt (SIGINT/SIGTERM) or a client `Stop`: success
//! 2. watch lost: error
//! 3. transition fault: error, plus an `Exception` lifecycle event
//!
//! Shutdown stops accepting first, then tells open connections to close and
//! removes the socket file.

use std::fs;
use std::future::{pending, Future};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::net::{UnixListener, UnixStream};
use tokio::signal;
use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tokio::sync::broadcast;
use tokio::sync::mpsc::unbounded_channel;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfiguration;
use crate::error::{DaemonError, Result, WatchError};
use crate::paths::{derive_socket_path, derive_socket_path_in};

use super::actor::{ActorSignal, StateActor};
use super::connection::handle_connection;
use super::events::EventEmitter;
use super::state::{Collaborators, ServerState};
use super::watcher::{run_listener, WatchFilter};

/// Why an orderly shutdown happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Interrupted,
    StopRequested,
}

pub struct Supervisor {
    configuration: Arc<ServerConfiguration>,
    collaborators: Collaborators,
    events: Arc<EventEmitter>,
    socket_dir: Option<PathBuf>,
}

impl Supervisor {
    pub fn new(
        configuration: ServerConfiguration,
        collaborators: Collaborators,
        events: EventEmitter,
    ) -> Self {
        Self {
            configuration: Arc::new(configuration),
            collaborators,
            events: Arc::new(events),
            socket_dir: None,
        }
    }

    /// Place the socket in `dir` instead of the system temporary directory
    pub fn with_socket_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.socket_dir = Some(dir.into());
        self
    }

    pub fn socket_path(&self) -> PathBuf {
        match &self.socket_dir {
            Some(dir) => derive_socket_path_in(dir, &self.configuration.log_path),
            None => derive_socket_path(&self.configuration.log_path),
        }
    }

    /// Run until SIGINT/SIGTERM, a `Stop` request, or a fatal condition
    pub async fn run(self) -> Result<ShutdownReason> {
        self.run_until(wait_for_interrupt()).await
    }

    /// Run until `interrupt` completes, a `Stop` request, or a fatal
    /// condition.
    pub async fn run_until<F>(self, interrupt: F) -> Result<ShutdownReason>
    where
        F: Future<Output = ()>,
    {
        let config = self.configuration.clone();

        let subscription = match (&self.collaborators.watch, &config.watch_root) {
            (Some(watch), Some(root)) => {
                let filter = WatchFilter::from_configuration(&config);
                Some(watch.subscribe(root, &filter)?)
            }
            _ => {
                debug!("watch integration disabled");
                None
            }
        };

        let socket_path = self.socket_path();
        cleanup_stale_socket(&socket_path).await?;
        let listener = UnixListener::bind(&socket_path).map_err(|source| DaemonError::Bind {
            socket_path: socket_path.clone(),
            source,
        })?;
        info!(socket = %socket_path.display(), "listening");
        self.events.socket_created(&socket_path);

        let (signals_tx, mut signals) = unbounded_channel();
        let seed = ServerState::seed(
            socket_path.clone(),
            config.clone(),
            chrono::Utc::now().to_rfc3339(),
        );
        let (actor, _actor_task) = StateActor::new(
            self.collaborators.clone(),
            seed,
            self.events.clone(),
            signals_tx,
        )
        .spawn();

        let (shutdown_tx, _) = broadcast::channel::<()>(1);

        let listener_actor = actor.clone();
        let watch_lost = async move {
            match subscription {
                Some(subscription) => match run_listener(subscription, listener_actor).await {
                    Err(lost) => lost,
                    Ok(()) => pending::<WatchError>().await,
                },
                None => pending::<WatchError>().await,
            }
        };
        tokio::pin!(interrupt);
        tokio::pin!(watch_lost);

        let outcome = loop {
            tokio::select! {
                biased;
                _ = &mut interrupt => {
                    info!("interrupt received, shutting down");
                    break Ok(ShutdownReason::Interrupted);
                }
                lost = &mut watch_lost => {
                    error!(error = %lost, "watch connection lost, shutting down");
                    break Err(DaemonError::Watch(lost));
                }
                signal = signals.recv() => match signal {
                    Some(ActorSignal::Stop) => {
                        info!("stop requested, shutting down");
                        break Ok(ShutdownReason::StopRequested);
                    }
                    Some(ActorSignal::Fault(message)) => {
                        error!(%message, "unrecoverable fault, shutting down");
                        break Err(DaemonError::Fault { message });
                    }
                    None => {
                        break Err(DaemonError::Fault {
                            message: "state owner exited unexpectedly".to_string(),
                        });
                    }
                },
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        debug!("accepted connection");
                        actor.warmup();
                        tokio::spawn(handle_connection(stream, actor.clone(), shutdown_tx.subscribe()));
                    }
                    Err(e) => {
                        error!(error = %e, "accept failed");
                    }
                },
            }
        };

        // Stop accepting before anything else
        drop(listener);
        if let Err(DaemonError::Fault { message }) = &outcome {
            self.events.exception(message.clone());
        }
        let _ = shutdown_tx.send(());
        drop(actor);

        if let Err(e) = fs::remove_file(&socket_path) {
            warn!(socket = %socket_path.display(), error = %e, "failed to remove socket file");
        }
        info!("server stopped");
        outcome
    }
}

/// Remove a socket file nobody is accepting on.
///
/// A live socket means another daemon serves this project.
async fn cleanup_stale_socket(socket_path: &Path) -> Result<()> {
    if !socket_path.exists() {
        return Ok(());
    }
    match UnixStream::connect(socket_path).await {
        Ok(_) => {
            error!(socket = %socket_path.display(), "another server is already running");
            Err(DaemonError::AlreadyRunning {
                socket_path: socket_path.to_path_buf(),
            })
        }
        Err(_) => {
            info!(socket = %socket_path.display(), "removing stale socket file");
            fs::remove_file(socket_path)?;
            Ok(())
        }
    }
}

/// Wait for SIGINT or SIGTERM.
pub async fn wait_for_interrupt() {
    match unix_signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = signal::ctrl_c() => info!("received SIGINT"),
                _ = sigterm.recv() => info!("received SIGTERM"),
            }
        }
        Err(e) => {
            warn!(error = %e, "cannot register SIGTERM handler, waiting for SIGINT only");
            if signal::ctrl_c().await.is_err() {
                pending::<()>().await;
            }
            info!("received SIGINT");
        }
    }
}
