//! The state owner
//!
//! One [`StateActor`] owns the daemon's [`ServerState`]. Connections and the
//! watch listener reach it through an [`ActorHandle`]; commands are processed
//! one at a time, so a transition never observes another one half-done.
//!
//! The actor runs on a blocking thread because checker calls are synchronous
//! and may take a long time. It bootstraps lazily on the first command that
//! needs analysis.
//!
//! Any fault, including a panic inside a transition, ends the actor. It
//! reports the fault to the supervisor and drops its command queue, so every
//! waiting connection sees its request fail and closes.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::TransitionFault;
use crate::protocol::{Request, Response};

use super::bootstrap::bootstrap;
use super::dispatch::{self, Transition};
use super::events::EventEmitter;
use super::state::{Collaborators, ServerState};
use super::subscriptions::ResponseSink;

/// Work for the state actor
#[derive(Debug)]
pub enum Command {
    /// Bootstrap if needed, nothing else
    Warmup,
    Dispatch {
        request: Request,
        reply: oneshot::Sender<Response>,
    },
    /// Register a subscription and answer with the current errors
    Subscribe {
        name: String,
        sink: ResponseSink,
        reply: oneshot::Sender<()>,
    },
    /// Release subscriptions of a closed connection
    Unsubscribe {
        names: Vec<String>,
        sink: ResponseSink,
    },
    WatchBatch {
        paths: Vec<PathBuf>,
    },
}

/// What the actor reports to the supervisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActorSignal {
    /// A client sent `Stop`
    Stop,
    /// Unrecoverable; the state is no longer trusted
    Fault(String),
}

/// Cloneable sender side of the actor
#[derive(Debug, Clone)]
pub struct ActorHandle {
    tx: UnboundedSender<Command>,
}

impl ActorHandle {
    /// `None` if the actor stopped before answering
    pub async fn dispatch(&self, request: Request) -> Option<Response> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::Dispatch { request, reply }).ok()?;
        rx.await.ok()
    }

    /// `None` if the actor stopped before the subscription was registered
    pub async fn subscribe(&self, name: String, sink: ResponseSink) -> Option<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Subscribe { name, sink, reply })
            .ok()?;
        rx.await.ok()
    }

    pub fn unsubscribe(&self, names: Vec<String>, sink: ResponseSink) {
        if names.is_empty() {
            return;
        }
        let _ = self.tx.send(Command::Unsubscribe { names, sink });
    }

    /// False if the actor is gone
    pub fn watch_batch(&self, paths: Vec<PathBuf>) -> bool {
        self.tx.send(Command::WatchBatch { paths }).is_ok()
    }

    /// False if the actor is gone
    pub fn warmup(&self) -> bool {
        self.tx.send(Command::Warmup).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub struct StateActor {
    collaborators: Collaborators,
    state: ServerState,
    ready: bool,
    events: Arc<EventEmitter>,
    signals: UnboundedSender<ActorSignal>,
}

impl StateActor {
    pub fn new(
        collaborators: Collaborators,
        seed: ServerState,
        events: Arc<EventEmitter>,
        signals: UnboundedSender<ActorSignal>,
    ) -> Self {
        Self {
            collaborators,
            state: seed,
            ready: false,
            events,
            signals,
        }
    }

    /// Start the actor on the blocking pool
    pub fn spawn(self) -> (ActorHandle, JoinHandle<()>) {
        let (tx, rx) = unbounded_channel();
        let task = tokio::task::spawn_blocking(move || self.run(rx));
        (ActorHandle { tx }, task)
    }

    fn run(mut self, mut rx: UnboundedReceiver<Command>) {
        while let Some(command) = rx.blocking_recv() {
            if let Err(fault) = self.handle(command) {
                error!(error = %fault, "state transition failed, stopping");
                let _ = self.signals.send(ActorSignal::Fault(fault.to_string()));
                break;
            }
        }
        debug!("state actor stopped");
    }

    fn handle(&mut self, command: Command) -> Result<(), TransitionFault> {
        match command {
            Command::Warmup => self.ensure_ready(),
            Command::Dispatch { request, reply } => {
                let response = self.commit(|c, s| dispatch::dispatch(c, s, request))?;
                let _ = reply.send(response);
                Ok(())
            }
            Command::Subscribe { name, sink, reply } => {
                self.ensure_ready()?;
                self.state.subscriptions.register(name.clone(), sink.clone());
                let snapshot = self.commit(|c, s| {
                    dispatch::dispatch(c, s, Request::DisplayTypeError { paths: vec![] })
                })?;
                // The first line is a plain response; later pushes carry the name
                sink.send_line(snapshot.to_line());
                info!(subscription = %name, "subscription registered");
                let _ = reply.send(());
                Ok(())
            }
            Command::Unsubscribe { names, sink } => {
                for name in &names {
                    self.state.subscriptions.release(name, &sink);
                }
                debug!(count = names.len(), "released subscriptions");
                Ok(())
            }
            Command::WatchBatch { paths } => {
                debug!(count = paths.len(), "applying watch batch");
                self.commit(|c, s| dispatch::update(c, s, &paths))?;
                Ok(())
            }
        }
    }

    fn ensure_ready(&mut self) -> Result<(), TransitionFault> {
        if self.ready {
            return Ok(());
        }
        let collaborators = &self.collaborators;
        let seed = self.state.clone();
        self.state = isolate(|| bootstrap(collaborators, seed))?;
        self.ready = true;
        self.events.server_initialized();
        Ok(())
    }

    /// Run one transition and commit its result
    fn commit<F>(&mut self, work: F) -> Result<Response, TransitionFault>
    where
        F: FnOnce(&Collaborators, &ServerState) -> Result<Transition, TransitionFault>,
    {
        self.ensure_ready()?;
        let collaborators = &self.collaborators;
        let state = &self.state;
        let transition = isolate(|| work(collaborators, state))?;

        if let Some(next) = transition.state {
            self.state = next;
        }
        if transition.errors_changed {
            self.state
                .subscriptions
                .deliver(&Response::TypeErrors(self.state.errors.all()));
        }
        if transition.shutdown {
            let _ = self.signals.send(ActorSignal::Stop);
        }
        Ok(transition.response)
    }
}

/// Run `work`, converting a panic into a fault
fn isolate<T>(work: impl FnOnce() -> Result<T, TransitionFault>) -> Result<T, TransitionFault> {
    match panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(result) => result,
        Err(payload) => Err(TransitionFault::Panic {
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
