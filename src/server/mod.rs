//! The analysis daemon
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                              Supervisor                               │
//! │   signals ──┐        UnixListener          WatchService               │
//! │             │             │                     │                     │
//! │             │     ┌───────┴────────┐     ┌──────┴───────┐             │
//! │             │     │ connection (n) │     │   listener   │             │
//! │             │     └───────┬────────┘     └──────┬───────┘             │
//! │             │             │  Command (mpsc)     │                     │
//! │             │     ┌───────┴─────────────────────┴──────┐              │
//! │             └────>│ StateActor ── owns ServerState     │              │
//! │      ActorSignal<─│   dispatch / update / bootstrap    │              │
//! │                   └────────────────────────────────────┘              │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Concurrency
//!
//! Exactly one task owns [`ServerState`]. Everything else talks to it by
//! message, so there are no locks around the analysis state and every
//! transition sees a consistent snapshot.
//!
//! # Modules
//!
//! - `actor` - the state owner and its command channel
//! - `bootstrap` - cold start or saved-state restore
//! - `connection` - per-client line protocol
//! - `dispatch` - request to state transition
//! - `events` - lifecycle notifications for an external supervisor
//! - `state` - the daemon state and its collaborators
//! - `subscriptions` - push channels
//! - `supervisor` - startup, accept loop, shutdown
//! - `watcher` - file watching and saved-state lookup

pub mod actor;
pub mod bootstrap;
pub mod connection;
pub mod dispatch;
pub mod events;
pub mod state;
pub mod subscriptions;
pub mod supervisor;
pub mod watcher;

pub use actor::{ActorHandle, ActorSignal, Command, StateActor};
pub use bootstrap::{bootstrap, BootstrapPath, BootstrapReport, SavedStateFetch};
pub use connection::{handle_connection, MAX_LINE_BYTES};
pub use dispatch::{dispatch, update, Transition};
pub use events::{EventEmitter, ServerEvent};
pub use state::{Collaborators, ServerState};
pub use subscriptions::{ResponseSink, SubscriptionRegistry};
pub use supervisor::{wait_for_interrupt, ShutdownReason, Supervisor};
pub use watcher::{
    run_listener, NotifyWatchService, WatchFilter, WatchService, WatchSubscription, WatcherConfig,
};
