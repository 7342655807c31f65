//! File watching
//!
//! The daemon consumes a [`WatchService`]: a subscription yields batches of
//! changed absolute paths, and a query locates a project's latest saved
//! state. [`NotifyWatchService`] implements both on top of `notify`.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌────────────┐
//! │   notify    │────>│  debouncer  │────>│ WatchFilter │────>│ StateActor │
//! │   watcher   │     │  (100ms)    │     │             │     │  (update)  │
//! └─────────────┘     └─────────────┘     └─────────────┘     └────────────┘
//! ```
//!
//! A watch stream that errors or closes is a lost watch. The daemon cannot
//! know what it missed, so the listener reports it and the supervisor shuts
//! down.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};

use ignore::WalkBuilder;
use notify::{RecursiveMode, Watcher};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult};
use serde::Deserialize;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tracing::{debug, info};

use crate::config::ServerConfiguration;
use crate::error::WatchError;
use crate::paths::{absolute_path, resolve_against};

use super::actor::ActorHandle;
use super::bootstrap::SavedStateFetch;

/// Directories whose contents are never reported
const IGNORED_DIRS: &[&str] = &[
    ".git",
    "target",
    "node_modules",
    "__pycache__",
    ".venv",
    "venv",
    "dist",
    "build",
];

/// Which paths a watch reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchFilter {
    /// Exact base names, critical files included
    pub base_names: BTreeSet<String>,
    /// File name suffixes, with the leading dot
    pub suffixes: Vec<String>,
}

impl WatchFilter {
    pub fn from_configuration(config: &ServerConfiguration) -> Self {
        Self {
            base_names: config.critical_file_names(),
            suffixes: config
                .extensions
                .iter()
                .map(|ext| format!(".{}", ext))
                .collect(),
        }
    }

    /// Like [`WatchFilter::matches`], ignoring directories above `root`
    pub fn matches_in(&self, root: &Path, path: &Path) -> bool {
        self.matches(path.strip_prefix(root).unwrap_or(path))
    }

    pub fn matches(&self, path: &Path) -> bool {
        if is_ignored(path) {
            return false;
        }
        let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
            return false;
        };
        self.base_names.contains(name.as_ref())
            || self.suffixes.iter().any(|suffix| name.ends_with(suffix.as_str()))
    }
}

fn is_ignored(path: &Path) -> bool {
    path.components().any(|component| match component {
        Component::Normal(name) => name
            .to_str()
            .map(|name| IGNORED_DIRS.contains(&name))
            .unwrap_or(false),
        _ => false,
    })
}

/// A live watch: batches arrive on `batches` for as long as this value is
/// kept alive.
pub struct WatchSubscription {
    pub batches: UnboundedReceiver<Result<Vec<PathBuf>, WatchError>>,
    _guard: Box<dyn Send>,
}

impl WatchSubscription {
    /// `guard` is dropped with the subscription and should stop the
    /// underlying watcher.
    pub fn new(
        batches: UnboundedReceiver<Result<Vec<PathBuf>, WatchError>>,
        guard: impl Send + 'static,
    ) -> Self {
        Self {
            batches,
            _guard: Box::new(guard),
        }
    }
}

impl std::fmt::Debug for WatchSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchSubscription").finish_non_exhaustive()
    }
}

/// Change-notification service
pub trait WatchService: Send + Sync {
    fn subscribe(&self, root: &Path, filter: &WatchFilter) -> Result<WatchSubscription, WatchError>;

    /// Locate `project_name`'s latest snapshot and the files changed since.
    fn query_saved_state(
        &self,
        root: &Path,
        filter: &WatchFilter,
        project_name: &str,
        metadata: Option<&str>,
    ) -> Result<SavedStateFetch, WatchError>;
}

/// Configuration for the notify-backed watcher
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Debounce duration (default: 100ms)
    pub debounce_duration: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_duration: Duration::from_millis(100),
        }
    }
}

/// Saved-state descriptor under `<root>/.checkd/saved_states/<project>.json`
#[derive(Debug, Deserialize)]
struct SavedStateDescriptor {
    snapshot: PathBuf,
    #[serde(default)]
    metadata: Option<String>,
}

/// Recursive watcher built on `notify` and `notify-debouncer-mini`
#[derive(Debug, Clone, Default)]
pub struct NotifyWatchService {
    config: WatcherConfig,
}

impl NotifyWatchService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: WatcherConfig) -> Self {
        Self { config }
    }

    /// Descriptor location for a project's saved state
    pub fn descriptor_path(root: &Path, project_name: &str) -> PathBuf {
        root.join(".checkd")
            .join("saved_states")
            .join(format!("{}.json", project_name))
    }

    fn modified(path: &Path) -> Result<SystemTime, WatchError> {
        fs::metadata(path)
            .and_then(|meta| meta.modified())
            .map_err(|e| WatchError::Query(format!("cannot stat {}: {}", path.display(), e)))
    }
}

impl WatchService for NotifyWatchService {
    fn subscribe(&self, root: &Path, filter: &WatchFilter) -> Result<WatchSubscription, WatchError> {
        let root = absolute_path(root);
        let (tx, rx) = unbounded_channel();
        let batch_filter = filter.clone();
        let batch_root = root.clone();

        let mut debouncer = new_debouncer(
            self.config.debounce_duration,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    let paths: BTreeSet<PathBuf> = events
                        .into_iter()
                        .map(|event| event.path)
                        .filter(|path| batch_filter.matches_in(&batch_root, path))
                        .collect();
                    if !paths.is_empty() {
                        debug!(count = paths.len(), "watch batch");
                        let _ = tx.send(Ok(paths.into_iter().collect()));
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(WatchError::Connection(format!("{:?}", e))));
                }
            },
        )
        .map_err(|e| WatchError::Subscription(e.to_string()))?;

        debouncer
            .watcher()
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| WatchError::Subscription(format!("{}: {}", root.display(), e)))?;

        info!(root = %root.display(), "watching for changes");
        Ok(WatchSubscription::new(rx, debouncer))
    }

    fn query_saved_state(
        &self,
        root: &Path,
        filter: &WatchFilter,
        project_name: &str,
        metadata: Option<&str>,
    ) -> Result<SavedStateFetch, WatchError> {
        let root = absolute_path(root);
        let descriptor_path = Self::descriptor_path(&root, project_name);
        let text = fs::read_to_string(&descriptor_path).map_err(|e| {
            WatchError::Query(format!(
                "no saved state for project {:?} at {}: {}",
                project_name,
                descriptor_path.display(),
                e
            ))
        })?;
        let descriptor: SavedStateDescriptor = serde_json::from_str(&text).map_err(|e| {
            WatchError::Query(format!(
                "malformed descriptor {}: {}",
                descriptor_path.display(),
                e
            ))
        })?;

        if let Some(wanted) = metadata {
            if descriptor.metadata.as_deref() != Some(wanted) {
                return Err(WatchError::Query(format!(
                    "saved state for project {:?} does not match metadata {:?}",
                    project_name, wanted
                )));
            }
        }

        let base = descriptor_path.parent().unwrap_or(root.as_path());
        let snapshot_path = resolve_against(base, &descriptor.snapshot);
        let taken_at = Self::modified(&snapshot_path)?;

        let mut changed_files: Vec<PathBuf> = WalkBuilder::new(&root)
            .hidden(false)
            .git_ignore(true)
            .git_global(false)
            .git_exclude(true)
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !entry
                        .file_name()
                        .to_str()
                        .map(|name| IGNORED_DIRS.contains(&name))
                        .unwrap_or(false)
            })
            .build()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter(|e| filter.matches_in(&root, e.path()))
            .filter(|e| {
                e.metadata()
                    .ok()
                    .and_then(|meta| meta.modified().ok())
                    .map(|modified| modified > taken_at)
                    .unwrap_or(true)
            })
            .map(|e| e.into_path())
            .collect();
        changed_files.sort();

        debug!(
            project = project_name,
            snapshot = %snapshot_path.display(),
            changed = changed_files.len(),
            "saved state located"
        );
        Ok(SavedStateFetch {
            snapshot_path,
            changed_files,
        })
    }
}

/// Forward watch batches to the state actor until the watch is lost.
///
/// Returns `Ok(())` if the actor went away first; its own fault report is
/// what ends the daemon in that case.
pub async fn run_listener(
    mut subscription: WatchSubscription,
    actor: ActorHandle,
) -> Result<(), WatchError> {
    loop {
        match subscription.batches.recv().await {
            Some(Ok(paths)) => {
                if paths.is_empty() {
                    continue;
                }
                debug!(count = paths.len(), "forwarding watch batch");
                if !actor.watch_batch(paths) {
                    return Ok(());
                }
            }
            Some(Err(e)) => return Err(e),
            None => {
                return Err(WatchError::Connection(
                    "watch stream closed unexpectedly".to_string(),
                ))
            }
        }
    }
}
