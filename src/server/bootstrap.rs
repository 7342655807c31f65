//! Initial state construction
//!
//! ```text
//! None ───────────────────────────────────────────────> ColdStart ─> Ready
//! LoadFromFile / LoadFromProject ─> Fetch ─> Load ─> CatchUp ──────> Ready
//!                                      └──────┴── failure ─> ColdStart
//! ```
//!
//! Fetch and load failures are never fatal: they are logged once as a
//! warning and the daemon starts cold. A failing cold start is a fault.

use std::fmt;
use std::fs;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::config::{SavedStateAction, ServerConfiguration};
use crate::error::{SavedStateError, TransitionFault};
use crate::paths::resolve_against;
use crate::schema::ErrorTable;

use super::dispatch;
use super::state::{Collaborators, ServerState};
use super::watcher::WatchFilter;

/// A located snapshot plus the files changed since it was taken
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedStateFetch {
    pub snapshot_path: PathBuf,
    pub changed_files: Vec<PathBuf>,
}

/// How the daemon reached Ready
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BootstrapPath {
    /// Not bootstrapped yet
    #[default]
    Pending,
    ColdStart,
    SavedState {
        snapshot_path: PathBuf,
        changed_files: usize,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    pub path: BootstrapPath,
    /// Why a configured saved state was not used
    pub fallback: Option<String>,
}

impl fmt::Display for BootstrapReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            BootstrapPath::Pending => write!(f, "pending")?,
            BootstrapPath::ColdStart => write!(f, "cold start")?,
            BootstrapPath::SavedState {
                snapshot_path,
                changed_files,
            } => write!(
                f,
                "saved state {} with {} changed files",
                snapshot_path.display(),
                changed_files
            )?,
        }
        if let Some(cause) = &self.fallback {
            write!(f, " (saved state unavailable: {})", cause)?;
        }
        Ok(())
    }
}

/// Build the Ready state from an empty seed.
pub fn bootstrap(
    collaborators: &Collaborators,
    seed: ServerState,
) -> Result<ServerState, TransitionFault> {
    let config = seed.configuration.clone();

    let fallback = match &config.saved_state {
        SavedStateAction::None => None,
        action => match restore(collaborators, &seed, &config, action) {
            Ok(state) => {
                info!(bootstrap = %state.bootstrap, "bootstrap complete");
                return Ok(state);
            }
            Err(Restore::Fault(fault)) => return Err(fault),
            Err(Restore::Unavailable(e)) => {
                warn!(error = %e, "failed to restore saved state, falling back to a cold start");
                Some(e.to_string())
            }
        },
    };

    let outcome = collaborators.checker.check_project(&config)?;
    let mut state = seed.with_analysis(outcome.environment, ErrorTable::from_errors(outcome.errors));
    state.bootstrap = BootstrapReport {
        path: BootstrapPath::ColdStart,
        fallback,
    };
    info!(
        bootstrap = %state.bootstrap,
        modules = state.environment.modules.len(),
        errors = state.errors.error_count(),
        "bootstrap complete"
    );
    Ok(state)
}

enum Restore {
    /// Fall back to a cold start
    Unavailable(SavedStateError),
    /// Catch-up failed after the snapshot loaded
    Fault(TransitionFault),
}

impl From<SavedStateError> for Restore {
    fn from(e: SavedStateError) -> Self {
        Self::Unavailable(e)
    }
}

fn restore(
    collaborators: &Collaborators,
    seed: &ServerState,
    config: &ServerConfiguration,
    action: &SavedStateAction,
) -> Result<ServerState, Restore> {
    let fetch = fetch(collaborators, config, action)?;
    let saved = collaborators
        .snapshots
        .load(&fetch.snapshot_path)
        .map_err(SavedStateError::from)?;

    let mut state = seed.with_analysis(saved.environment, saved.errors);
    state.bootstrap = BootstrapReport {
        path: BootstrapPath::SavedState {
            snapshot_path: fetch.snapshot_path.clone(),
            changed_files: fetch.changed_files.len(),
        },
        fallback: None,
    };

    // Critical files are already reflected in the configuration just loaded
    let catch_up: Vec<PathBuf> = fetch
        .changed_files
        .into_iter()
        .filter(|path| !config.is_critical_file(path))
        .collect();
    if catch_up.is_empty() {
        return Ok(state);
    }

    let transition = dispatch::update(collaborators, &state, &catch_up).map_err(Restore::Fault)?;
    Ok(transition.state.unwrap_or(state))
}

fn fetch(
    collaborators: &Collaborators,
    config: &ServerConfiguration,
    action: &SavedStateAction,
) -> Result<SavedStateFetch, SavedStateError> {
    match action {
        SavedStateAction::None => Err(SavedStateError::Descriptor(
            "no saved state configured".to_string(),
        )),
        SavedStateAction::LoadFromFile {
            snapshot_path,
            changed_files_path,
        } => {
            let changed_files = match changed_files_path {
                Some(list) => read_changed_files(config, list)?,
                None => Vec::new(),
            };
            Ok(SavedStateFetch {
                snapshot_path: resolve_against(&config.project_root, snapshot_path),
                changed_files,
            })
        }
        SavedStateAction::LoadFromProject {
            project_name,
            metadata,
        } => {
            let watch = collaborators
                .watch
                .as_ref()
                .ok_or(SavedStateError::WatchDisabled)?;
            let root = config
                .watch_root
                .clone()
                .unwrap_or_else(|| config.project_root.clone());
            let filter = WatchFilter::from_configuration(config);
            Ok(watch.query_saved_state(&root, &filter, project_name, metadata.as_deref())?)
        }
    }
}

/// Newline-delimited path list; blank lines are skipped and relative paths
/// resolve against the project root.
fn read_changed_files(
    config: &ServerConfiguration,
    list: &std::path::Path,
) -> Result<Vec<PathBuf>, SavedStateError> {
    let text = fs::read_to_string(list).map_err(|source| SavedStateError::Io {
        path: list.to_path_buf(),
        source,
    })?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| resolve_against(&config.project_root, std::path::Path::new(line)))
        .collect())
}
