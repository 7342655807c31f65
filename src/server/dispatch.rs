//! Request dispatch
//!
//! `dispatch` maps the current state and one request to a [`Transition`]:
//! the response, plus a replacement state when the request changed anything.
//! Client updates and watch batches share [`update`], so both take the same
//! path through the checker.
//!
//! Errors returned here are faults, not request errors. A request the daemon
//! can answer, even negatively, yields `Ok` with an `Error` response.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::TransitionFault;
use crate::paths::resolve_against;
use crate::protocol::{Request, Response};
use crate::schema::ModuleName;
use crate::snapshot::SavedEnvironment;

use super::state::{Collaborators, ServerState};

/// Outcome of one request
#[derive(Debug)]
pub struct Transition {
    /// Replacement state, or `None` if nothing changed
    pub state: Option<ServerState>,
    pub response: Response,
    /// The committed error table differs from the previous one
    pub errors_changed: bool,
    /// The client asked the daemon to stop
    pub shutdown: bool,
}

impl Transition {
    fn unchanged(response: Response) -> Self {
        Self {
            state: None,
            response,
            errors_changed: false,
            shutdown: false,
        }
    }
}

pub fn dispatch(
    collaborators: &Collaborators,
    state: &ServerState,
    request: Request,
) -> Result<Transition, TransitionFault> {
    match request {
        Request::DisplayTypeError { paths } => Ok(Transition::unchanged(display_type_errors(
            collaborators,
            state,
            &paths,
        ))),
        Request::IncrementalUpdate { paths } => update(collaborators, state, &paths),
        Request::GetInfo => Ok(Transition::unchanged(Response::Info(state.info()))),
        Request::SaveState { path } => Ok(Transition::unchanged(save_state(
            collaborators,
            state,
            &path,
        ))),
        Request::Stop => {
            info!("stop requested by client");
            Ok(Transition {
                shutdown: true,
                ..Transition::unchanged(Response::Ok)
            })
        }
    }
}

fn display_type_errors(
    collaborators: &Collaborators,
    state: &ServerState,
    paths: &[PathBuf],
) -> Response {
    if paths.is_empty() {
        return Response::TypeErrors(state.errors.all());
    }
    let config = &state.configuration;
    let modules: BTreeSet<ModuleName> = paths
        .iter()
        .filter_map(|path| collaborators.checker.module_of(config, path))
        .collect();
    Response::TypeErrors(state.errors.for_modules(&modules))
}

fn save_state(collaborators: &Collaborators, state: &ServerState, path: &Path) -> Response {
    let path = resolve_against(&state.configuration.project_root, path);
    let saved = SavedEnvironment {
        environment: state.environment.clone(),
        errors: state.errors.clone(),
    };
    match collaborators.snapshots.save(&saved, &path) {
        Ok(()) => Response::Ok,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to save state");
            Response::error(format!("Failed to save state: {}", e))
        }
    }
}

/// True if `module` is excluded from re-analysis by configuration
fn skips_analysis(skip_prefixes: &[String], module: &ModuleName) -> bool {
    skip_prefixes
        .iter()
        .any(|prefix| module.starts_with_module(prefix))
}

/// Fold changed paths into the state.
///
/// A critical file among `paths` is a fault. Paths that are not project
/// sources, or whose module is excluded by `skip_analysis`, are dropped; when
/// nothing remains the previous result is returned unchanged.
pub fn update(
    collaborators: &Collaborators,
    state: &ServerState,
    paths: &[PathBuf],
) -> Result<Transition, TransitionFault> {
    let config = &state.configuration;
    let paths: Vec<PathBuf> = paths
        .iter()
        .map(|path| resolve_against(&config.project_root, path))
        .collect();

    if let Some(critical) = paths.iter().find(|path| config.is_critical_file(path)) {
        return Err(TransitionFault::CriticalFileChanged {
            path: critical.clone(),
        });
    }

    let retained: Vec<PathBuf> = paths
        .into_iter()
        .filter(|path| match collaborators.checker.module_of(config, path) {
            Some(module) if skips_analysis(&config.skip_analysis, &module) => {
                debug!(%module, "skipping analysis");
                false
            }
            Some(_) => true,
            None => false,
        })
        .collect();

    if retained.is_empty() {
        return Ok(Transition::unchanged(Response::TypeErrors(
            state.errors.all(),
        )));
    }

    let recheck = collaborators
        .checker
        .recheck(config, &state.environment, &retained)?;
    let errors = state
        .errors
        .replace_modules(&recheck.rechecked, recheck.errors);
    let errors_changed = errors != state.errors;

    info!(
        generation = recheck.environment.generation,
        changed = retained.len(),
        rechecked = recheck.rechecked.len(),
        errors = errors.error_count(),
        "incremental update committed"
    );

    let response = Response::TypeErrors(errors.all());
    Ok(Transition {
        state: Some(state.with_analysis(recheck.environment, errors)),
        response,
        errors_changed,
        shutdown: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::SyntaxChecker;
    use crate::config::ServerConfiguration;
    use crate::snapshot::{BincodeSnapshotStore, SnapshotStore};
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        collaborators: Collaborators,
        state: ServerState,
    }

    fn fixture(files: &[(&str, &str)], configure: impl FnOnce(&mut ServerConfiguration)) -> Fixture {
        let dir = TempDir::new().unwrap();
        for (relative, content) in files {
            let path = dir.path().join(relative);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        let mut config = ServerConfiguration::for_project(dir.path());
        configure(&mut config);

        let collaborators = Collaborators {
            checker: Arc::new(SyntaxChecker::new()),
            snapshots: Arc::new(BincodeSnapshotStore::new()),
            watch: None,
        };
        let outcome = collaborators.checker.check_project(&config).unwrap();
        let state = ServerState::seed(
            dir.path().join("test.sock"),
            Arc::new(config),
            "now".to_string(),
        )
        .with_analysis(
            outcome.environment,
            crate::schema::ErrorTable::from_errors(outcome.errors),
        );

        Fixture {
            dir,
            collaborators,
            state,
        }
    }

    fn type_errors(response: &Response) -> usize {
        match response {
            Response::TypeErrors(errors) => errors.len(),
            other => panic!("Expected TypeErrors, got {:?}", other),
        }
    }

    #[test]
    fn test_display_all_and_by_path() {
        let f = fixture(&[("a.py", "def f(:\n"), ("b.py", "X = 1\n")], |_| {});

        let all = dispatch(&f.collaborators, &f.state, Request::DisplayTypeError { paths: vec![] })
            .unwrap();
        assert!(type_errors(&all.response) > 0);
        assert!(all.state.is_none());

        let only_b = dispatch(
            &f.collaborators,
            &f.state,
            Request::DisplayTypeError {
                paths: vec![f.dir.path().join("b.py")],
            },
        )
        .unwrap();
        assert_eq!(type_errors(&only_b.response), 0);
    }

    #[test]
    fn test_update_commits_new_generation() {
        let f = fixture(&[("a.py", "X = 1\n")], |_| {});
        fs::write(f.dir.path().join("a.py"), "def f(:\n").unwrap();

        let transition = dispatch(
            &f.collaborators,
            &f.state,
            Request::IncrementalUpdate {
                paths: vec![PathBuf::from("a.py")],
            },
        )
        .unwrap();

        assert!(transition.errors_changed);
        let next = transition.state.unwrap();
        assert_eq!(next.environment.generation, f.state.environment.generation + 1);
        assert!(!next.errors.is_empty());
    }

    #[test]
    fn test_update_without_error_change_does_not_push() {
        let f = fixture(&[("a.py", "X = 1\n")], |_| {});
        fs::write(f.dir.path().join("a.py"), "X = 2\n").unwrap();

        let transition = update(&f.collaborators, &f.state, &[f.dir.path().join("a.py")]).unwrap();
        assert!(!transition.errors_changed);
        assert!(transition.state.is_some());
    }

    #[test]
    fn test_skipped_modules_short_circuit() {
        let f = fixture(&[("gen/a.py", "X = 1\n")], |config| {
            config.skip_analysis = vec!["gen".to_string()];
        });
        fs::write(f.dir.path().join("gen/a.py"), "def f(:\n").unwrap();

        let transition = update(&f.collaborators, &f.state, &[f.dir.path().join("gen/a.py")]).unwrap();
        assert!(transition.state.is_none());
        assert!(!transition.errors_changed);
        assert_eq!(type_errors(&transition.response), 0);
    }

    #[test]
    fn test_critical_file_is_a_fault() {
        let f = fixture(&[("a.py", "X = 1\n")], |_| {});
        let result = update(
            &f.collaborators,
            &f.state,
            &[f.dir.path().join("a.py"), f.dir.path().join(".checkd.toml")],
        );
        assert!(matches!(result, Err(TransitionFault::CriticalFileChanged { .. })));
    }

    #[test]
    fn test_save_state_writes_snapshot() {
        let f = fixture(&[("a.py", "X = 1\n")], |_| {});
        let path = f.dir.path().join("saved/state.bin");

        let transition = dispatch(
            &f.collaborators,
            &f.state,
            Request::SaveState { path: path.clone() },
        )
        .unwrap();
        assert_eq!(transition.response, Response::Ok);

        let saved = BincodeSnapshotStore::new().load(&path).unwrap();
        assert_eq!(saved.environment, f.state.environment);
    }

    #[test]
    fn test_save_state_failure_is_an_error_response() {
        let f = fixture(&[("a.py", "X = 1\n")], |_| {});
        // A plain file where the snapshot's parent directory should be
        fs::write(f.dir.path().join("blocker"), "").unwrap();

        let transition = dispatch(
            &f.collaborators,
            &f.state,
            Request::SaveState {
                path: f.dir.path().join("blocker/state.bin"),
            },
        )
        .unwrap();
        assert!(matches!(transition.response, Response::Error(_)));
        assert!(transition.state.is_none());
    }

    #[test]
    fn test_stop_requests_shutdown() {
        let f = fixture(&[], |_| {});
        let transition = dispatch(&f.collaborators, &f.state, Request::Stop).unwrap();
        assert!(transition.shutdown);
        assert_eq!(transition.response, Response::Ok);
    }
}
