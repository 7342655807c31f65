//! CLI argument definitions using clap
//!
//! Flags override values from the configuration file. Without `--config`,
//! the project root is searched for `.checkd.local.toml` and then
//! `.checkd.toml`; the first one found wins.

use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::debug;

use crate::config::{
    SavedStateAction, ServerConfiguration, CONFIGURATION_FILE, LOCAL_CONFIGURATION_FILE,
};
use crate::error::Result;
use crate::paths::absolute_path;

/// Incremental static-analysis daemon
#[derive(Parser, Debug)]
#[command(name = "checkd")]
#[command(about = "Incremental static-analysis daemon serving line-delimited JSON over a Unix socket")]
#[command(version)]
pub struct Cli {
    /// Project to analyze (defaults to the current directory)
    #[arg(long, env = "CHECKD_PROJECT_ROOT", value_name = "DIR")]
    pub project_root: Option<PathBuf>,

    /// Configuration file (defaults to searching the project root)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log directory; the socket address is derived from it
    #[arg(long, value_name = "DIR")]
    pub log_path: Option<PathBuf>,

    /// Watch this directory for changes
    #[arg(long, value_name = "DIR", conflicts_with = "no_watch")]
    pub watch_root: Option<PathBuf>,

    /// Disable watch integration even if configured
    #[arg(long)]
    pub no_watch: bool,

    /// Restore from this snapshot instead of a cold start
    #[arg(long, value_name = "SNAPSHOT", conflicts_with = "saved_state_project")]
    pub load_saved_state: Option<PathBuf>,

    /// Files changed since the snapshot was taken, one per line
    #[arg(long, value_name = "FILE", requires = "load_saved_state")]
    pub changed_files: Option<PathBuf>,

    /// Restore the latest snapshot recorded for this project
    #[arg(long, value_name = "NAME")]
    pub saved_state_project: Option<String>,

    /// Only accept a project snapshot recorded with this metadata
    #[arg(long, value_name = "TEXT", requires = "saved_state_project")]
    pub saved_state_metadata: Option<String>,

    /// Write lifecycle events as JSON lines to stdout
    #[arg(long)]
    pub emit_events: bool,
}

impl Cli {
    /// Build the validated configuration: file first, then flag overrides.
    pub fn configuration(&self) -> Result<ServerConfiguration> {
        let search_root = absolute_path(
            self.project_root
                .as_deref()
                .unwrap_or_else(|| Path::new(".")),
        );

        let mut config = match &self.config {
            Some(path) => ServerConfiguration::load(path)?,
            None => match find_configuration(&search_root) {
                Some(path) => {
                    debug!(config = %path.display(), "using configuration file");
                    ServerConfiguration::load(&path)?
                }
                None => ServerConfiguration::for_project(&search_root),
            },
        };

        if self.project_root.is_some() {
            config.project_root = search_root;
        }
        if let Some(log_path) = &self.log_path {
            config.log_path = absolute_path(log_path);
        }
        if let Some(watch_root) = &self.watch_root {
            config.watch_root = Some(absolute_path(watch_root));
        }
        if self.no_watch {
            config.watch_root = None;
        }
        if let Some(snapshot_path) = &self.load_saved_state {
            config.saved_state = SavedStateAction::LoadFromFile {
                snapshot_path: absolute_path(snapshot_path),
                changed_files_path: self.changed_files.as_deref().map(absolute_path),
            };
        }
        if let Some(project_name) = &self.saved_state_project {
            config.saved_state = SavedStateAction::LoadFromProject {
                project_name: project_name.clone(),
                metadata: self.saved_state_metadata.clone(),
            };
        }
        config.emit_events |= self.emit_events;

        config.validate()?;
        Ok(config)
    }
}

/// First configuration file present in `root`, local file first
fn find_configuration(root: &Path) -> Option<PathBuf> {
    [LOCAL_CONFIGURATION_FILE, CONFIGURATION_FILE]
        .iter()
        .map(|name| root.join(name))
        .find(|path| path.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DaemonError;
    use std::fs;
    use tempfile::TempDir;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["checkd"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults_without_configuration_file() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_str().unwrap();
        let config = parse(&["--project-root", root]).configuration().unwrap();

        assert_eq!(config.project_root, absolute_path(dir.path()));
        assert_eq!(config.log_path, absolute_path(dir.path()).join(".checkd"));
        assert_eq!(config.saved_state, SavedStateAction::None);
        assert!(config.watch_root.is_none());
        assert!(!config.emit_events);
    }

    #[test]
    fn test_local_configuration_wins() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CONFIGURATION_FILE), "skip_analysis = [\"shared\"]\n").unwrap();
        fs::write(dir.path().join(LOCAL_CONFIGURATION_FILE), "skip_analysis = [\"local\"]\n").unwrap();

        let root = dir.path().to_str().unwrap();
        let config = parse(&["--project-root", root]).configuration().unwrap();
        assert_eq!(config.skip_analysis, vec!["local"]);
    }

    #[test]
    fn test_flags_override_file() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(CONFIGURATION_FILE),
            "watch_root = \".\"\nemit_events = false\n",
        )
        .unwrap();

        let root = dir.path().to_str().unwrap();
        let config = parse(&["--project-root", root, "--no-watch", "--emit-events"])
            .configuration()
            .unwrap();
        assert!(config.watch_root.is_none());
        assert!(config.emit_events);
    }

    #[test]
    fn test_load_saved_state_flags() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_str().unwrap();
        let config = parse(&[
            "--project-root",
            root,
            "--load-saved-state",
            "/tmp/state.bin",
            "--changed-files",
            "/tmp/changed.txt",
        ])
        .configuration()
        .unwrap();

        assert_eq!(
            config.saved_state,
            SavedStateAction::LoadFromFile {
                snapshot_path: PathBuf::from("/tmp/state.bin"),
                changed_files_path: Some(PathBuf::from("/tmp/changed.txt")),
            }
        );
    }

    #[test]
    fn test_changed_files_requires_snapshot() {
        assert!(Cli::try_parse_from(["checkd", "--changed-files", "x.txt"]).is_err());
    }

    #[test]
    fn test_saved_state_sources_conflict() {
        let result = Cli::try_parse_from([
            "checkd",
            "--load-saved-state",
            "a.bin",
            "--saved-state-project",
            "p",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_project_root_is_config_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        let err = parse(&["--project-root", missing.to_str().unwrap()])
            .configuration()
            .unwrap_err();
        assert!(matches!(err, DaemonError::Config { .. }));
    }
}
