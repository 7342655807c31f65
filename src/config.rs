//! Server configuration
//!
//! Loaded once at startup from `.checkd.toml` (plus CLI overrides) and never
//! mutated afterwards. Every field has a default, so an empty file is valid.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DaemonError, Result};
use crate::paths::{absolute_path, resolve_against};

/// Project configuration file name
pub const CONFIGURATION_FILE: &str = ".checkd.toml";

/// Per-directory local configuration file name
pub const LOCAL_CONFIGURATION_FILE: &str = ".checkd.local.toml";

/// How the daemon builds its initial state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SavedStateAction {
    /// Analyze the whole project from scratch
    #[default]
    None,
    /// Restore a snapshot at a known location, then catch up on the files
    /// listed (one per line) in `changed_files_path`
    LoadFromFile {
        snapshot_path: PathBuf,
        #[serde(default)]
        changed_files_path: Option<PathBuf>,
    },
    /// Ask the watch-backed project store for the project's latest snapshot
    LoadFromProject {
        project_name: String,
        #[serde(default)]
        metadata: Option<String>,
    },
}

/// Immutable daemon configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfiguration {
    /// Root of the sources the checker analyzes
    pub project_root: PathBuf,
    /// Project log directory; the socket address is derived from it
    pub log_path: PathBuf,
    /// Bootstrap strategy
    pub saved_state: SavedStateAction,
    /// Extra base names whose change invalidates the whole daemon
    pub critical_files: Vec<String>,
    /// Source-file extensions, without the leading dot
    pub extensions: Vec<String>,
    /// Directory to watch; `None` disables watch integration
    pub watch_root: Option<PathBuf>,
    /// Module prefixes excluded from re-analysis
    pub skip_analysis: Vec<String>,
    /// Write lifecycle events as JSON lines to stdout
    pub emit_events: bool,
}

impl Default for ServerConfiguration {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            log_path: PathBuf::from(".checkd"),
            saved_state: SavedStateAction::None,
            critical_files: Vec::new(),
            extensions: vec!["py".to_string(), "pyi".to_string()],
            watch_root: None,
            skip_analysis: Vec::new(),
            emit_events: false,
        }
    }
}

impl ServerConfiguration {
    /// Configuration rooted at `project_root` with defaults everywhere else
    pub fn for_project(project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        Self {
            log_path: project_root.join(".checkd"),
            project_root,
            ..Self::default()
        }
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| DaemonError::config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// Relative paths inside the file are resolved against the file's
    /// directory.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            DaemonError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&text)?;
        let base = path
            .parent()
            .map(absolute_path)
            .unwrap_or_else(|| absolute_path(Path::new(".")));
        Ok(config.resolved(&base))
    }

    /// Make every path absolute against `base`.
    pub fn resolved(mut self, base: &Path) -> Self {
        self.project_root = absolute_path(&resolve_against(base, &self.project_root));
        self.log_path = absolute_path(&resolve_against(base, &self.log_path));
        self.watch_root = self
            .watch_root
            .map(|root| absolute_path(&resolve_against(base, &root)));
        self.saved_state = match self.saved_state {
            SavedStateAction::LoadFromFile {
                snapshot_path,
                changed_files_path,
            } => SavedStateAction::LoadFromFile {
                snapshot_path: resolve_against(base, &snapshot_path),
                changed_files_path: changed_files_path.map(|p| resolve_against(base, &p)),
            },
            other => other,
        };
        self
    }

    /// Reject configurations the daemon cannot start with
    pub fn validate(&self) -> Result<()> {
        if self.extensions.is_empty() {
            return Err(DaemonError::config("at least one source extension is required"));
        }
        if let Some(bad) = self
            .extensions
            .iter()
            .find(|ext| ext.is_empty() || ext.starts_with('.'))
        {
            return Err(DaemonError::config(format!(
                "extension {:?} must be non-empty and given without a leading dot",
                bad
            )));
        }
        if !self.project_root.is_dir() {
            return Err(DaemonError::config(format!(
                "project root {} is not a directory",
                self.project_root.display()
            )));
        }
        if let SavedStateAction::LoadFromProject { project_name, .. } = &self.saved_state {
            if project_name.trim().is_empty() {
                return Err(DaemonError::config("saved-state project name is empty"));
            }
        }
        Ok(())
    }

    /// Critical base names, always including the configuration files
    pub fn critical_file_names(&self) -> BTreeSet<String> {
        let mut names: BTreeSet<String> = self
            .critical_files
            .iter()
            .map(|name| {
                Path::new(name)
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| name.clone())
            })
            .collect();
        names.insert(CONFIGURATION_FILE.to_string());
        names.insert(LOCAL_CONFIGURATION_FILE.to_string());
        names
    }

    /// True if `path` names a critical file
    pub fn is_critical_file(&self, path: &Path) -> bool {
        path.file_name()
            .map(|name| {
                self.critical_file_names()
                    .contains(name.to_string_lossy().as_ref())
            })
            .unwrap_or(false)
    }

    /// True if `path` has one of the configured source extensions
    pub fn is_source_file(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| {
                let ext = ext.to_string_lossy();
                self.extensions.iter().any(|known| known == ext.as_ref())
            })
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfiguration::default();
        assert_eq!(config.saved_state, SavedStateAction::None);
        assert!(config.watch_root.is_none());
        assert_eq!(config.extensions, vec!["py", "pyi"]);
    }

    #[test]
    fn test_parse_load_from_file() {
        let config = ServerConfiguration::from_toml_str(
            r#"
project_root = "src"
extensions = ["py"]

[saved_state]
action = "load_from_file"
snapshot_path = "state.bin"
changed_files_path = "changed.txt"
"#,
        )
        .unwrap();

        assert_eq!(
            config.saved_state,
            SavedStateAction::LoadFromFile {
                snapshot_path: PathBuf::from("state.bin"),
                changed_files_path: Some(PathBuf::from("changed.txt")),
            }
        );
    }

    #[test]
    fn test_parse_load_from_project() {
        let config = ServerConfiguration::from_toml_str(
            r#"
watch_root = "."

[saved_state]
action = "load_from_project"
project_name = "monorepo"
"#,
        )
        .unwrap();

        assert!(matches!(
            config.saved_state,
            SavedStateAction::LoadFromProject { ref project_name, metadata: None } if project_name == "monorepo"
        ));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let err = ServerConfiguration::from_toml_str("no_such_field = 1").unwrap_err();
        assert!(matches!(err, DaemonError::Config { .. }));
    }

    #[test]
    fn test_resolved_paths_are_absolute() {
        let config = ServerConfiguration::from_toml_str(
            r#"
project_root = "src"
log_path = "logs"
watch_root = "."
"#,
        )
        .unwrap()
        .resolved(Path::new("/repo"));

        assert_eq!(config.project_root, PathBuf::from("/repo/src"));
        assert_eq!(config.log_path, PathBuf::from("/repo/logs"));
        assert_eq!(config.watch_root, Some(PathBuf::from("/repo")));
    }

    #[test]
    fn test_critical_files_include_configuration() {
        let mut config = ServerConfiguration::default();
        config.critical_files = vec!["tools/BUCK".to_string()];

        let names = config.critical_file_names();
        assert!(names.contains("BUCK"));
        assert!(names.contains(CONFIGURATION_FILE));
        assert!(names.contains(LOCAL_CONFIGURATION_FILE));
        assert!(config.is_critical_file(Path::new("/repo/.checkd.toml")));
        assert!(!config.is_critical_file(Path::new("/repo/a.py")));
    }

    #[test]
    fn test_validate_rejects_dotted_extension() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = ServerConfiguration::for_project(dir.path());
        assert!(config.validate().is_ok());

        config.extensions = vec![".py".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_is_source_file() {
        let config = ServerConfiguration::default();
        assert!(config.is_source_file(Path::new("pkg/mod.py")));
        assert!(config.is_source_file(Path::new("pkg/mod.pyi")));
        assert!(!config.is_source_file(Path::new("pkg/mod.rs")));
        assert!(!config.is_source_file(Path::new("Makefile")));
    }
}
