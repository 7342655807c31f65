//! TestProject builder for throwaway analysis projects

use std::fs;
use std::path::{Path, PathBuf};

use checkd::ServerConfiguration;
use tempfile::TempDir;

/// A temporary project directory with helpers to lay out source files
pub struct TestProject {
    dir: TempDir,
}

impl TestProject {
    /// Create a new empty project
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    /// A project with two modules that import cleanly
    pub fn clean() -> Self {
        let project = Self::new();
        project
            .add_file("app/__init__.py", "")
            .add_file("app/models.py", "class User:\n    pass\n")
            .add_file("app/views.py", "from app.models import User\n\n\ndef show(u: User):\n    return u\n");
        project
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn file(&self, relative_path: &str) -> PathBuf {
        self.dir.path().join(relative_path)
    }

    /// Add or overwrite a file with the given content
    pub fn add_file(&self, relative_path: &str, content: &str) -> &Self {
        let full_path = self.dir.path().join(relative_path);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dirs");
        }
        fs::write(&full_path, content).expect("Failed to write file");
        self
    }

    pub fn remove_file(&self, relative_path: &str) -> &Self {
        fs::remove_file(self.dir.path().join(relative_path)).expect("Failed to remove file");
        self
    }

    /// Default configuration rooted at this project
    pub fn configuration(&self) -> ServerConfiguration {
        ServerConfiguration::for_project(self.dir.path())
    }
}
