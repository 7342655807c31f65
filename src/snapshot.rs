//! Snapshot persistence
//!
//! A snapshot holds the analysis environment and the error table of one
//! committed generation. The default store writes a small header (magic and
//! format version) followed by the bincode body. Writes go to a `.tmp` file
//! first and are renamed into place, so a crash never leaves a torn snapshot.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::checker::Environment;
use crate::error::SnapshotError;
use crate::schema::ErrorTable;

const MAGIC: &[u8; 4] = b"CHKD";

/// Bump whenever `SavedEnvironment` changes shape
pub const FORMAT_VERSION: u32 = 1;

const HEADER_LEN: usize = 8;

/// Everything needed to resume without a full check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedEnvironment {
    pub environment: Environment,
    pub errors: ErrorTable,
}

/// Persists and restores [`SavedEnvironment`]s
pub trait SnapshotStore: Send + Sync {
    fn save(&self, saved: &SavedEnvironment, path: &Path) -> Result<(), SnapshotError>;

    /// Fails with `Missing` when nothing is stored at `path`, and with
    /// `Corrupt` or `Version` when the content cannot be used.
    fn load(&self, path: &Path) -> Result<SavedEnvironment, SnapshotError>;
}

/// bincode-backed store
#[derive(Debug, Default, Clone)]
pub struct BincodeSnapshotStore;

impl BincodeSnapshotStore {
    pub fn new() -> Self {
        Self
    }
}

impl SnapshotStore for BincodeSnapshotStore {
    fn save(&self, saved: &SavedEnvironment, path: &Path) -> Result<(), SnapshotError> {
        info!(path = %path.display(), "saving snapshot");

        let body = bincode::serialize(saved).map_err(|e| SnapshotError::Corrupt {
            path: path.to_path_buf(),
            message: format!("bincode: {}", e),
        })?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        // Atomic write: write to .tmp, then rename
        let tmp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(MAGIC)?;
        file.write_all(&FORMAT_VERSION.to_le_bytes())?;
        file.write_all(&body)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;

        debug!(
            bytes = body.len() + HEADER_LEN,
            modules = saved.environment.modules.len(),
            "snapshot saved"
        );
        Ok(())
    }

    fn load(&self, path: &Path) -> Result<SavedEnvironment, SnapshotError> {
        info!(path = %path.display(), "loading snapshot");

        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SnapshotError::Missing {
                    path: path.to_path_buf(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
            return Err(SnapshotError::Corrupt {
                path: path.to_path_buf(),
                message: "missing snapshot header".to_string(),
            });
        }
        let mut version = [0u8; 4];
        version.copy_from_slice(&bytes[4..HEADER_LEN]);
        let found = u32::from_le_bytes(version);
        if found != FORMAT_VERSION {
            return Err(SnapshotError::Version {
                path: path.to_path_buf(),
                found,
                expected: FORMAT_VERSION,
            });
        }

        let saved: SavedEnvironment =
            bincode::deserialize(&bytes[HEADER_LEN..]).map_err(|e| SnapshotError::Corrupt {
                path: path.to_path_buf(),
                message: format!("bincode: {}", e),
            })?;

        debug!(
            generation = saved.environment.generation,
            modules = saved.environment.modules.len(),
            errors = saved.errors.error_count(),
            "snapshot loaded"
        );
        Ok(saved)
    }
}
