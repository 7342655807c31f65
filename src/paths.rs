//! Socket path derivation
//!
//! The daemon's socket lives in the system temporary directory under a name
//! derived from the project's log path. Unix socket paths are limited to
//! roughly 100 bytes, so the log path is digested rather than embedded.
//!
//! The digest is FNV-1a/64. Collisions are possible in principle; this is an
//! addressing convention, not a security boundary.

use std::path::{Component, Path, PathBuf};

// FNV-1a constants for 64-bit hash
const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// File name prefix for daemon sockets
pub const SOCKET_PREFIX: &str = "checkd_server_";

/// File name suffix for daemon sockets
pub const SOCKET_SUFFIX: &str = ".sock";

/// Compute a stable FNV-1a hash
pub(crate) fn fnv1a_hash(data: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for byte in data {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Derive the socket path for a project log path.
///
/// Pure apart from reading the working directory for relative inputs and the
/// temporary directory location: the same log path always maps to the same
/// socket, so a restarted daemon is reachable at the address clients already
/// know.
pub fn derive_socket_path(log_path: &Path) -> PathBuf {
    derive_socket_path_in(&std::env::temp_dir(), log_path)
}

/// Same as [`derive_socket_path`] with an explicit socket directory.
pub fn derive_socket_path_in(socket_dir: &Path, log_path: &Path) -> PathBuf {
    let absolute = absolute_path(log_path);
    let digest = fnv1a_hash(absolute.as_os_str().as_encoded_bytes());
    socket_dir.join(format!("{SOCKET_PREFIX}{digest:016x}{SOCKET_SUFFIX}"))
}

/// Make a path absolute against the current directory without touching the
/// filesystem. `.` and `..` components are folded lexically.
pub fn absolute_path(path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Resolve `path` against `root` if it is relative.
pub fn resolve_against(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_derive_is_deterministic() {
        let log = Path::new("/home/user/project/.checkd");
        let first = derive_socket_path(log);
        let second = derive_socket_path(log);
        assert_eq!(first, second);
    }

    #[test]
    fn test_derive_template() {
        let socket = derive_socket_path_in(Path::new("/tmp"), Path::new("/var/log/project"));
        let name = socket.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with(SOCKET_PREFIX));
        assert!(name.ends_with(SOCKET_SUFFIX));
        // prefix + 16 hex digits + suffix
        assert_eq!(name.len(), SOCKET_PREFIX.len() + 16 + SOCKET_SUFFIX.len());
        assert_eq!(socket.parent(), Some(Path::new("/tmp")));
    }

    #[test]
    fn test_no_collisions_across_synthetic_paths() {
        let mut seen = HashSet::new();
        for i in 0..5000 {
            let log = PathBuf::from(format!("/projects/repo-{i}/.checkd"));
            assert!(seen.insert(derive_socket_path_in(Path::new("/tmp"), &log)));
        }
    }

    #[test]
    fn test_equivalent_spellings_share_a_socket() {
        let plain = derive_socket_path_in(Path::new("/tmp"), Path::new("/a/b/log"));
        let dotted = derive_socket_path_in(Path::new("/tmp"), Path::new("/a/./c/../b/log"));
        assert_eq!(plain, dotted);
    }

    #[test]
    fn test_relative_log_path_uses_cwd() {
        let cwd = std::env::current_dir().unwrap();
        let relative = derive_socket_path_in(Path::new("/tmp"), Path::new("logs"));
        let absolute = derive_socket_path_in(Path::new("/tmp"), &cwd.join("logs"));
        assert_eq!(relative, absolute);
    }

    #[test]
    fn test_resolve_against() {
        let root = Path::new("/repo");
        assert_eq!(resolve_against(root, Path::new("a.py")), PathBuf::from("/repo/a.py"));
        assert_eq!(resolve_against(root, Path::new("/x/a.py")), PathBuf::from("/x/a.py"));
    }
}
