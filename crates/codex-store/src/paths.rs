//! Storage path resolution
//!
//! The pool file lives either inside the current project
//! (`<project-root>/.opencode/openai-codex-accounts.json`) or under the
//! user's home directory when no project context is set. Resolved paths are
//! confined to home, the working directory, or the temp directory; anything
//! else is refused before a byte is written.

use std::path::{Path, PathBuf};

use common::{StorageCode, StorageError};

/// File name of the durable pool.
pub const STORAGE_FILE_NAME: &str = "openai-codex-accounts.json";

/// Directory the plugin owns inside a project or the home directory.
pub const PLUGIN_DIR_NAME: &str = ".opencode";

/// Markers that identify a project root, nearest ancestor wins.
const PROJECT_MARKERS: &[&str] = &[
    ".git",
    "package.json",
    "Cargo.toml",
    "go.mod",
    "pyproject.toml",
    ".opencode",
];

/// Find the nearest ancestor of `start` (inclusive) containing a project
/// marker.
pub fn find_project_root(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start);
    while let Some(current) = dir {
        for marker in PROJECT_MARKERS {
            if current.join(marker).exists() {
                return Some(current.to_path_buf());
            }
        }
        dir = current.parent();
    }
    None
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(raw: &str) -> PathBuf {
    if raw == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"));
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}

/// Resolve the storage path for an optional project context.
///
/// With a project context the pool is project-local; otherwise it lives
/// under the home directory. The resolved path is checked against the
/// allowed roots.
pub fn resolve_storage_path(project_dir: Option<&Path>) -> Result<PathBuf, StorageError> {
    let path = match project_dir.and_then(find_project_root) {
        Some(root) => root.join(PLUGIN_DIR_NAME).join(STORAGE_FILE_NAME),
        None => {
            let home = dirs::home_dir().ok_or_else(|| {
                StorageError::new(
                    StorageCode::Unknown,
                    STORAGE_FILE_NAME,
                    "cannot resolve home directory",
                )
            })?;
            home.join(PLUGIN_DIR_NAME).join(STORAGE_FILE_NAME)
        }
    };
    ensure_allowed(&path)?;
    Ok(path)
}

/// Refuse paths outside home, the working directory, and the temp
/// directory.
pub fn ensure_allowed(path: &Path) -> Result<(), StorageError> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut roots: Vec<PathBuf> = Vec::new();
    if let Some(home) = dirs::home_dir() {
        roots.push(home);
    }
    if let Ok(cwd) = std::env::current_dir() {
        roots.push(cwd);
    }
    roots.push(std::env::temp_dir());

    if roots.iter().any(|root| absolute.starts_with(root)) {
        Ok(())
    } else {
        Err(StorageError::new(
            StorageCode::Eacces,
            absolute,
            "access denied: path is outside home, working directory, and temp",
        ))
    }
}

/// Candidate locations of stray pool files from other installs, consulted
/// only when the user asks to recover accounts. Reads `APPDATA` (Windows)
/// and `XDG_DATA_HOME`, plus the default global location.
pub fn discover_recovery_paths() -> Vec<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(appdata) = std::env::var_os("APPDATA") {
        candidates.push(
            PathBuf::from(appdata)
                .join("opencode")
                .join(STORAGE_FILE_NAME),
        );
    }
    if let Some(xdg) = std::env::var_os("XDG_DATA_HOME") {
        candidates.push(PathBuf::from(xdg).join("opencode").join(STORAGE_FILE_NAME));
    }
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(PLUGIN_DIR_NAME).join(STORAGE_FILE_NAME));
    }
    candidates.retain(|path| path.is_file());
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_root_found_by_marker() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("repo");
        let nested = root.join("src").join("deep");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(root.join("Cargo.toml"), "[package]").unwrap();

        assert_eq!(find_project_root(&nested), Some(root.clone()));
        assert_eq!(find_project_root(&root), Some(root));
    }

    #[test]
    fn nearest_ancestor_wins() {
        let dir = tempfile::tempdir().unwrap();
        let outer = dir.path().join("outer");
        let inner = outer.join("inner");
        std::fs::create_dir_all(&inner).unwrap();
        std::fs::create_dir_all(outer.join(".git")).unwrap();
        std::fs::write(inner.join("go.mod"), "module inner").unwrap();

        assert_eq!(find_project_root(&inner), Some(inner));
    }

    #[test]
    fn tilde_expansion() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_tilde("~"), home);
        assert_eq!(expand_tilde("~/x/y.json"), home.join("x/y.json"));
        assert_eq!(expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
        assert_eq!(expand_tilde("rel/path"), PathBuf::from("rel/path"));
    }

    #[test]
    fn temp_paths_are_allowed() {
        let path = std::env::temp_dir().join("codex-test").join("accounts.json");
        assert!(ensure_allowed(&path).is_ok());
    }

    #[test]
    fn root_path_is_refused() {
        let err = ensure_allowed(Path::new("/definitely-not-allowed/accounts.json")).unwrap_err();
        assert_eq!(err.code, StorageCode::Eacces);
        assert!(err.message.contains("access denied"));
    }

    #[test]
    fn project_local_storage_path() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("proj");
        std::fs::create_dir_all(root.join(".git")).unwrap();

        let path = resolve_storage_path(Some(&root)).unwrap();
        assert_eq!(path, root.join(".opencode").join(STORAGE_FILE_NAME));
    }

    #[test]
    fn global_storage_path_is_under_home() {
        let path = resolve_storage_path(None).unwrap();
        assert!(path.starts_with(dirs::home_dir().unwrap()));
        assert!(path.ends_with(Path::new(".opencode").join(STORAGE_FILE_NAME)));
    }
}
