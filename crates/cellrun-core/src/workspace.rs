//! Session workspace management.
//!
//! Every transient artifact of a run (the composed source file, a compiled
//! binary, figures written by a plotting epilogue) lives under one directory
//! per session:
//!
//! ```text
//! <root>/
//! ├── cell_<run-id>.py      # per-run source, removed when the run ends
//! ├── cell_<run-id>         # per-run binary (compiled languages), removed
//! └── plot_<run-id>_0.png   # figures, kept for the cell to reference
//! ```
//!
//! Per-run names embed a fresh run identifier so that cells executing
//! concurrently never collide.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use uuid::Uuid;

use crate::error::Result;

/// The session-scoped directory rooting all execution artifacts.
///
/// The directory is created lazily by [`Workspace::ensure`] and persists for
/// the life of the session.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    ready: AtomicBool,
}

impl Workspace {
    /// Create a workspace handle for `root` without touching the filesystem.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ready: AtomicBool::new(false),
        }
    }

    /// Create a workspace under the system temp dir, unique to this session.
    pub fn for_session() -> Self {
        let root = std::env::temp_dir()
            .join("cellrun")
            .join(Uuid::new_v4().simple().to_string());
        Self::new(root)
    }

    /// The workspace root (may not exist yet).
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Make sure the directory exists and return its path.
    ///
    /// # Errors
    /// Returns an error if directory creation fails.
    pub fn ensure(&self) -> Result<&Path> {
        if !self.ready.load(Ordering::Acquire) || !self.root.is_dir() {
            fs::create_dir_all(&self.root)?;
            self.ready.store(true, Ordering::Release);
            tracing::debug!("Workspace ready at {}", self.root.display());
        }
        Ok(&self.root)
    }

    /// Reserve a per-run artifact path. The file is removed when the guard
    /// is dropped.
    pub fn artifact(&self, run_id: Uuid, suffix: &str) -> ArtifactGuard {
        let mut name = format!("cell_{}", run_id.simple());
        if !suffix.is_empty() {
            name.push('.');
            name.push_str(suffix);
        }
        ArtifactGuard::new(self.root.join(name))
    }

    /// Reserve the path of a compiled binary for a run.
    pub fn binary(&self, run_id: Uuid) -> ArtifactGuard {
        let name = format!("cell_{}{}", run_id.simple(), std::env::consts::EXE_SUFFIX);
        ArtifactGuard::new(self.root.join(name))
    }
}

/// Owns a per-run file path and deletes the file on drop.
///
/// Dropping happens on every exit path of a run: normal completion, runtime
/// failure, compile failure, cancellation, or the owning task being torn
/// down.
#[derive(Debug)]
pub struct ArtifactGuard {
    path: PathBuf,
}

impl ArtifactGuard {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Path of the artifact.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the artifact contents.
    pub async fn write(&self, contents: &str) -> Result<()> {
        tokio::fs::write(&self.path, contents).await?;
        Ok(())
    }
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!("Removed {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove {}: {}", self.path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lazy_creation() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let root = temp.path().join("session");
        let workspace = Workspace::new(&root);

        assert!(!root.exists());
        let ensured = workspace.ensure().expect("Failed to create workspace");
        assert_eq!(ensured, root.as_path());
        assert!(root.is_dir());
    }

    #[test]
    fn test_artifact_removed_on_drop() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let workspace = Workspace::new(temp.path());
        workspace.ensure().unwrap();

        let path = {
            let guard = workspace.artifact(Uuid::new_v4(), "py");
            fs::write(guard.path(), "print(1)").unwrap();
            assert!(guard.path().exists());
            guard.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_artifact_names_are_unique() {
        let workspace = Workspace::new("/tmp/ws");
        let a = workspace.artifact(Uuid::new_v4(), "c");
        let b = workspace.artifact(Uuid::new_v4(), "c");
        assert_ne!(a.path(), b.path());
        assert_eq!(a.path().extension().unwrap(), "c");
    }

    #[test]
    fn test_ensure_recreates_removed_root() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let workspace = Workspace::new(temp.path().join("ws"));
        let root = workspace.ensure().unwrap().to_path_buf();

        fs::remove_dir_all(&root).unwrap();
        workspace.ensure().unwrap();
        assert!(root.is_dir());
    }
}
