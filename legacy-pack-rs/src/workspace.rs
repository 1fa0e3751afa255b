//! Temporary build workspace.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::{BuildError, BuildResult};

pub const WORKSPACE_PREFIX: &str = ".legacy-pack-build-";

/// Scratch directory for intermediate bundles, adapters and tool configs.
///
/// The directory is created inside the project so that tools resolving
/// `node_modules` from their working directory still find the project's
/// packages. It is removed when the workspace is dropped, on success and
/// failure alike.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn create_in(root: &Path) -> BuildResult<Self> {
        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(root)
            .map_err(|err| BuildError::io(root, err))?;
        log::debug!("Created workspace {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn write(&self, name: &str, content: &str) -> BuildResult<PathBuf> {
        let path = self.join(name);
        fs::write(&path, content).map_err(|err| BuildError::io(&path, err))?;
        Ok(path)
    }

    /// Removes the workspace, reporting removal errors instead of ignoring them.
    pub fn close(self) -> BuildResult<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close().map_err(|err| BuildError::io(path, err))
    }
}
