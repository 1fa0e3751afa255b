//! Build artifacts and atomic output.

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::{BuildError, BuildResult};
use crate::sourcemap::{apply_edits, remap, Edit};

/// A piece of generated JavaScript moving through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// File name of the final artifact this chunk turns into.
    pub name: String,
    pub code: String,
    /// Source map describing `code`. Stages that change the code either move
    /// it along or drop it.
    pub map: Option<String>,
    /// Where this exact content is stored on disk, if anywhere.
    pub path: Option<PathBuf>,
}

impl Artifact {
    pub fn new(name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
            map: None,
            path: None,
        }
    }

    /// Replaces the code wholesale. Neither the on-disk copy nor the map
    /// matches the new code, so both are dropped.
    pub fn with_code(self, code: String) -> Self {
        Self {
            code,
            map: None,
            path: None,
            ..self
        }
    }

    /// Splices `edits` into the code and moves the source map with them.
    pub fn edit(self, edits: &[Edit]) -> Self {
        if edits.is_empty() {
            return self;
        }
        let code = apply_edits(&self.code, edits);
        let map = self
            .map
            .as_deref()
            .and_then(|map| match remap(map, &self.code, edits) {
                Ok(map) => Some(map),
                Err(err) => {
                    log::warn!("Dropping source map of {}: {}", self.name, err);
                    None
                }
            });
        Self {
            name: self.name,
            code,
            map,
            path: None,
        }
    }

    pub fn read(name: impl Into<String>, path: &Path) -> BuildResult<Self> {
        let code = fs::read_to_string(path).map_err(|err| BuildError::io(path, err))?;
        Ok(Self {
            name: name.into(),
            code,
            map: None,
            path: Some(path.to_path_buf()),
        })
    }
}

/// Summary line for one written artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenArtifact {
    pub path: PathBuf,
    pub bytes: usize,
}

impl fmt::Display for WrittenArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        write!(f, "-> {} ({} bytes)", name, self.bytes)
    }
}

/// Final artifacts staged next to their destinations.
///
/// Each file is written to a temporary file in the output directory and only
/// renamed over the destination by [`OutputSet::commit`]. Dropping the set
/// without committing deletes the staged files and leaves existing outputs
/// untouched.
pub struct OutputSet {
    dir: PathBuf,
    staged: Vec<(NamedTempFile, PathBuf, usize)>,
}

impl OutputSet {
    pub fn new(dir: &Path) -> BuildResult<Self> {
        fs::create_dir_all(dir).map_err(|err| BuildError::io(dir, err))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            staged: Vec::new(),
        })
    }

    /// Stages `artifact` (and its source map, if any) under its file name.
    pub fn stage(&mut self, artifact: &Artifact) -> BuildResult<()> {
        let mut code = artifact.code.clone();
        if let Some(map) = &artifact.map {
            let map_name = format!("{}.map", artifact.name);
            if !code.ends_with('\n') {
                code.push('\n');
            }
            code.push_str(&format!("//# sourceMappingURL={map_name}\n"));
            self.stage_file(&map_name, map.as_bytes())?;
        }
        self.stage_file(&artifact.name, code.as_bytes())
    }

    fn stage_file(&mut self, name: &str, content: &[u8]) -> BuildResult<()> {
        let destination = self.dir.join(name);
        let mut file = tempfile::Builder::new()
            .prefix(".legacy-pack-")
            .suffix(".tmp")
            .tempfile_in(&self.dir)
            .map_err(|err| BuildError::io(&self.dir, err))?;
        file.write_all(content)
            .and_then(|_| file.as_file().sync_all())
            .map_err(|err| BuildError::io(file.path(), err))?;
        self.staged.push((file, destination, content.len()));
        Ok(())
    }

    /// Moves every staged file into place.
    ///
    /// Destinations are checked before the first rename. A rename that still
    /// fails part way reports which files were already replaced.
    pub fn commit(self) -> BuildResult<Vec<WrittenArtifact>> {
        for (_, destination, _) in &self.staged {
            if destination.is_dir() {
                return Err(BuildError::io(
                    destination,
                    io::Error::other("destination is a directory"),
                ));
            }
        }

        let mut written: Vec<WrittenArtifact> = Vec::with_capacity(self.staged.len());
        for (file, destination, bytes) in self.staged {
            if let Err(err) = file.persist(&destination) {
                if written.is_empty() {
                    return Err(BuildError::io(&destination, err.error));
                }
                return Err(BuildError::PartialCommit {
                    replaced: written.into_iter().map(|artifact| artifact.path).collect(),
                    path: destination,
                    source: err.error,
                });
            }
            log::debug!("Wrote {}", destination.display());
            written.push(WrittenArtifact {
                path: destination,
                bytes,
            });
        }
        Ok(written)
    }
}
