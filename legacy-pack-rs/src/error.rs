//! Error types for legacy-pack.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::inject::InjectError;

/// Result type alias using BuildError.
pub type BuildResult<T> = Result<T, BuildError>;

/// Errors produced by a single pipeline component.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The configuration file (or tsconfig) exists but could not be used.
    #[error("Invalid configuration {}: {message}", .path.display())]
    Config { path: PathBuf, message: String },

    /// A module could not be found or a specifier could not be resolved.
    #[error("Cannot resolve {path}: {message}")]
    Resolution { path: String, message: String },

    /// The bundler failed after the module graph was resolved.
    #[error("Bundling {entry} failed: {message}")]
    Bundle { entry: String, message: String },

    /// A chunk could not be parsed as JavaScript.
    #[error("Syntax error in {name}: {message}")]
    Parse { name: String, message: String },

    /// Transpiled code still contains a construct the legacy profile cannot run.
    #[error("{construct} is not supported by {profile} ({location})")]
    UnsupportedSyntax {
        construct: String,
        profile: String,
        location: String,
    },

    /// Babel inserted a polyfill import that no configured prelude provides.
    #[error("No polyfill prelude is configured for package `{package}` (required by `{module}`)")]
    MissingPolyfill { package: String, module: String },

    /// An external tool could not be started.
    #[error("Failed to launch `{program}`: {source}")]
    ToolLaunch {
        program: String,
        #[source]
        source: io::Error,
    },

    /// An external tool exited unsuccessfully. `output` is the tool's own output, verbatim.
    #[error("`{program}` exited with {status}\n{output}")]
    Tool {
        program: String,
        status: String,
        output: String,
    },

    #[error(transparent)]
    Inject(#[from] InjectError),

    /// Output files were only partly replaced. `replaced` already hold the new build.
    #[error(
        "Could not replace {}: {source} (already replaced: {})",
        .path.display(),
        display_paths(.replaced)
    )]
    PartialCommit {
        replaced: Vec<PathBuf>,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl BuildError {
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        BuildError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Attaches the failing stage and target artifact.
    pub fn at(self, stage: Stage, target: impl Into<String>) -> StageFailure {
        StageFailure {
            stage,
            target: target.into(),
            source: self,
        }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Pipeline stage names, as reported in failure summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Config,
    Polyfill,
    Workspace,
    Adapter,
    Bundle,
    Transpile,
    Audit,
    Inject,
    Minify,
    Finalize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Config => "config",
            Stage::Polyfill => "polyfill",
            Stage::Workspace => "workspace",
            Stage::Adapter => "adapter",
            Stage::Bundle => "bundle",
            Stage::Transpile => "transpile",
            Stage::Audit => "audit",
            Stage::Inject => "inject",
            Stage::Minify => "minify",
            Stage::Finalize => "finalize",
        };
        f.write_str(name)
    }
}

/// A component error together with where in the pipeline it happened.
#[derive(Debug, Error)]
#[error("Build failed at stage {stage} ({target}): {source}")]
pub struct StageFailure {
    pub stage: Stage,
    pub target: String,
    #[source]
    pub source: BuildError,
}
