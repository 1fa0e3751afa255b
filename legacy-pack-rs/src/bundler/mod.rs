//! JavaScript bundling for legacy-pack.
//!
//! A bundler turns one entry adapter into one flat script containing every
//! reachable module, with dead code removed and whitespace minified.
//!
//! # Backends
//!
//! - `SwcBundler` (`swc`): in-process. Builds a module graph with deno_graph
//!   from the project files (`loader`), strips TypeScript with deno_ast and
//!   flattens the graph with the SWC bundler.
//! - `EsbuildBundler` (`esbuild`): runs the esbuild CLI in the workspace.
//!
//! Neither backend mangles identifiers, so the placeholder function keeps
//! its name until it has been injected.

mod bundle_hook;
mod esbuild;
mod loader;
mod swc;
mod text;

use std::path::PathBuf;

pub use esbuild::EsbuildBundler;
pub use loader::{FsLoader, ProjectResolver};
pub use swc::SwcBundler;

use crate::adapter::EntryAdapter;
use crate::artifact::Artifact;
use crate::error::BuildResult;
use crate::workspace::Workspace;

/// Output module format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleFormat {
    /// Immediately invoked function expression; the only format the legacy engine loads.
    Iife,
    /// ES module output.
    Esm,
}

impl From<BundleFormat> for deno_ast::swc::bundler::ModuleType {
    fn from(format: BundleFormat) -> Self {
        match format {
            BundleFormat::Iife => deno_ast::swc::bundler::ModuleType::Iife,
            BundleFormat::Esm => deno_ast::swc::bundler::ModuleType::Es,
        }
    }
}

/// What to bundle.
#[derive(Debug, Clone)]
pub struct BundleRequest {
    pub entry: PathBuf,
    pub format: BundleFormat,
    /// Global variable that receives the entry's exports.
    pub global_name: Option<String>,
    /// File name of the resulting artifact.
    pub output: String,
}

impl BundleRequest {
    pub fn for_adapter(adapter: &EntryAdapter) -> Self {
        Self {
            entry: adapter.path.clone(),
            format: BundleFormat::Iife,
            global_name: adapter.global_name.clone(),
            output: adapter.output.clone(),
        }
    }
}

pub trait Bundler {
    fn name(&self) -> &'static str;

    fn bundle(&self, request: &BundleRequest, workspace: &Workspace) -> BuildResult<Artifact>;
}
