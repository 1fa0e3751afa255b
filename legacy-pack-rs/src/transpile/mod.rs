//! Lowering bundles to the legacy profile.
//!
//! - `babel`: the Babel CLI backend, in file or chunk mode
//! - `polyfill`: extraction of the polyfill imports Babel inserts
//! - `audit`: a syntax check of transpiled code against the profile

pub mod audit;
mod babel;
pub mod polyfill;

use std::path::Path;

pub use audit::LegacyAudit;
pub use babel::BabelTranspiler;
pub use polyfill::{PolyfillUsage, PreludeSet};

use crate::artifact::Artifact;
use crate::error::BuildResult;

pub trait Transpiler {
    /// Transpiles the file at `input` into `output`.
    ///
    /// With `source_maps` the returned artifact carries the map Babel produced.
    fn transpile_file(&self, input: &Path, output: &Path, source_maps: bool)
        -> BuildResult<Artifact>;

    /// Transpiles in-memory code. The chunk's name is used as the file name.
    fn transpile_chunk(&self, chunk: &Artifact) -> BuildResult<Artifact>;
}
