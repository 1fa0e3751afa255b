//! Chunk plugins.
//!
//! After bundling, each entry's chunk passes through an ordered list of
//! plugins. A plugin transforms the chunk in `render_chunk` and may check
//! the finished artifact in `finish_chunk`.

use std::fs;
use std::path::PathBuf;

use crate::adapter::EntryRole;
use crate::artifact::Artifact;
use crate::error::{BuildError, BuildResult, Stage};
use crate::inject::{InjectError, Injection, WorkletInjector};
use crate::minify::Minifier;
use crate::sourcemap::Edit;
use crate::transpile::polyfill::polyfill_import_edits;
use crate::transpile::{LegacyAudit, PolyfillUsage, PreludeSet, Transpiler};
use crate::workspace::Workspace;

/// Per-entry state shared by the plugins.
pub struct ChunkContext<'a> {
    pub role: EntryRole,
    pub workspace: &'a Workspace,
    /// The finished processor script, when building the main entry.
    pub payload: Option<&'a Artifact>,
    /// Polyfills the transpiler reported for this entry.
    pub usage: PolyfillUsage,
    pub injection: Option<Injection>,
}

impl<'a> ChunkContext<'a> {
    pub fn new(role: EntryRole, workspace: &'a Workspace, payload: Option<&'a Artifact>) -> Self {
        Self {
            role,
            workspace,
            payload,
            usage: PolyfillUsage::default(),
            injection: None,
        }
    }
}

pub trait ChunkPlugin {
    fn name(&self) -> &'static str;

    /// Stage reported when this plugin fails.
    fn stage(&self) -> Stage;

    fn render_chunk(&self, chunk: Artifact, ctx: &mut ChunkContext<'_>) -> BuildResult<Artifact>;

    fn finish_chunk(&self, _chunk: &Artifact, _ctx: &ChunkContext<'_>) -> BuildResult<()> {
        Ok(())
    }
}

/// How the transpiler receives the chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranspileMode {
    /// Through files in the workspace, optionally producing a source map.
    File { source_maps: bool },
    /// Through stdin and stdout.
    Chunk,
}

pub struct TranspilePlugin {
    transpiler: Box<dyn Transpiler>,
    mode: TranspileMode,
}

impl TranspilePlugin {
    pub fn new(transpiler: Box<dyn Transpiler>, mode: TranspileMode) -> Self {
        Self { transpiler, mode }
    }
}

impl ChunkPlugin for TranspilePlugin {
    fn name(&self) -> &'static str {
        "transpile"
    }

    fn stage(&self) -> Stage {
        Stage::Transpile
    }

    fn render_chunk(&self, chunk: Artifact, ctx: &mut ChunkContext<'_>) -> BuildResult<Artifact> {
        let transpiled = match self.mode {
            TranspileMode::File { source_maps } => {
                let input = match &chunk.path {
                    Some(path) => path.clone(),
                    None => ctx
                        .workspace
                        .write(&format!("bundle_{}", chunk.name), &chunk.code)?,
                };
                let output = ctx.workspace.join(&format!("babel_{}", chunk.name));
                let mut artifact = self.transpiler.transpile_file(&input, &output, source_maps)?;
                artifact.name = chunk.name.clone();
                artifact
            }
            TranspileMode::Chunk => self.transpiler.transpile_chunk(&chunk)?,
        };

        let (usage, edits) = polyfill_import_edits(&transpiled.code);
        if !usage.is_empty() {
            log::debug!(
                "{} requires {} polyfill modules from {}",
                chunk.name,
                usage.len(),
                usage.packages().collect::<Vec<_>>().join(", ")
            );
        }
        ctx.usage = usage;
        Ok(transpiled.edit(&edits))
    }
}

/// Embeds the processor payload into the main chunk.
pub struct InjectPlugin {
    injector: WorkletInjector,
    diagnostics_dir: PathBuf,
}

impl InjectPlugin {
    pub fn new(injector: WorkletInjector, diagnostics_dir: PathBuf) -> Self {
        Self {
            injector,
            diagnostics_dir,
        }
    }

    /// Saves an unmatched target for inspection.
    fn dump(&self, chunk: &Artifact) -> Option<PathBuf> {
        let path = self.diagnostics_dir.join(format!("debug_{}", chunk.name));
        let written = fs::create_dir_all(&self.diagnostics_dir)
            .and_then(|_| fs::write(&path, &chunk.code));
        match written {
            Ok(()) => {
                log::warn!(
                    "Placeholder `{}` not found; saved {} for inspection",
                    self.injector.placeholder().name,
                    path.display()
                );
                Some(path)
            }
            Err(err) => {
                log::warn!("Could not save {}: {}", path.display(), err);
                None
            }
        }
    }
}

impl ChunkPlugin for InjectPlugin {
    fn name(&self) -> &'static str {
        "inject-worklet"
    }

    fn stage(&self) -> Stage {
        Stage::Inject
    }

    fn render_chunk(&self, chunk: Artifact, ctx: &mut ChunkContext<'_>) -> BuildResult<Artifact> {
        let (EntryRole::Main, Some(payload)) = (ctx.role, ctx.payload) else {
            return Ok(chunk);
        };

        match self.injector.inject(&chunk.code, payload.code.as_bytes()) {
            Ok(injection) => {
                let edit = Edit {
                    range: injection.replaced.clone(),
                    text: injection.replacement.clone(),
                };
                ctx.injection = Some(injection);
                Ok(chunk.edit(&[edit]))
            }
            Err(err @ InjectError::NoMatch { .. }) => {
                let err = match self.dump(&chunk) {
                    Some(path) => err.with_dump(path),
                    None => err,
                };
                Err(BuildError::Inject(err))
            }
            Err(err) => Err(BuildError::Inject(err)),
        }
    }

    fn finish_chunk(&self, chunk: &Artifact, ctx: &ChunkContext<'_>) -> BuildResult<()> {
        match &ctx.injection {
            Some(injection) => Ok(self.injector.verify(&chunk.code, injection, &chunk.name)?),
            None => Ok(()),
        }
    }
}

pub struct AuditPlugin {
    audit: LegacyAudit,
}

impl AuditPlugin {
    pub fn new(audit: LegacyAudit) -> Self {
        Self { audit }
    }
}

impl ChunkPlugin for AuditPlugin {
    fn name(&self) -> &'static str {
        "legacy-audit"
    }

    fn stage(&self) -> Stage {
        Stage::Audit
    }

    fn render_chunk(&self, chunk: Artifact, _ctx: &mut ChunkContext<'_>) -> BuildResult<Artifact> {
        self.audit.check(&chunk)?;
        Ok(chunk)
    }
}

pub struct MinifyPlugin {
    minifier: Box<dyn Minifier>,
}

impl MinifyPlugin {
    pub fn new(minifier: Box<dyn Minifier>) -> Self {
        Self { minifier }
    }
}

impl ChunkPlugin for MinifyPlugin {
    fn name(&self) -> &'static str {
        "minify"
    }

    fn stage(&self) -> Stage {
        Stage::Minify
    }

    fn render_chunk(&self, chunk: Artifact, _ctx: &mut ChunkContext<'_>) -> BuildResult<Artifact> {
        let before = chunk.code.len();
        let minified = self.minifier.minify(&chunk)?;
        log::debug!(
            "{} minified {}: {} -> {} bytes",
            self.minifier.name(),
            chunk.name,
            before,
            minified.code.len()
        );
        Ok(minified)
    }
}

/// Prepends the polyfill preludes the entry needs.
pub struct PreludePlugin {
    preludes: PreludeSet,
}

impl PreludePlugin {
    pub fn new(preludes: PreludeSet) -> Self {
        Self { preludes }
    }
}

impl ChunkPlugin for PreludePlugin {
    fn name(&self) -> &'static str {
        "polyfill-prelude"
    }

    fn stage(&self) -> Stage {
        Stage::Polyfill
    }

    fn render_chunk(&self, chunk: Artifact, ctx: &mut ChunkContext<'_>) -> BuildResult<Artifact> {
        if ctx.usage.is_empty() {
            return Ok(chunk);
        }
        let prelude = self.preludes.render(&ctx.usage)?;
        Ok(chunk.edit(&[Edit::insert(0, prelude)]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inject::Placeholder;

    const MAIN_CHUNK: &str = "var SpessaSynthLib=function(){function createWorkletBlobURL(){throw new Error(\"not injected\")}return{createWorkletBlobURL:createWorkletBlobURL}}();";

    fn inject_plugin(diagnostics_dir: PathBuf) -> InjectPlugin {
        InjectPlugin::new(
            WorkletInjector::new(&Placeholder::default()).unwrap(),
            diagnostics_dir,
        )
    }

    #[test]
    fn test_inject_skips_processor_entry() {
        let root = tempfile::tempdir().unwrap();
        let workspace = Workspace::create_in(root.path()).unwrap();
        let plugin = inject_plugin(root.path().join("debug"));
        let mut ctx = ChunkContext::new(EntryRole::Processor, &workspace, None);

        let chunk = Artifact::new("spessasynth_processor.js", "registerProcessor(\"p\", P);");
        let out = plugin.render_chunk(chunk.clone(), &mut ctx).unwrap();
        assert_eq!(out, chunk);
        assert!(ctx.injection.is_none());
    }

    #[test]
    fn test_inject_then_verify() {
        let root = tempfile::tempdir().unwrap();
        let workspace = Workspace::create_in(root.path()).unwrap();
        let plugin = inject_plugin(root.path().join("debug"));
        let payload = Artifact::new("spessasynth_processor.js", "registerProcessor(\"p\", P);");
        let mut ctx = ChunkContext::new(EntryRole::Main, &workspace, Some(&payload));

        let out = plugin
            .render_chunk(Artifact::new("spessasynth_lib.js", MAIN_CHUNK), &mut ctx)
            .unwrap();
        assert!(ctx.injection.is_some());
        plugin.finish_chunk(&out, &ctx).unwrap();

        // A later stage that drops the payload is caught
        let broken = Artifact::new("spessasynth_lib.js", "var SpessaSynthLib={};");
        assert!(matches!(
            plugin.finish_chunk(&broken, &ctx),
            Err(BuildError::Inject(InjectError::PayloadLost { .. }))
        ));
    }

    #[test]
    fn test_no_match_dumps_target() {
        let root = tempfile::tempdir().unwrap();
        let workspace = Workspace::create_in(root.path()).unwrap();
        let diagnostics_dir = root.path().join("debug");
        let plugin = inject_plugin(diagnostics_dir.clone());
        let payload = Artifact::new("spessasynth_processor.js", "registerProcessor(\"p\", P);");
        let mut ctx = ChunkContext::new(EntryRole::Main, &workspace, Some(&payload));

        let target = "var SpessaSynthLib=function(){function renamedStub(){throw new Error(\"x\")}}();";
        let err = plugin
            .render_chunk(Artifact::new("spessasynth_lib.js", target), &mut ctx)
            .unwrap_err();

        let dump = diagnostics_dir.join("debug_spessasynth_lib.js");
        assert!(matches!(
            err,
            BuildError::Inject(InjectError::NoMatch { dump: Some(ref path), .. }) if *path == dump
        ));
        assert_eq!(fs::read_to_string(dump).unwrap(), target);
    }

    #[test]
    fn test_prelude_skipped_without_usage() {
        let root = tempfile::tempdir().unwrap();
        let workspace = Workspace::create_in(root.path()).unwrap();
        let plugin = PreludePlugin::new(PreludeSet::default());
        let mut ctx = ChunkContext::new(EntryRole::Main, &workspace, None);
        let chunk = Artifact::new("spessasynth_lib.js", "var a=1;");
        assert_eq!(plugin.render_chunk(chunk.clone(), &mut ctx).unwrap(), chunk);
    }
}
