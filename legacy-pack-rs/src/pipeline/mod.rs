//! Build orchestration.
//!
//! Both build variants are one [`Pipeline`] with different backends:
//!
//! | Variant | Bundler | Transpile | Inject | Minifier | Processor file |
//! |---|---|---|---|---|---|
//! | `Split` | esbuild | Babel, file mode | after transpile | esbuild | written |
//! | `Integrated` | SWC | Babel, chunk mode | before transpile | SWC, names mangled | inlined only |
//!
//! The processor is always built first; its finished script is the payload
//! injected into the main entry.

pub mod plugins;

use std::fmt;
use std::path::PathBuf;

use crate::adapter::{self, EntryAdapter};
use crate::artifact::{Artifact, OutputSet, WrittenArtifact};
use crate::bundler::{BundleRequest, Bundler, EsbuildBundler, SwcBundler};
use crate::config::{BuildConfig, TsConfig};
use crate::error::{BuildError, Stage, StageFailure};
use crate::inject::{PlaceholderForm, WorkletInjector};
use crate::minify::{EsbuildMinifier, Minifier, SwcMinifier};
use crate::process::ToolCommand;
use crate::transpile::{BabelTranspiler, LegacyAudit, PreludeSet};
use crate::workspace::Workspace;

use plugins::{
    AuditPlugin, ChunkContext, ChunkPlugin, InjectPlugin, MinifyPlugin, PreludePlugin,
    TranspileMode, TranspilePlugin,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// esbuild and Babel sub-processes, injection after transpile.
    Split,
    /// In-process bundling and minification, injection before transpile.
    Integrated,
}

impl Variant {
    pub fn source_maps(self) -> bool {
        matches!(self, Variant::Split)
    }

    pub fn standalone_processor(self) -> bool {
        matches!(self, Variant::Split)
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Split => f.write_str("split"),
            Variant::Integrated => f.write_str("integrated"),
        }
    }
}

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub variant: Variant,
    pub out_dir: PathBuf,
    pub artifacts: Vec<WrittenArtifact>,
    /// Size of the processor script embedded into the main artifact.
    pub payload_bytes: usize,
    pub placeholder_form: Option<PlaceholderForm>,
}

impl fmt::Display for BuildReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Build successful! Compatible files are in: {}",
            self.out_dir.display()
        )?;
        for artifact in &self.artifacts {
            writeln!(f, "{artifact}")?;
        }
        write!(f, "   worklet processor inlined ({} bytes)", self.payload_bytes)
    }
}

/// Backends and plugins for one run.
struct Stages {
    bundler: Box<dyn Bundler>,
    plugins: Vec<Box<dyn ChunkPlugin>>,
}

pub struct Pipeline {
    variant: Variant,
    config: BuildConfig,
}

impl Pipeline {
    pub fn new(variant: Variant, config: BuildConfig) -> Self {
        Self { variant, config }
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn run(&self) -> Result<BuildReport, StageFailure> {
        let config = &self.config;
        log::info!(
            "Building for {} ({} pipeline) in {}",
            config.profile,
            self.variant,
            config.root.display()
        );

        let preludes = PreludeSet::load(config).map_err(|err| err.at(Stage::Polyfill, "preludes"))?;
        let tsconfig = match config.tsconfig_path() {
            Some(path) => TsConfig::load(&path).map_err(|err| err.at(Stage::Config, "tsconfig"))?,
            None => TsConfig::default(),
        };

        let workspace = Workspace::create_in(&config.root)
            .map_err(|err| err.at(Stage::Workspace, "workspace"))?;
        let (main, processor) = adapter::materialize(config, &workspace)
            .map_err(|err| err.at(Stage::Adapter, config.main.output.as_str()))?;
        let stages = self.stages(&workspace, tsconfig, preludes)?;

        log::info!("[1/2] Building worklet processor {}", processor.output);
        let (payload, _) = self.build_entry(&processor, &stages, &workspace, None)?;

        log::info!("[2/2] Building main library {}", main.output);
        let (library, placeholder_form) =
            self.build_entry(&main, &stages, &workspace, Some(&payload))?;

        let out_dir = config.out_dir();
        let finalize = |err: BuildError| err.at(Stage::Finalize, out_dir.display().to_string());
        let mut outputs = OutputSet::new(&out_dir).map_err(finalize)?;
        if config
            .standalone_processor
            .unwrap_or(self.variant.standalone_processor())
        {
            outputs.stage(&payload).map_err(finalize)?;
        }
        outputs.stage(&library).map_err(finalize)?;
        let artifacts = outputs.commit().map_err(finalize)?;

        workspace.close().map_err(finalize)?;

        Ok(BuildReport {
            variant: self.variant,
            out_dir,
            artifacts,
            payload_bytes: payload.code.len(),
            placeholder_form,
        })
    }

    fn stages(
        &self,
        workspace: &Workspace,
        tsconfig: TsConfig,
        preludes: PreludeSet,
    ) -> Result<Stages, StageFailure> {
        let config = &self.config;
        let source_maps = config.source_maps.unwrap_or(self.variant.source_maps());
        let esbuild = ToolCommand::from_parts(&config.tools.esbuild, "esbuild");
        let babel = ToolCommand::from_parts(&config.tools.babel, "babel");

        let transpiler = BabelTranspiler::prepare(
            babel,
            &config.profile,
            config.tools.babel_config.as_ref().map(|path| config.resolve(path)),
            workspace,
        )
        .map_err(|err| err.at(Stage::Config, "babel"))?;
        let injector = WorkletInjector::new(&config.placeholder)
            .map_err(|err| BuildError::from(err).at(Stage::Config, "placeholder"))?;

        let inject: Box<dyn ChunkPlugin> =
            Box::new(InjectPlugin::new(injector, config.diagnostics_dir()));
        let audit: Box<dyn ChunkPlugin> =
            Box::new(AuditPlugin::new(LegacyAudit::new(config.profile)));
        let prelude: Box<dyn ChunkPlugin> = Box::new(PreludePlugin::new(preludes));

        let stages = match self.variant {
            Variant::Split => {
                let minifier: Box<dyn Minifier> = Box::new(EsbuildMinifier::new(
                    esbuild.clone(),
                    &config.profile,
                    workspace.path().to_path_buf(),
                ));
                Stages {
                    bundler: Box::new(EsbuildBundler::new(esbuild, config.tsconfig_path())),
                    plugins: vec![
                        Box::new(TranspilePlugin::new(
                            Box::new(transpiler),
                            TranspileMode::File { source_maps },
                        )),
                        inject,
                        audit,
                        Box::new(MinifyPlugin::new(minifier)),
                        prelude,
                    ],
                }
            }
            Variant::Integrated => {
                // Chunk mode cannot return a map; fall back to files when one is wanted
                let mode = if source_maps {
                    TranspileMode::File { source_maps }
                } else {
                    TranspileMode::Chunk
                };
                Stages {
                    bundler: Box::new(SwcBundler::new(config.root.clone(), tsconfig)),
                    plugins: vec![
                        inject,
                        Box::new(TranspilePlugin::new(Box::new(transpiler), mode)),
                        audit,
                        Box::new(MinifyPlugin::new(Box::new(SwcMinifier::default()))),
                        prelude,
                    ],
                }
            }
        };
        log::debug!(
            "Stages: {} -> {}",
            stages.bundler.name(),
            stages
                .plugins
                .iter()
                .map(|plugin| plugin.name())
                .collect::<Vec<_>>()
                .join(" -> ")
        );
        Ok(stages)
    }

    /// Bundles one entry and runs its chunk through every plugin.
    fn build_entry(
        &self,
        entry: &EntryAdapter,
        stages: &Stages,
        workspace: &Workspace,
        payload: Option<&Artifact>,
    ) -> Result<(Artifact, Option<PlaceholderForm>), StageFailure> {
        let target = entry.output.as_str();

        log::info!("Bundling {} with {}", entry.path.display(), stages.bundler.name());
        let mut chunk = stages
            .bundler
            .bundle(&BundleRequest::for_adapter(entry), workspace)
            .map_err(|err| err.at(Stage::Bundle, target))?;
        log::debug!("Bundled {} ({} bytes)", target, chunk.code.len());

        let mut ctx = ChunkContext::new(entry.role, workspace, payload);
        for plugin in &stages.plugins {
            log::debug!("Running {} on {}", plugin.name(), target);
            chunk = plugin
                .render_chunk(chunk, &mut ctx)
                .map_err(|err| err.at(plugin.stage(), target))?;
        }
        for plugin in &stages.plugins {
            plugin
                .finish_chunk(&chunk, &ctx)
                .map_err(|err| err.at(plugin.stage(), target))?;
        }

        log::info!("Built {} ({} bytes)", target, chunk.code.len());
        Ok((chunk, ctx.injection.map(|injection| injection.form)))
    }
}
