//! In-process bundling with deno_graph and the SWC bundler.
//!
//! The process is:
//! 1. Build a module graph from the entry adapter with deno_graph
//! 2. Strip TypeScript from each module using deno_ast
//! 3. Bundle the graph into a single output with the SWC bundler
//! 4. Print the bundle with whitespace minified

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use anyhow::{anyhow, bail};
use deno_ast::swc::ast::EsVersion;
use deno_ast::swc::bundler::{
    Bundler as SwcBundlerCore, Config as BundlerConfig, Load, ModuleData, Resolve,
};
use deno_ast::swc::codegen::text_writer::JsWriter;
use deno_ast::swc::codegen::{Config as CodegenConfig, Emitter};
use deno_ast::swc::common::sync::Lrc;
use deno_ast::swc::common::Spanned;
use deno_ast::swc::common::{FileName, Globals, SourceMap, GLOBALS};
use deno_ast::swc::loader::resolve::Resolution;
use deno_ast::swc::parser::lexer::Lexer;
use deno_ast::swc::parser::{EsSyntax, Parser, StringInput, Syntax};
use deno_ast::{
    EmitOptions, MediaType, ParseParams, SourceMapOption, TranspileModuleOptions,
    TranspileOptions,
};
use deno_graph::{GraphKind, Module, ModuleGraph, ModuleSpecifier};

use super::bundle_hook::BundleHook;
use super::loader::{FsLoader, ProjectResolver};
use super::text::{strip_bom, transform_json_source};
use super::{BundleRequest, Bundler};
use crate::artifact::Artifact;
use crate::config::TsConfig;
use crate::error::{BuildError, BuildResult};
use crate::workspace::Workspace;

/// Name of the generated module that publishes the entry's exports on `globalThis`.
const GLOBAL_BOOTSTRAP_FILE: &str = "__legacy_pack_global__.js";

/// Bundles project sources without leaving the process.
#[derive(Debug, Clone)]
pub struct SwcBundler {
    root: PathBuf,
    tsconfig: TsConfig,
}

impl SwcBundler {
    /// `root` is where `node_modules` lookups start.
    pub fn new(root: PathBuf, tsconfig: TsConfig) -> Self {
        Self { root, tsconfig }
    }

    fn build_graph(
        &self,
        root: &ModuleSpecifier,
        loader: &FsLoader,
        entry: &Path,
    ) -> BuildResult<ModuleGraph> {
        let resolver = ProjectResolver::new(&self.root, self.tsconfig.clone());
        let mut graph = ModuleGraph::new(GraphKind::CodeOnly);

        futures::executor::block_on(graph.build(
            vec![root.clone()],
            vec![],
            loader,
            deno_graph::BuildOptions {
                resolver: Some(resolver.as_resolver()),
                ..Default::default()
            },
        ));

        graph.valid().map_err(|err| BuildError::Resolution {
            path: entry.display().to_string(),
            message: err.to_string(),
        })?;

        // Everything must come from the project; nothing may stay an import
        if let Some(external) = graph.modules().find(|m| {
            matches!(m, Module::External(_) | Module::Node(_) | Module::Npm(_))
        }) {
            return Err(BuildError::Resolution {
                path: external.specifier().to_string(),
                message: "external, npm and node modules cannot be bundled".to_string(),
            });
        }

        Ok(graph)
    }
}

impl Bundler for SwcBundler {
    fn name(&self) -> &'static str {
        "swc"
    }

    fn bundle(&self, request: &BundleRequest, workspace: &Workspace) -> BuildResult<Artifact> {
        let entry_error = |message: String| BuildError::Resolution {
            path: request.entry.display().to_string(),
            message,
        };
        let entry = ModuleSpecifier::from_file_path(&request.entry)
            .map_err(|_| entry_error("entry path must be absolute".to_string()))?;

        let mut loader = FsLoader::new();
        let root = match &request.global_name {
            Some(global_name) => {
                let bootstrap =
                    ModuleSpecifier::from_file_path(workspace.join(GLOBAL_BOOTSTRAP_FILE))
                        .map_err(|_| entry_error("workspace path must be absolute".to_string()))?;
                loader =
                    loader.with_module(bootstrap.clone(), global_bootstrap(&entry, global_name));
                bootstrap
            }
            None => entry,
        };

        let graph = self.build_graph(&root, &loader, &request.entry)?;
        log::debug!(
            "Module graph for {} has {} modules",
            request.entry.display(),
            graph.modules().count()
        );

        let code = bundle_graph(&graph, request).map_err(|err| BuildError::Bundle {
            entry: request.entry.display().to_string(),
            message: format!("{err:#}"),
        })?;

        Ok(Artifact::new(request.output.clone(), code))
    }
}

/// Entry module that assigns the real entry's namespace to a global.
fn global_bootstrap(entry: &ModuleSpecifier, global_name: &str) -> String {
    format!(
        "import * as ns from {};\nglobalThis.{} = ns;\n",
        serde_json::Value::String(entry.to_string()),
        global_name
    )
}

/// Bundles a module graph into a single JavaScript file.
fn bundle_graph(graph: &ModuleGraph, request: &BundleRequest) -> Result<String, anyhow::Error> {
    let globals = Globals::new();

    GLOBALS.set(&globals, || {
        let source_map = Lrc::new(SourceMap::default());

        let bundle_loader = SwcBundleLoader {
            graph,
            source_map: source_map.clone(),
        };
        let bundle_resolver = SwcBundleResolver { graph };

        let config = BundlerConfig {
            module: request.format.into(),
            ..Default::default()
        };

        let mut bundler = SwcBundlerCore::new(
            &globals,
            source_map.clone(),
            bundle_loader,
            bundle_resolver,
            config,
            Box::new(BundleHook),
        );

        let mut entries = HashMap::new();
        match graph.roots.first() {
            Some(root) => {
                entries.insert("bundle".to_string(), FileName::Url(root.clone()));
            }
            None => bail!("No root module in graph"),
        }

        let bundles = bundler.bundle(entries)?;
        let Some(bundle) = bundles.first() else {
            bail!("Bundler produced no output");
        };

        let mut buf = Vec::new();
        {
            // Whitespace only; identifiers keep their names
            let cfg = CodegenConfig::default()
                .with_minify(true)
                .with_target(EsVersion::Es2020)
                .with_omit_last_semi(false);

            let mut emitter = Emitter {
                cfg,
                cm: source_map.clone(),
                comments: None,
                wr: Box::new(JsWriter::new(source_map.clone(), "\n", &mut buf, None)),
            };

            emitter.emit_module(&bundle.module)?;
        }

        Ok(String::from_utf8(buf)?)
    })
}

/// SWC bundler Load implementation that serves modules from the graph.
struct SwcBundleLoader<'a> {
    graph: &'a ModuleGraph,
    source_map: Lrc<SourceMap>,
}

impl Load for SwcBundleLoader<'_> {
    fn load(&self, file: &FileName) -> Result<ModuleData, anyhow::Error> {
        let specifier = match file {
            FileName::Url(url) => url,
            _ => bail!("Unsupported file name: {:?}", file),
        };

        let module = self
            .graph
            .get(specifier)
            .ok_or_else(|| anyhow!("Module not found in graph: {}", specifier))?;

        let (source, media_type) = match module {
            Module::Js(m) => (m.source.text.as_ref(), m.media_type),
            Module::Json(m) => (m.source.text.as_ref(), m.media_type),
            Module::Wasm(_) => bail!("WebAssembly modules are not supported for bundling"),
            Module::Npm(_) | Module::Node(_) | Module::External(_) => {
                bail!("External modules are not supported for bundling: {}", specifier)
            }
        };

        let js = to_javascript(specifier, strip_bom(source), media_type)?;
        let source_file = self
            .source_map
            .new_source_file(FileName::Url(specifier.clone()).into(), js);

        let input = StringInput::from(&*source_file);
        let lexer = Lexer::new(
            Syntax::Es(EsSyntax::default()),
            EsVersion::latest(),
            input,
            None,
        );
        let mut parser = Parser::new_from(lexer);
        let module = parser.parse_module().map_err(|e| {
            let loc = self.source_map.lookup_char_pos(e.span().lo);
            anyhow!(
                "{} at {}:{}:{}",
                e.kind().msg(),
                specifier,
                loc.line,
                loc.col.0 + 1
            )
        })?;

        Ok(ModuleData {
            fm: Rc::new((*source_file).clone()),
            module,
            helpers: Default::default(),
        })
    }
}

/// SWC bundler Resolve implementation backed by the graph's resolutions.
struct SwcBundleResolver<'a> {
    graph: &'a ModuleGraph,
}

impl Resolve for SwcBundleResolver<'_> {
    fn resolve(&self, base: &FileName, module_specifier: &str) -> Result<Resolution, anyhow::Error> {
        let base_specifier = match base {
            FileName::Url(url) => url,
            _ => bail!("Unsupported base file name: {:?}", base),
        };

        let resolved = self
            .graph
            .resolve_dependency(module_specifier, base_specifier, false)
            .ok_or_else(|| {
                anyhow!(
                    "Failed to resolve '{}' from '{}'",
                    module_specifier,
                    base_specifier
                )
            })?;

        Ok(Resolution {
            filename: FileName::Url(resolved.clone()),
            slug: None,
        })
    }
}

/// Converts a module's source to plain JavaScript.
fn to_javascript(
    specifier: &ModuleSpecifier,
    source: &str,
    media_type: MediaType,
) -> Result<String, anyhow::Error> {
    match media_type {
        MediaType::Json => Ok(transform_json_source(source)),
        MediaType::JavaScript | MediaType::Mjs | MediaType::Cjs => Ok(source.to_string()),
        MediaType::Dts | MediaType::Dmts | MediaType::Dcts => Ok(String::new()),
        _ => {
            let parsed = deno_ast::parse_module(ParseParams {
                specifier: specifier.clone(),
                text: Arc::from(source),
                media_type,
                capture_tokens: false,
                scope_analysis: false,
                maybe_syntax: None,
            })?;
            let emitted = parsed
                .transpile(
                    &TranspileOptions::default(),
                    &TranspileModuleOptions::default(),
                    &EmitOptions {
                        source_map: SourceMapOption::None,
                        ..Default::default()
                    },
                )?
                .into_source();
            Ok(emitted.text)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::bundler::BundleFormat;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn request(entry: PathBuf, global_name: Option<&str>) -> BundleRequest {
        BundleRequest {
            entry,
            format: BundleFormat::Iife,
            global_name: global_name.map(String::from),
            output: "out.js".to_string(),
        }
    }

    #[test]
    fn test_strip_typescript() {
        let specifier = ModuleSpecifier::parse("file:///project/src/a.ts").unwrap();
        let js = to_javascript(
            &specifier,
            "interface Voice { key: number }\nexport const keys: number[] = [1, 2];\n",
            MediaType::TypeScript,
        )
        .unwrap();
        assert!(!js.contains("interface"), "{js}");
        assert!(js.contains("export const keys = ["), "{js}");
    }

    #[test]
    fn test_global_bootstrap() {
        let entry = ModuleSpecifier::parse("file:///project/.ws/index_legacy.ts").unwrap();
        assert_eq!(
            global_bootstrap(&entry, "SpessaSynthLib"),
            "import * as ns from \"file:///project/.ws/index_legacy.ts\";\nglobalThis.SpessaSynthLib = ns;\n"
        );
    }

    #[test]
    fn test_bundle_typescript_project() {
        let root = tempfile::tempdir().unwrap();
        write(
            &root.path().join("src").join("voice.ts"),
            "export function pitch(key: number): number {\n    return 440 * Math.pow(2, (key - 69) / 12);\n}\nexport function unused(): void {}\n",
        );
        write(
            &root.path().join("src").join("index.ts"),
            "import { pitch } from \"./voice\";\nexport const A4: number = pitch(69);\n",
        );
        let workspace = Workspace::create_in(root.path()).unwrap();

        let bundler = SwcBundler::new(root.path().to_path_buf(), TsConfig::default());
        let artifact = bundler
            .bundle(
                &request(root.path().join("src").join("index.ts"), Some("Synth")),
                &workspace,
            )
            .unwrap();

        assert_eq!(artifact.name, "out.js");
        assert!(artifact.code.contains("globalThis.Synth"), "{}", artifact.code);
        assert!(artifact.code.contains("function pitch("), "{}", artifact.code);
        assert!(!artifact.code.contains("number[]"));
        assert!(!artifact.code.contains("import "), "{}", artifact.code);
    }

    #[test]
    fn test_missing_module_is_resolution_error() {
        let root = tempfile::tempdir().unwrap();
        write(
            &root.path().join("index.ts"),
            "import { x } from \"./missing.ts\";\nexport const y = x;\n",
        );
        let workspace = Workspace::create_in(root.path()).unwrap();

        let bundler = SwcBundler::new(root.path().to_path_buf(), TsConfig::default());
        let err = bundler
            .bundle(&request(root.path().join("index.ts"), None), &workspace)
            .unwrap_err();
        assert!(matches!(err, BuildError::Resolution { .. }), "{err}");
        assert!(err.to_string().contains("missing.ts"), "{err}");
    }
}
