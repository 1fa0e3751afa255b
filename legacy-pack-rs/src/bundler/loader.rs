//! Module loading and resolution for the in-process bundler.
//!
//! `FsLoader` implements deno_graph's `Loader` over the local filesystem plus
//! a small set of in-memory modules. `ProjectResolver` resolves bare
//! specifiers through the tsconfig `paths` mapping and then `node_modules`,
//! and defers everything else to standard URL resolution.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use deno_graph::source::{
    LoadError, LoadFuture, LoadOptions, LoadResponse, Loader, ResolutionKind, ResolveError,
    Resolver,
};
use deno_graph::{ModuleSpecifier, Range};

use crate::config::TsConfig;

const EXTENSIONS: &[&str] = &["ts", "tsx", "mts", "mjs", "js", "jsx", "json"];

/// Serves project files, and in-memory modules registered with [`FsLoader::with_module`].
#[derive(Debug, Default)]
pub struct FsLoader {
    virtual_modules: HashMap<ModuleSpecifier, String>,
}

impl FsLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(mut self, specifier: ModuleSpecifier, code: String) -> Self {
        self.virtual_modules.insert(specifier, code);
        self
    }

    /// Reads a module. `Ok(None)` means the module does not exist.
    fn load_module(&self, specifier: &ModuleSpecifier) -> Result<Option<String>, io::Error> {
        if let Some(code) = self.virtual_modules.get(specifier) {
            return Ok(Some(code.clone()));
        }

        if specifier.scheme() != "file" {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("Only local modules can be bundled: {}", specifier),
            ));
        }

        let path = specifier.to_file_path().map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Invalid file specifier: {}", specifier),
            )
        })?;

        match fs::read_to_string(&path) {
            Ok(code) => Ok(Some(code)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }
}

impl Loader for FsLoader {
    fn load(&self, specifier: &ModuleSpecifier, _options: LoadOptions) -> LoadFuture {
        let specifier = specifier.clone();
        let result = self.load_module(&specifier);

        Box::pin(async move {
            match result {
                Ok(Some(content)) => Ok(Some(LoadResponse::Module {
                    specifier,
                    maybe_headers: None,
                    content: Arc::from(content.into_bytes()),
                    mtime: None,
                })),
                Ok(None) => Ok(None),
                Err(e) => Err(LoadError::Other(Arc::new(e))),
            }
        })
    }
}

/// Resolves specifiers the way the project's TypeScript setup does.
#[derive(Debug, Clone)]
pub struct ProjectResolver {
    root: PathBuf,
    tsconfig: TsConfig,
}

impl ProjectResolver {
    pub fn new(root: &Path, tsconfig: TsConfig) -> Self {
        Self {
            root: root.to_path_buf(),
            tsconfig,
        }
    }

    pub fn as_resolver(&self) -> &dyn Resolver {
        self
    }

    /// Resolves a bare specifier such as `spessasynth_core` or `@scope/pkg/sub`.
    pub fn resolve_bare(&self, specifier: &str) -> Option<PathBuf> {
        self.resolve_path_alias(specifier)
            .or_else(|| self.resolve_node_module(specifier))
    }

    fn resolve_path_alias(&self, specifier: &str) -> Option<PathBuf> {
        let base = self
            .tsconfig
            .base_url
            .clone()
            .unwrap_or_else(|| self.root.clone());

        // The most specific pattern (longest text before `*`) wins
        let mut best: Option<(usize, &Vec<String>, String)> = None;
        for (pattern, targets) in &self.tsconfig.paths {
            let matched = match pattern.split_once('*') {
                Some((prefix, suffix)) => specifier
                    .strip_prefix(prefix)
                    .and_then(|rest| rest.strip_suffix(suffix))
                    .map(|capture| (prefix.len(), capture.to_string())),
                None => (pattern == specifier).then(|| (pattern.len(), String::new())),
            };
            if let Some((weight, capture)) = matched {
                if best.as_ref().map_or(true, |(w, _, _)| weight > *w) {
                    best = Some((weight, targets, capture));
                }
            }
        }

        let (_, targets, capture) = best?;
        targets
            .iter()
            .find_map(|target| resolve_file(&base.join(target.replace('*', &capture))))
    }

    fn resolve_node_module(&self, specifier: &str) -> Option<PathBuf> {
        let (package, subpath) = split_package(specifier)?;
        for dir in self.root.ancestors() {
            let package_dir = dir.join("node_modules").join(package);
            if !package_dir.is_dir() {
                continue;
            }
            return match subpath {
                Some(subpath) => resolve_file(&package_dir.join(subpath)),
                None => package_entry(&package_dir),
            };
        }
        None
    }
}

impl Resolver for ProjectResolver {
    fn resolve(
        &self,
        specifier: &str,
        referrer_range: &Range,
        _kind: ResolutionKind,
    ) -> Result<ModuleSpecifier, ResolveError> {
        if is_bare(specifier) {
            if let Some(path) = self.resolve_bare(specifier) {
                if let Ok(resolved) = ModuleSpecifier::from_file_path(&path) {
                    return Ok(resolved);
                }
            }
        }
        let resolved = deno_graph::resolve_import(specifier, &referrer_range.specifier)?;
        if resolved.scheme() == "file" {
            if let Ok(path) = resolved.to_file_path() {
                // Extensionless relative imports, as written for bundlers
                if !path.exists() {
                    if let Some(found) = resolve_file(&path) {
                        if let Ok(found) = ModuleSpecifier::from_file_path(found) {
                            return Ok(found);
                        }
                    }
                }
            }
        }
        Ok(resolved)
    }
}

fn is_bare(specifier: &str) -> bool {
    !(specifier.starts_with("./")
        || specifier.starts_with("../")
        || specifier.starts_with('/')
        || ModuleSpecifier::parse(specifier).is_ok())
}

/// Splits `@scope/name/sub/path` into `("@scope/name", Some("sub/path"))`.
fn split_package(specifier: &str) -> Option<(&str, Option<&str>)> {
    let split_at = if specifier.starts_with('@') {
        let scope_end = specifier.find('/')?;
        specifier[scope_end + 1..]
            .find('/')
            .map(|i| scope_end + 1 + i)
    } else {
        specifier.find('/')
    };
    Some(match split_at {
        Some(i) => (&specifier[..i], Some(&specifier[i + 1..])),
        None => (specifier, None),
    })
}

fn package_entry(package_dir: &Path) -> Option<PathBuf> {
    let manifest = fs::read_to_string(package_dir.join("package.json"))
        .ok()
        .and_then(|text| serde_json::from_str::<serde_json::Value>(&text).ok());

    if let Some(manifest) = manifest {
        for field in ["module", "browser", "main"] {
            if let Some(entry) = manifest.get(field).and_then(|v| v.as_str()) {
                if let Some(found) = resolve_file(&package_dir.join(entry)) {
                    return Some(found);
                }
            }
        }
    }
    resolve_file(&package_dir.join("index"))
}

/// Finds the file a module path refers to, trying extensions and `index` files.
fn resolve_file(path: &Path) -> Option<PathBuf> {
    if path.is_file() {
        return Some(path.to_path_buf());
    }
    for ext in EXTENSIONS {
        let mut candidate = path.as_os_str().to_owned();
        candidate.push(".");
        candidate.push(ext);
        let candidate = PathBuf::from(candidate);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    if path.is_dir() {
        for ext in EXTENSIONS {
            let candidate = path.join(format!("index.{ext}"));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}
