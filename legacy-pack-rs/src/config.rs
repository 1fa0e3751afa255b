//! Build configuration.
//!
//! The configuration lives in an optional `legacy-pack.json` at the project
//! root. Every field has a default matching the SpessaSynth RPG Maker MV
//! layout, so a project following that layout needs no file at all.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BuildError, BuildResult};
use crate::inject::{is_identifier, Placeholder};

pub const DEFAULT_CONFIG_FILE: &str = "legacy-pack.json";

/// Project-wide build settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildConfig {
    /// Directory that relative paths resolve against. Set by [`BuildConfig::load`].
    #[serde(skip)]
    pub root: PathBuf,
    pub out_dir: PathBuf,
    pub tsconfig: PathBuf,
    /// Where unmatched injection targets are dumped. Lives outside the temp workspace.
    pub diagnostics_dir: PathBuf,
    pub profile: LegacyProfile,
    pub main: MainEntryConfig,
    pub processor: ProcessorEntryConfig,
    pub placeholder: Placeholder,
    pub tools: ToolsConfig,
    pub polyfills: Vec<PolyfillPrelude>,
    /// Overrides the variant's source map default.
    pub source_maps: Option<bool>,
    /// Overrides the variant's standalone processor default.
    pub standalone_processor: Option<bool>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            out_dir: PathBuf::from("js").join("plugins"),
            tsconfig: PathBuf::from("tsconfig.json"),
            diagnostics_dir: PathBuf::from(".legacy-pack-debug"),
            profile: LegacyProfile::default(),
            main: MainEntryConfig::default(),
            processor: ProcessorEntryConfig::default(),
            placeholder: Placeholder::default(),
            tools: ToolsConfig::default(),
            polyfills: vec![
                PolyfillPrelude {
                    package: "core-js".to_string(),
                    script: PathBuf::from("node_modules/core-js-bundle/minified.js"),
                },
                PolyfillPrelude {
                    package: "regenerator-runtime".to_string(),
                    script: PathBuf::from("node_modules/regenerator-runtime/runtime.js"),
                },
            ],
            source_maps: None,
            standalone_processor: None,
        }
    }
}

impl BuildConfig {
    /// Loads the configuration at `path`.
    ///
    /// A missing file yields the defaults rooted at the file's directory.
    pub fn load(path: &Path) -> BuildResult<Self> {
        let root = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut config = if path.exists() {
            let text = fs::read_to_string(path).map_err(|err| BuildError::io(path, err))?;
            Self::from_json(&text).map_err(|message| BuildError::Config {
                path: path.to_path_buf(),
                message,
            })?
        } else {
            log::debug!("{} not found, using defaults", path.display());
            Self::default()
        };
        config.root = fs::canonicalize(&root).map_err(|err| BuildError::io(&root, err))?;
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self, String> {
        let config: Self = serde_json::from_str(text).map_err(|err| err.to_string())?;
        config.placeholder.validate()?;
        if let Some(global_name) = &config.main.global_name {
            if !is_identifier(global_name) {
                return Err(format!("global name `{global_name}` is not an identifier"));
            }
        }
        if config.main.output == config.processor.output {
            return Err(format!(
                "main and processor outputs must differ (both are `{}`)",
                config.main.output
            ));
        }
        Ok(config)
    }

    /// Resolves a project-relative path against the root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    pub fn out_dir(&self) -> PathBuf {
        self.resolve(&self.out_dir)
    }

    pub fn diagnostics_dir(&self) -> PathBuf {
        self.resolve(&self.diagnostics_dir)
    }

    /// The project tsconfig, if present.
    pub fn tsconfig_path(&self) -> Option<PathBuf> {
        let path = self.resolve(&self.tsconfig);
        path.exists().then_some(path)
    }
}

/// The fixed legacy engine the artifacts must run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LegacyProfile {
    pub chrome: u32,
}

impl Default for LegacyProfile {
    fn default() -> Self {
        // NW.js 0.48.4 as shipped with RPG Maker MV
        Self { chrome: 85 }
    }
}

impl LegacyProfile {
    /// Babel `targets` for this profile.
    pub fn babel_targets(&self) -> serde_json::Value {
        serde_json::json!({ "chrome": self.chrome.to_string() })
    }

    /// esbuild `--target` for this profile.
    pub fn esbuild_target(&self) -> String {
        format!("chrome{}", self.chrome)
    }
}

impl fmt::Display for LegacyProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Chromium {}", self.chrome)
    }
}

/// The main library entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MainEntryConfig {
    /// Authored adapter module. When unset the adapter is rendered from `library`.
    pub adapter: Option<PathBuf>,
    /// Library index whose exports the rendered adapter re-exports.
    pub library: PathBuf,
    pub output: String,
    pub global_name: Option<String>,
}

impl Default for MainEntryConfig {
    fn default() -> Self {
        Self {
            adapter: None,
            library: PathBuf::from("src").join("index.ts"),
            output: "spessasynth_lib.js".to_string(),
            global_name: Some("SpessaSynthLib".to_string()),
        }
    }
}

/// The AudioWorklet processor entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessorEntryConfig {
    /// Authored adapter module. When unset the adapter is rendered from the fields below.
    pub adapter: Option<PathBuf>,
    pub core_module: PathBuf,
    pub core_export: String,
    pub name_module: PathBuf,
    pub name_export: String,
    pub processor_class: String,
    /// Package exporting the core logger, imported by its bare name.
    pub utils_module: String,
    pub utils_export: String,
    pub colors_module: PathBuf,
    pub colors_export: String,
    /// Logged after registration. `null` renders no log call.
    pub registered_message: Option<String>,
    pub output: String,
}

impl Default for ProcessorEntryConfig {
    fn default() -> Self {
        let worklet_dir = PathBuf::from("src").join("synthesizer").join("worklet");
        Self {
            adapter: None,
            core_module: worklet_dir.join("worklet_synthesizer_core.ts"),
            core_export: "WorkletSynthesizerCore".to_string(),
            name_module: worklet_dir.join("worklet_processor_name.ts"),
            name_export: "WORKLET_PROCESSOR_NAME".to_string(),
            processor_class: "WorkletSynthesizerProcessor".to_string(),
            utils_module: "spessasynth_core".to_string(),
            utils_export: "SpessaSynthCoreUtils".to_string(),
            colors_module: PathBuf::from("src").join("utils").join("other.ts"),
            colors_export: "consoleColors".to_string(),
            registered_message: Some("%cProcessor successfully registered!".to_string()),
            output: "spessasynth_processor.js".to_string(),
        }
    }
}

/// External tool commands. Each is a program followed by leading arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolsConfig {
    pub esbuild: Vec<String>,
    pub babel: Vec<String>,
    /// Project Babel config. When unset one is generated from the profile.
    pub babel_config: Option<PathBuf>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            esbuild: vec!["npx".to_string(), "esbuild".to_string()],
            babel: vec!["npx".to_string(), "babel".to_string()],
            babel_config: None,
        }
    }
}

/// A self-contained polyfill script that provides one npm package's features.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolyfillPrelude {
    pub package: String,
    pub script: PathBuf,
}

/// Module resolution options read from the project's tsconfig.json.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TsConfig {
    pub base_url: Option<PathBuf>,
    /// `compilerOptions.paths` patterns and their substitutions.
    pub paths: Vec<(String, Vec<String>)>,
}

impl TsConfig {
    pub fn load(path: &Path) -> BuildResult<Self> {
        let text = fs::read_to_string(path).map_err(|err| BuildError::io(path, err))?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse(&text, dir).map_err(|message| BuildError::Config {
            path: path.to_path_buf(),
            message,
        })
    }

    /// Parses tsconfig text. Comments and trailing commas are allowed.
    pub fn parse(text: &str, dir: &Path) -> Result<Self, String> {
        let value = jsonc_parser::parse_to_serde_value(text, &Default::default())
            .map_err(|err| err.to_string())?
            .unwrap_or(serde_json::Value::Null);

        let Some(options) = value.get("compilerOptions") else {
            return Ok(Self::default());
        };

        let base_url = options
            .get("baseUrl")
            .and_then(|v| v.as_str())
            .map(|base| dir.join(base));

        let mut paths = Vec::new();
        if let Some(map) = options.get("paths").and_then(|v| v.as_object()) {
            for (pattern, targets) in map {
                let targets = targets
                    .as_array()
                    .ok_or_else(|| format!("paths entry `{pattern}` must be an array"))?
                    .iter()
                    .filter_map(|t| t.as_str().map(str::to_string))
                    .collect();
                paths.push((pattern.clone(), targets));
            }
        }

        Ok(Self { base_url, paths })
    }
}
