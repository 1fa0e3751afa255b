//! Babel CLI backend.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;

use super::Transpiler;
use crate::artifact::Artifact;
use crate::config::LegacyProfile;
use crate::error::{BuildError, BuildResult};
use crate::process::ToolCommand;
use crate::workspace::Workspace;

lazy_static! {
    static ref SOURCE_MAPPING_URL_RE: Regex =
        Regex::new(r"(?m)^//# sourceMappingURL=.*$\n?").unwrap();
}

const GENERATED_CONFIG_FILE: &str = "babel.config.json";

/// Runs `@babel/preset-env` through the Babel CLI.
#[derive(Debug, Clone)]
pub struct BabelTranspiler {
    tool: ToolCommand,
    config_file: PathBuf,
    cwd: PathBuf,
}

impl BabelTranspiler {
    /// Uses `project_config` when given, otherwise writes a config for
    /// `profile` into the workspace.
    pub fn prepare(
        tool: ToolCommand,
        profile: &LegacyProfile,
        project_config: Option<PathBuf>,
        workspace: &Workspace,
    ) -> BuildResult<Self> {
        let config_file = match project_config {
            Some(path) => {
                if !path.is_file() {
                    return Err(BuildError::Config {
                        path,
                        message: "Babel config file not found".to_string(),
                    });
                }
                path
            }
            None => workspace.write(GENERATED_CONFIG_FILE, &babel_config(profile))?,
        };
        log::debug!("Babel config: {}", config_file.display());
        Ok(Self {
            tool,
            config_file,
            cwd: workspace.path().to_path_buf(),
        })
    }

    fn config_args(&self) -> [String; 2] {
        [
            "--config-file".to_string(),
            self.config_file.display().to_string(),
        ]
    }
}

impl Transpiler for BabelTranspiler {
    fn transpile_file(
        &self,
        input: &Path,
        output: &Path,
        source_maps: bool,
    ) -> BuildResult<Artifact> {
        let mut args = vec![
            input.display().to_string(),
            "--out-file".to_string(),
            output.display().to_string(),
        ];
        args.extend(self.config_args());
        if source_maps {
            args.push("--source-maps".to_string());
        }
        self.tool.run(&args, None, &self.cwd)?;

        let name = output
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let artifact = Artifact::read(name, output)?;
        let code = strip_source_mapping_url(&artifact.code);

        let map = if source_maps {
            let mut map_path = output.as_os_str().to_owned();
            map_path.push(".map");
            let map_path = PathBuf::from(map_path);
            Some(fs::read_to_string(&map_path).map_err(|err| BuildError::io(&map_path, err))?)
        } else {
            None
        };

        let mut artifact = if code.len() == artifact.code.len() {
            artifact
        } else {
            artifact.with_code(code)
        };
        artifact.map = map;
        Ok(artifact)
    }

    fn transpile_chunk(&self, chunk: &Artifact) -> BuildResult<Artifact> {
        let mut args = vec!["--filename".to_string(), chunk.name.clone()];
        args.extend(self.config_args());
        let code = self.tool.run(&args, Some(&chunk.code), &self.cwd)?;
        Ok(Artifact::new(chunk.name.clone(), strip_source_mapping_url(&code)))
    }
}

/// `babel.config.json` contents for the profile.
pub fn babel_config(profile: &LegacyProfile) -> String {
    let config = serde_json::json!({
        "presets": [[
            "@babel/preset-env",
            {
                "targets": profile.babel_targets(),
                "useBuiltIns": "usage",
                "corejs": 3
            }
        ]],
        "sourceType": "script"
    });
    serde_json::to_string_pretty(&config).unwrap_or_default()
}

/// Removes the map comment Babel appends; the final map reference is added when written.
fn strip_source_mapping_url(code: &str) -> String {
    SOURCE_MAPPING_URL_RE.replace_all(code, "").into_owned()
}
