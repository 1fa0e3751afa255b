//! Bundling with the esbuild CLI.

use std::path::{Path, PathBuf};

use super::{BundleFormat, BundleRequest, Bundler};
use crate::artifact::Artifact;
use crate::error::BuildResult;
use crate::process::ToolCommand;
use crate::workspace::Workspace;

/// Runs `esbuild --bundle` in the workspace.
///
/// The output targets `esnext` so that syntax lowering is left entirely to
/// Babel. Only whitespace and syntax are minified.
#[derive(Debug, Clone)]
pub struct EsbuildBundler {
    tool: ToolCommand,
    tsconfig: Option<PathBuf>,
}

impl EsbuildBundler {
    pub fn new(tool: ToolCommand, tsconfig: Option<PathBuf>) -> Self {
        Self { tool, tsconfig }
    }

    pub fn args(&self, request: &BundleRequest, outfile: &Path) -> Vec<String> {
        let format = match request.format {
            BundleFormat::Iife => "iife",
            BundleFormat::Esm => "esm",
        };
        let mut args = vec![
            request.entry.display().to_string(),
            "--bundle".to_string(),
            "--tree-shaking=true".to_string(),
            format!("--format={format}"),
            "--platform=browser".to_string(),
            "--target=esnext".to_string(),
            "--minify-whitespace".to_string(),
            "--minify-syntax".to_string(),
            "--log-level=warning".to_string(),
            format!("--outfile={}", outfile.display()),
        ];
        if let Some(global_name) = &request.global_name {
            args.push(format!("--global-name={global_name}"));
        }
        if let Some(tsconfig) = &self.tsconfig {
            args.push(format!("--tsconfig={}", tsconfig.display()));
        }
        args
    }
}

impl Bundler for EsbuildBundler {
    fn name(&self) -> &'static str {
        "esbuild"
    }

    fn bundle(&self, request: &BundleRequest, workspace: &Workspace) -> BuildResult<Artifact> {
        let outfile = workspace.join(&format!("temp_{}", request.output));
        self.tool
            .run(&self.args(request, &outfile), None, workspace.path())?;
        Artifact::read(request.output.clone(), &outfile)
    }
}
