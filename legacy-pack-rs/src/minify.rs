//! Final minification.

use std::fs;
use std::path::PathBuf;

use crate::artifact::Artifact;
use crate::config::LegacyProfile;
use crate::ecma::{mangle_chunk, parse_chunk, print_chunk, print_chunk_with_map};
use crate::error::{BuildError, BuildResult};
use crate::process::ToolCommand;

pub trait Minifier {
    fn name(&self) -> &'static str;

    /// Minifies `chunk`. A source map on the chunk is chained through, so the
    /// result's map still points at the original sources.
    fn minify(&self, chunk: &Artifact) -> BuildResult<Artifact>;
}

/// Reprints the chunk with SWC codegen in minify mode.
///
/// Whitespace and comments go, and local bindings get short names.
#[derive(Debug, Clone, Copy)]
pub struct SwcMinifier {
    mangle: bool,
}

impl Default for SwcMinifier {
    fn default() -> Self {
        Self { mangle: true }
    }
}

impl SwcMinifier {
    /// Drops whitespace and comments only.
    pub fn whitespace_only() -> Self {
        Self { mangle: false }
    }
}

impl Minifier for SwcMinifier {
    fn name(&self) -> &'static str {
        "swc"
    }

    fn minify(&self, chunk: &Artifact) -> BuildResult<Artifact> {
        let mut parsed = parse_chunk(&chunk.name, &chunk.code)?;
        if self.mangle {
            parsed = mangle_chunk(parsed);
        }
        let (code, map) = match &chunk.map {
            Some(map) => {
                let (code, map) = print_chunk_with_map(&parsed, true, map)?;
                (code, Some(map))
            }
            None => (print_chunk(&parsed, true)?, None),
        };
        Ok(Artifact {
            name: chunk.name.clone(),
            code,
            map,
            path: None,
        })
    }
}

/// Runs the chunk through `esbuild --minify`.
///
/// Without a map the chunk is piped through stdin. With one, esbuild reads
/// the chunk from the working directory next to its map and writes a map
/// for the minified output.
#[derive(Debug, Clone)]
pub struct EsbuildMinifier {
    tool: ToolCommand,
    target: String,
    cwd: PathBuf,
}

impl EsbuildMinifier {
    pub fn new(tool: ToolCommand, profile: &LegacyProfile, cwd: PathBuf) -> Self {
        Self {
            tool,
            target: profile.esbuild_target(),
            cwd,
        }
    }

    pub fn args(&self) -> Vec<String> {
        vec![
            "--minify".to_string(),
            "--loader=js".to_string(),
            format!("--target={}", self.target),
            "--log-level=warning".to_string(),
        ]
    }

    pub fn file_args(&self, input: &str, outfile: &str) -> Vec<String> {
        vec![
            input.to_string(),
            "--minify".to_string(),
            format!("--target={}", self.target),
            "--sourcemap".to_string(),
            "--log-level=warning".to_string(),
            format!("--outfile={outfile}"),
        ]
    }

    fn minify_with_map(&self, chunk: &Artifact, map: &str) -> BuildResult<Artifact> {
        let input_name = format!("minify_{}", chunk.name);
        let output_name = format!("minified_{}", chunk.name);
        let input = self.cwd.join(&input_name);
        let input_map = self.cwd.join(format!("{input_name}.map"));
        let output = self.cwd.join(&output_name);
        let output_map = self.cwd.join(format!("{output_name}.map"));

        let mut code = chunk.code.clone();
        if !code.ends_with('\n') {
            code.push('\n');
        }
        code.push_str(&format!("//# sourceMappingURL={input_name}.map\n"));
        fs::write(&input, code).map_err(|err| BuildError::io(&input, err))?;
        fs::write(&input_map, map).map_err(|err| BuildError::io(&input_map, err))?;

        self.tool
            .run(&self.file_args(&input_name, &output_name), None, &self.cwd)?;

        let code = fs::read_to_string(&output).map_err(|err| BuildError::io(&output, err))?;
        let map =
            fs::read_to_string(&output_map).map_err(|err| BuildError::io(&output_map, err))?;
        Ok(Artifact {
            name: chunk.name.clone(),
            code: strip_trailing_map_comment(&code).to_string(),
            map: Some(map),
            path: None,
        })
    }
}

/// `code` without a final `//# sourceMappingURL=` line.
fn strip_trailing_map_comment(code: &str) -> &str {
    let trimmed = code.trim_end();
    match trimmed.rfind('\n') {
        Some(idx) if trimmed[idx + 1..].starts_with("//# sourceMappingURL=") => &code[..idx + 1],
        None if trimmed.starts_with("//# sourceMappingURL=") => "",
        _ => code,
    }
}

impl Minifier for EsbuildMinifier {
    fn name(&self) -> &'static str {
        "esbuild"
    }

    fn minify(&self, chunk: &Artifact) -> BuildResult<Artifact> {
        if let Some(map) = &chunk.map {
            return self.minify_with_map(chunk, map);
        }
        let code = self.tool.run(&self.args(), Some(&chunk.code), &self.cwd)?;
        Ok(Artifact {
            name: chunk.name.clone(),
            code,
            map: None,
            path: None,
        })
    }
}
