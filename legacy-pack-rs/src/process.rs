//! Running external build tools.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::error::{BuildError, BuildResult};

/// An external tool: program plus leading arguments, e.g. `npx babel`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
}

impl ToolCommand {
    pub fn from_parts(parts: &[String], default_program: &str) -> Self {
        match parts.split_first() {
            Some((program, args)) => Self {
                program: program.clone(),
                args: args.to_vec(),
            },
            None => Self {
                program: default_program.to_string(),
                args: Vec::new(),
            },
        }
    }

    pub fn display_name(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Runs the tool to completion and returns its stdout.
    ///
    /// A non-zero exit becomes [`BuildError::Tool`] carrying the tool's
    /// stderr and stdout verbatim.
    pub fn run(&self, args: &[String], stdin: Option<&str>, cwd: &Path) -> BuildResult<String> {
        log::debug!("Running {} {}", self.display_name(), args.join(" "));

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .args(args)
            .current_dir(cwd)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let launch_error = |source| BuildError::ToolLaunch {
            program: self.display_name(),
            source,
        };

        let mut child = command.spawn().map_err(launch_error)?;
        if let Some(input) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                // stdin is fed from its own thread while both output pipes drain
                let input = input.to_string();
                let writer = std::thread::spawn(move || pipe.write_all(input.as_bytes()));
                let output = child.wait_with_output().map_err(launch_error)?;
                let written = writer.join().unwrap_or_else(|_| Ok(()));
                let stdout = self.finish(output)?;
                written.map_err(launch_error)?;
                return Ok(stdout);
            }
        }
        let output = child.wait_with_output().map_err(launch_error)?;
        self.finish(output)
    }

    fn finish(&self, output: std::process::Output) -> BuildResult<String> {
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let mut combined = stderr.into_owned();
            if !stdout.is_empty() {
                if !combined.is_empty() && !combined.ends_with('\n') {
                    combined.push('\n');
                }
                combined.push_str(&stdout);
            }
            return Err(BuildError::Tool {
                program: self.display_name(),
                status: output.status.to_string(),
                output: combined,
            });
        }
        if !output.stderr.is_empty() {
            log::debug!(
                "{}: {}",
                self.display_name(),
                String::from_utf8_lossy(&output.stderr).trim_end()
            );
        }
        Ok(stdout)
    }
}
