//! Entry adapters.
//!
//! An adapter is the compilation root handed to the bundler. The main adapter
//! re-exports the library and declares the worklet URL placeholder; the
//! processor adapter registers the AudioWorklet processor with `process`
//! defined as a plain class method, which Babel can lower to ES5.
//!
//! Adapters are either authored in the project or rendered into the
//! workspace. Rendered adapters sit one directory below the project root,
//! so project-relative modules are imported through `../`.

use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::config::{BuildConfig, ProcessorEntryConfig};
use crate::error::{BuildError, BuildResult};
use crate::inject::Placeholder;
use crate::workspace::Workspace;

pub const MAIN_ADAPTER_FILE: &str = "index_legacy.ts";
pub const PROCESSOR_ADAPTER_FILE: &str = "worklet_processor_legacy.ts";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryRole {
    Main,
    Processor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterSource {
    Authored,
    Rendered,
}

/// A compilation root ready to be bundled.
#[derive(Debug, Clone)]
pub struct EntryAdapter {
    pub role: EntryRole,
    pub path: PathBuf,
    pub source: AdapterSource,
    /// Final artifact file name.
    pub output: String,
    pub global_name: Option<String>,
}

/// Prepares both entry adapters for a run.
pub fn materialize(
    config: &BuildConfig,
    workspace: &Workspace,
) -> BuildResult<(EntryAdapter, EntryAdapter)> {
    let main_path = match &config.main.adapter {
        Some(adapter) => {
            let path = config.resolve(adapter);
            check_authored_main(&path, &config.placeholder)?;
            (path, AdapterSource::Authored)
        }
        None => {
            let code = render_main_adapter(&config.main.library, &config.placeholder);
            (workspace.write(MAIN_ADAPTER_FILE, &code)?, AdapterSource::Rendered)
        }
    };

    let processor_path = match &config.processor.adapter {
        Some(adapter) => {
            let path = config.resolve(adapter);
            if !path.is_file() {
                return Err(BuildError::Resolution {
                    path: path.display().to_string(),
                    message: "processor adapter not found".to_string(),
                });
            }
            (path, AdapterSource::Authored)
        }
        None => {
            let code = render_processor_adapter(&config.processor);
            (
                workspace.write(PROCESSOR_ADAPTER_FILE, &code)?,
                AdapterSource::Rendered,
            )
        }
    };

    let main = EntryAdapter {
        role: EntryRole::Main,
        path: main_path.0,
        source: main_path.1,
        output: config.main.output.clone(),
        global_name: config.main.global_name.clone(),
    };
    let processor = EntryAdapter {
        role: EntryRole::Processor,
        path: processor_path.0,
        source: processor_path.1,
        output: config.processor.output.clone(),
        global_name: None,
    };
    log::debug!("Main adapter: {} ({:?})", main.path.display(), main.source);
    log::debug!(
        "Processor adapter: {} ({:?})",
        processor.path.display(),
        processor.source
    );
    Ok((main, processor))
}

fn check_authored_main(path: &Path, placeholder: &Placeholder) -> BuildResult<()> {
    let code = fs::read_to_string(path).map_err(|err| BuildError::Resolution {
        path: path.display().to_string(),
        message: err.to_string(),
    })?;
    if !code.contains(&placeholder.name) {
        return Err(BuildError::Resolution {
            path: path.display().to_string(),
            message: format!(
                "main adapter does not declare the `{}` placeholder",
                placeholder.name
            ),
        });
    }
    Ok(())
}

/// Import specifier for a module, as seen from a rendered adapter.
pub fn import_specifier(path: &Path) -> String {
    if path.is_absolute() {
        return path.to_string_lossy().replace('\\', "/");
    }
    let mut parts = vec!["..".to_string()];
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => parts.push("..".to_string()),
            other => parts.push(other.as_os_str().to_string_lossy().into_owned()),
        }
    }
    parts.join("/")
}

pub fn render_main_adapter(library: &Path, placeholder: &Placeholder) -> String {
    format!(
        r#"// Generated by legacy-pack: library surface for the legacy single-file build.
export * from "{library}";

/**
 * Returns a Blob URL for the inlined worklet processor, for use with
 * audioWorklet.addModule(). The body is replaced during the build.
 */
export function {name}(): string {{
    throw new {marker}("{name} is only available in the single-file legacy build");
}}
"#,
        library = import_specifier(library),
        name = placeholder.name,
        marker = placeholder.marker,
    )
}

pub fn render_processor_adapter(processor: &ProcessorEntryConfig) -> String {
    let (log_imports, log_call) = match &processor.registered_message {
        Some(message) => (
            format!(
                "import {{ {utils} }} from \"{utils_module}\";\nimport {{ {colors} }} from \"{colors_module}\";\n",
                utils = processor.utils_export,
                utils_module = processor.utils_module,
                colors = processor.colors_export,
                colors_module = import_specifier(&processor.colors_module),
            ),
            format!(
                "{utils}.SpessaSynthInfo({message}, {colors}.recognized);\n",
                utils = processor.utils_export,
                message = serde_json::Value::String(message.clone()),
                colors = processor.colors_export,
            ),
        ),
        None => (String::new(), String::new()),
    };

    format!(
        r#"// Generated by legacy-pack: AudioWorklet processor for the legacy build.
{log_imports}import {{ {core} }} from "{core_module}";
import {{ {name} }} from "{name_module}";

class {class} extends AudioWorkletProcessor {{
    private readonly core: {core};

    public constructor(options: {{ processorOptions: any }}) {{
        super();
        this.core = new {core}(
            sampleRate,
            currentTime,
            this.port,
            options.processorOptions
        );
    }}

    public process(inputs: Float32Array[][], outputs: Float32Array[][]): boolean {{
        return this.core.process(inputs, outputs);
    }}
}}

registerProcessor({name}, {class});
{log_call}"#,
        core = processor.core_export,
        core_module = import_specifier(&processor.core_module),
        name = processor.name_export,
        name_module = import_specifier(&processor.name_module),
        class = processor.processor_class,
    )
}
