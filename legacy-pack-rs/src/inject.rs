//! Worklet inlining.
//!
//! The legacy engine cannot load the AudioWorklet processor from a separate
//! file, so the finished processor script is embedded into the main artifact.
//! The main adapter exports a stub function that throws; this module finds
//! that stub in already-bundled (and possibly transpiled) code and swaps in an
//! implementation that rebuilds the processor script from a base64 literal
//! and returns a blob URL for `audioWorklet.addModule()`.
//!
//! The stub is located textually. Upstream tools change the surrounding
//! shape between versions, but they keep the exported name and the stub's
//! `Error(` call, so each pattern is anchored on both. Function bodies may not
//! contain braces, which keeps every match inside a single stub.

use std::fmt;
use std::ops::Range;
use std::path::PathBuf;

use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

lazy_static! {
    static ref IDENTIFIER_RE: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*$").unwrap();
    static ref MEDIA_TYPE_RE: Regex =
        Regex::new(r"^[A-Za-z0-9!#$&^_.+-]+/[A-Za-z0-9!#$&^_.+-]+$").unwrap();
}

pub(crate) fn is_identifier(text: &str) -> bool {
    IDENTIFIER_RE.is_match(text)
}

/// Identifies the stub function in the main adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Placeholder {
    /// Exported function name.
    pub name: String,
    /// Identifier called inside the throwing stub and nowhere in the replacement.
    pub marker: String,
    /// Media type of the blob handed to the worklet loader.
    pub media_type: String,
}

impl Default for Placeholder {
    fn default() -> Self {
        Self {
            name: "createWorkletBlobURL".to_string(),
            marker: "Error".to_string(),
            media_type: "application/javascript".to_string(),
        }
    }
}

impl Placeholder {
    pub fn validate(&self) -> Result<(), String> {
        if !IDENTIFIER_RE.is_match(&self.name) {
            return Err(format!("placeholder name `{}` is not an identifier", self.name));
        }
        if !IDENTIFIER_RE.is_match(&self.marker) {
            return Err(format!("placeholder marker `{}` is not an identifier", self.marker));
        }
        if !MEDIA_TYPE_RE.is_match(&self.media_type) {
            return Err(format!("`{}` is not a media type", self.media_type));
        }
        Ok(())
    }
}

/// The lexical shapes the stub can take, in match priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaceholderForm {
    /// `function name() { throw new Error(...) }`, as left by the bundler or Babel.
    Declaration,
    /// `export function name() { ... }`, from ES module output.
    Exported,
    /// `name: function () { ... }`, when exports were lowered into an object literal.
    ObjectMethod,
}

impl PlaceholderForm {
    pub const PRIORITY: [PlaceholderForm; 3] = [
        PlaceholderForm::Declaration,
        PlaceholderForm::Exported,
        PlaceholderForm::ObjectMethod,
    ];

    fn pattern(self, name: &str, marker: &str) -> String {
        let name = regex::escape(name);
        let marker = regex::escape(marker);
        // optional `: type` annotation covers adapters that still carry TypeScript
        let stub = format!(
            r"\s*\([^)]*\)(?:\s*:\s*[\w$.]+)?\s*\{{[^{{}}]*?\b{marker}\s*\([^{{}}]*\}}"
        );
        match self {
            PlaceholderForm::Declaration => format!(r"\bfunction\s+{name}{stub}"),
            PlaceholderForm::Exported => format!(r"\bexport\s+function\s+{name}{stub}"),
            PlaceholderForm::ObjectMethod => {
                format!(r"\b{name}\s*:\s*function(?:\s+{name})?{stub}")
            }
        }
    }

    fn render(self, name: &str, body: &str) -> String {
        match self {
            PlaceholderForm::Declaration => format!("function {name}() {body}"),
            PlaceholderForm::Exported => format!("export function {name}() {body}"),
            PlaceholderForm::ObjectMethod => format!("{name}: function () {body}"),
        }
    }
}

impl fmt::Display for PlaceholderForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaceholderForm::Declaration => "function declaration",
            PlaceholderForm::Exported => "exported function declaration",
            PlaceholderForm::ObjectMethod => "object-literal method",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum InjectError {
    #[error("Invalid placeholder: {0}")]
    InvalidPlaceholder(String),

    #[error(
        "No pattern matched placeholder `{placeholder}` (tried: {}){}",
        join_forms(.attempted),
        dump_note(.dump)
    )]
    NoMatch {
        placeholder: String,
        attempted: Vec<PlaceholderForm>,
        dump: Option<PathBuf>,
    },

    #[error("Embedded worklet payload for `{placeholder}` is missing from {artifact} after later stages")]
    PayloadLost { placeholder: String, artifact: String },

    #[error("Embedded payload is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),
}

impl InjectError {
    /// Records where the unmatched input was saved.
    pub fn with_dump(self, path: PathBuf) -> Self {
        match self {
            InjectError::NoMatch {
                placeholder,
                attempted,
                ..
            } => InjectError::NoMatch {
                placeholder,
                attempted,
                dump: Some(path),
            },
            other => other,
        }
    }
}

fn join_forms(forms: &[PlaceholderForm]) -> String {
    forms
        .iter()
        .map(|form| form.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn dump_note(dump: &Option<PathBuf>) -> String {
    match dump {
        Some(path) => format!("; input saved to {}", path.display()),
        None => String::new(),
    }
}

/// Encodes payload bytes as a string that can sit inside a double-quoted JS literal.
pub fn encode_payload(payload: &[u8]) -> String {
    BASE64_STANDARD.encode(payload)
}

pub fn decode_payload(encoded: &str) -> Result<Vec<u8>, InjectError> {
    Ok(BASE64_STANDARD.decode(encoded)?)
}

/// Result of a successful injection.
#[derive(Debug, Clone)]
pub struct Injection {
    pub code: String,
    pub form: PlaceholderForm,
    /// Byte range of the stub in the original target.
    pub replaced: Range<usize>,
    /// The loader that took the stub's place.
    pub replacement: String,
    /// The base64 literal now embedded in `code`.
    pub encoded: String,
}

struct Matcher {
    form: PlaceholderForm,
    regex: Regex,
}

/// Locates the placeholder stub and replaces it with the inlined worklet loader.
pub struct WorkletInjector {
    placeholder: Placeholder,
    matchers: Vec<Matcher>,
}

impl WorkletInjector {
    pub fn new(placeholder: &Placeholder) -> Result<Self, InjectError> {
        placeholder
            .validate()
            .map_err(InjectError::InvalidPlaceholder)?;

        let matchers = PlaceholderForm::PRIORITY
            .iter()
            .map(|&form| {
                let pattern = form.pattern(&placeholder.name, &placeholder.marker);
                Regex::new(&pattern)
                    .map(|regex| Matcher { form, regex })
                    .map_err(|err| InjectError::InvalidPlaceholder(err.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            placeholder: placeholder.clone(),
            matchers,
        })
    }

    pub fn placeholder(&self) -> &Placeholder {
        &self.placeholder
    }

    /// Finds the stub using the first form that matches.
    pub fn locate(&self, target: &str) -> Option<(PlaceholderForm, Range<usize>)> {
        for matcher in &self.matchers {
            log::debug!("Trying {} pattern for {}", matcher.form, self.placeholder.name);
            let found = matcher.regex.find_iter(target).find(|m| {
                matcher.form != PlaceholderForm::Declaration
                    || in_statement_position(&target[..m.start()])
            });
            if let Some(m) = found {
                return Some((matcher.form, m.range()));
            }
        }
        None
    }

    /// Replaces the stub in `target` with a loader embedding `payload`.
    pub fn inject(&self, target: &str, payload: &[u8]) -> Result<Injection, InjectError> {
        let Some((form, range)) = self.locate(target) else {
            return Err(InjectError::NoMatch {
                placeholder: self.placeholder.name.clone(),
                attempted: PlaceholderForm::PRIORITY.to_vec(),
                dump: None,
            });
        };

        let encoded = encode_payload(payload);
        let replacement = form.render(
            &self.placeholder.name,
            &loader_body(&encoded, &self.placeholder.media_type),
        );

        let mut code = String::with_capacity(target.len() - range.len() + replacement.len());
        code.push_str(&target[..range.start]);
        code.push_str(&replacement);
        code.push_str(&target[range.end..]);

        log::info!(
            "Injected {} byte worklet payload ({} bytes base64) into {} `{}`",
            payload.len(),
            encoded.len(),
            form,
            self.placeholder.name
        );

        Ok(Injection {
            code,
            form,
            replaced: range,
            replacement,
            encoded,
        })
    }

    /// Checks that code derived from an injection still embeds the payload
    /// and no longer carries the throwing stub.
    pub fn verify(&self, code: &str, injection: &Injection, artifact: &str) -> Result<(), InjectError> {
        if !code.contains(&injection.encoded) || self.locate(code).is_some() {
            return Err(InjectError::PayloadLost {
                placeholder: self.placeholder.name.clone(),
                artifact: artifact.to_string(),
            });
        }
        Ok(())
    }
}

fn loader_body(encoded: &str, media_type: &str) -> String {
    // atob yields one char per byte; copying into a Uint8Array keeps UTF-8 intact
    format!(
        r#"{{
    var base64Code = "{encoded}";
    var binary = atob(base64Code);
    var bytes = new Uint8Array(binary.length);
    for (var i = 0; i < binary.length; i++) {{
        bytes[i] = binary.charCodeAt(i);
    }}
    var blob = new Blob([bytes], {{
        type: "{media_type}"
    }});
    return URL.createObjectURL(blob);
}}"#
    )
}

/// Whether a `function` keyword following `prefix` starts a declaration
/// rather than an expression or an `export` statement.
fn in_statement_position(prefix: &str) -> bool {
    let trimmed = prefix.trim_end();
    for keyword in ["export", "default"] {
        if let Some(before) = trimmed.strip_suffix(keyword) {
            if !before.ends_with(|c: char| c.is_alphanumeric() || c == '_' || c == '$') {
                return false;
            }
        }
    }
    !matches!(
        trimmed.chars().last(),
        Some(':' | '=' | '(' | ',' | '!' | '?' | '&' | '|' | '[' | '+' | '-')
    )
}
