//! Text utilities for module sources.

/// Strips the UTF-8 BOM (byte order mark) from the beginning of text if present.
pub fn strip_bom(text: &str) -> &str {
    text.strip_prefix('\u{FEFF}').unwrap_or(text)
}

/// Turns a JSON module into JavaScript that default-exports the parsed value.
///
/// `serde_json` produces a valid JavaScript string literal, so the JSON text
/// is embedded as one and parsed at runtime.
pub fn transform_json_source(source: &str) -> String {
    let literal = serde_json::Value::String(source.to_string()).to_string();
    format!("export default JSON.parse({literal});")
}
