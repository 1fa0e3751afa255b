//! Usage-based polyfills.
//!
//! With `useBuiltIns: "usage"` Babel adds a bare `require("core-js/...")`
//! (or `import "core-js/..."`) for every built-in the code touches. A
//! classic script cannot load those, so they are removed and the packages
//! they name are provided by prelude scripts placed before the artifact.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use regex::Regex;

use crate::config::{BuildConfig, PolyfillPrelude};
use crate::error::{BuildError, BuildResult};
use crate::sourcemap::{apply_edits, Edit};

lazy_static! {
    static ref POLYFILL_IMPORT_RE: Regex = Regex::new(
        r#"(?m)^[ \t]*(?:require\(\s*["'](?P<req>[^"'\s./][^"'\s]*)["']\s*\)|import\s+["'](?P<imp>[^"'\s./][^"'\s]*)["'])[ \t]*;?[ \t]*(?:\r?\n)?"#
    )
    .unwrap();
    static ref TRAILING_MAP_COMMENT_RE: Regex =
        Regex::new(r"(?m)^//# sourceMappingURL=.*$").unwrap();
}

/// Polyfill modules required by transpiled code, grouped by package.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolyfillUsage {
    modules: BTreeMap<String, Vec<String>>,
}

impl PolyfillUsage {
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn packages(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn contains(&self, package: &str) -> bool {
        self.modules.contains_key(package)
    }

    /// Number of distinct polyfill modules.
    pub fn len(&self) -> usize {
        self.modules.values().map(Vec::len).sum()
    }

    fn insert(&mut self, module: &str) {
        let package = package_name(module).to_string();
        let modules = self.modules.entry(package).or_default();
        if !modules.iter().any(|m| m == module) {
            modules.push(module.to_string());
        }
    }

    fn first_module<'a>(&'a self, package: &'a str) -> &'a str {
        self.modules
            .get(package)
            .and_then(|modules| modules.first())
            .map(String::as_str)
            .unwrap_or(package)
    }
}

/// Finds the polyfill imports in `code`: what they require, and the edits
/// that remove them.
pub fn polyfill_import_edits(code: &str) -> (PolyfillUsage, Vec<Edit>) {
    let mut usage = PolyfillUsage::default();
    let edits = POLYFILL_IMPORT_RE
        .captures_iter(code)
        .filter_map(|caps| {
            if let Some(module) = caps.name("req").or_else(|| caps.name("imp")) {
                usage.insert(module.as_str());
            }
            caps.get(0).map(|statement| Edit::remove(statement.range()))
        })
        .collect();
    (usage, edits)
}

/// Removes the polyfill imports from `code` and reports what they required.
pub fn extract_polyfill_imports(code: &str) -> (PolyfillUsage, String) {
    let (usage, edits) = polyfill_import_edits(code);
    (usage, apply_edits(code, &edits))
}

/// `core-js/modules/es.array.at.js` -> `core-js`, `@scope/pkg/x` -> `@scope/pkg`.
fn package_name(module: &str) -> &str {
    let mut parts = module.splitn(3, '/');
    let first = parts.next().unwrap_or(module);
    if first.starts_with('@') {
        match parts.next() {
            Some(second) => &module[..first.len() + 1 + second.len()],
            None => module,
        }
    } else {
        first
    }
}

/// The configured prelude scripts, read once per run.
#[derive(Debug, Clone, Default)]
pub struct PreludeSet {
    preludes: Vec<(PolyfillPrelude, String)>,
}

impl PreludeSet {
    /// Reads every configured prelude. A configured script that does not exist is an error.
    pub fn load(config: &BuildConfig) -> BuildResult<Self> {
        let mut preludes = Vec::with_capacity(config.polyfills.len());
        for prelude in &config.polyfills {
            let path: PathBuf = config.resolve(&prelude.script);
            let code = fs::read_to_string(&path).map_err(|err| BuildError::io(&path, err))?;
            log::debug!(
                "Polyfill prelude for {}: {} ({} bytes)",
                prelude.package,
                path.display(),
                code.len()
            );
            preludes.push((prelude.clone(), code));
        }
        Ok(Self { preludes })
    }

    /// Builds the prelude for `usage`, in configuration order.
    pub fn render(&self, usage: &PolyfillUsage) -> BuildResult<String> {
        for package in usage.packages() {
            if !self.preludes.iter().any(|(p, _)| p.package == package) {
                return Err(BuildError::MissingPolyfill {
                    package: package.to_string(),
                    module: usage.first_module(package).to_string(),
                });
            }
        }

        let mut prelude = String::new();
        for (config, code) in &self.preludes {
            if usage.contains(&config.package) {
                let code = TRAILING_MAP_COMMENT_RE.replace_all(code, "");
                prelude.push_str(code.trim_end());
                // Terminates a trailing expression so the next script cannot continue it
                prelude.push_str("\n;\n");
            }
        }
        Ok(prelude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BABEL_OUTPUT: &str = "\"use strict\";\n\nrequire(\"core-js/modules/es.array.at.js\");\nrequire(\"core-js/modules/es.string.replace-all.js\");\nrequire(\"regenerator-runtime/runtime.js\");\nrequire(\"core-js/modules/es.array.at.js\");\nvar SpessaSynthLib = function () {\n  return [1].at(-1);\n}();\n";

    #[test]
    fn test_extract_polyfill_imports() {
        let (usage, code) = extract_polyfill_imports(BABEL_OUTPUT);
        assert_eq!(
            usage.packages().collect::<Vec<_>>(),
            vec!["core-js", "regenerator-runtime"]
        );
        assert_eq!(usage.len(), 3);
        assert!(!code.contains("require("));
        assert!(code.contains("var SpessaSynthLib = function () {"));
        assert!(code.starts_with("\"use strict\";\n\n"));
    }

    #[test]
    fn test_extract_import_statements() {
        let (usage, code) =
            extract_polyfill_imports("import \"core-js/modules/es.array.at.js\";\nvar a = 1;\n");
        assert!(usage.contains("core-js"));
        assert_eq!(code, "var a = 1;\n");
    }

    #[test]
    fn test_nested_require_is_kept() {
        let source = "var m = require(\"./local.js\");\n";
        let (usage, code) = extract_polyfill_imports(source);
        assert!(usage.is_empty());
        assert_eq!(code, source);
    }

    #[test]
    fn test_relative_require_is_kept() {
        let source = "require(\"./side_effect.js\");\n";
        let (usage, code) = extract_polyfill_imports(source);
        assert!(usage.is_empty());
        assert_eq!(code, source);
    }

    #[test]
    fn test_package_name() {
        assert_eq!(package_name("core-js/modules/es.array.at.js"), "core-js");
        assert_eq!(package_name("regenerator-runtime"), "regenerator-runtime");
        assert_eq!(package_name("@babel/runtime/helpers/x"), "@babel/runtime");
    }

    fn prelude_set(entries: &[(&str, &str)]) -> PreludeSet {
        PreludeSet {
            preludes: entries
                .iter()
                .map(|(package, code)| {
                    (
                        PolyfillPrelude {
                            package: package.to_string(),
                            script: PathBuf::from(format!("{package}.js")),
                        },
                        code.to_string(),
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn test_render_only_used_packages_in_config_order() {
        let preludes = prelude_set(&[
            ("core-js", "var coreJs = 1\n//# sourceMappingURL=minified.js.map"),
            ("regenerator-runtime", "var regenerator = 1;"),
        ]);
        let (usage, _) = extract_polyfill_imports(
            "require(\"core-js/modules/es.array.at.js\");\nvar a = [1].at(0);\n",
        );
        assert_eq!(preludes.render(&usage).unwrap(), "var coreJs = 1\n;\n");
    }

    #[test]
    fn test_import_edits_cover_whole_statements() {
        let code = "\"use strict\";\n\nrequire(\"core-js/modules/es.array.at.js\");\nvar a = 1;\n";
        let (usage, edits) = polyfill_import_edits(code);
        assert!(usage.contains("core-js"));
        assert_eq!(edits.len(), 1);
        assert_eq!(
            &code[edits[0].range.clone()],
            "require(\"core-js/modules/es.array.at.js\");\n"
        );
        assert!(edits[0].text.is_empty());
    }

    #[test]
    fn test_missing_prelude_is_error() {
        let preludes = prelude_set(&[("core-js", "var coreJs;")]);
        let (usage, _) = extract_polyfill_imports("require(\"regenerator-runtime/runtime.js\");\n");
        let err = preludes.render(&usage).unwrap_err();
        assert!(matches!(
            err,
            BuildError::MissingPolyfill { ref package, ref module }
                if package == "regenerator-runtime" && module == "regenerator-runtime/runtime.js"
        ));
    }

    #[test]
    fn test_load_missing_script_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BuildConfig::default();
        config.root = dir.path().to_path_buf();
        assert!(matches!(
            PreludeSet::load(&config),
            Err(BuildError::Io { .. })
        ));
    }
}
