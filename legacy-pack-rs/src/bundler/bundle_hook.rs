//! Bundle hook for import.meta rewriting.
//!
//! The legacy engine runs classic scripts only, so `import.meta` cannot
//! survive bundling. Its properties are replaced with literals.

use deno_ast::swc::ast::{Bool, Expr, KeyValueProp, Lit, PropName, Str};
use deno_ast::swc::bundler::{Hook, ModuleRecord};
use deno_ast::swc::common::Span;

/// Rewrites `import.meta.url` to the module's file name and
/// `import.meta.main` to whether the module is the bundle entry.
pub struct BundleHook;

impl Hook for BundleHook {
    fn get_import_meta_props(
        &self,
        span: Span,
        module_record: &ModuleRecord,
    ) -> Result<Vec<KeyValueProp>, anyhow::Error> {
        Ok(vec![
            KeyValueProp {
                key: PropName::Ident("url".into()),
                value: Box::new(Expr::Lit(Lit::Str(Str {
                    span,
                    value: module_record.file_name.to_string().into(),
                    raw: None,
                }))),
            },
            KeyValueProp {
                key: PropName::Ident("main".into()),
                value: Box::new(Expr::Lit(Lit::Bool(Bool {
                    span,
                    value: module_record.is_entry,
                }))),
            },
        ])
    }
}
