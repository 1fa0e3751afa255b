//! Syntax audit against the legacy profile.
//!
//! Babel leaves some constructs untouched when it has no transform for them,
//! or when a project config targets a newer engine. The audit parses the
//! transpiled chunk and rejects anything the profile's engine cannot run.

use deno_ast::swc::ast::{
    ArrowExpr, BinExpr, BinaryOp, CallExpr, Callee, Expr, ForOfStmt, Function, MetaPropExpr,
    MetaPropKind, ModuleDecl, Regex as RegexLit, StaticBlock,
};
use deno_ast::swc::common::{Span, Spanned};
use deno_ast::swc::ecma_visit::{Visit, VisitWith};

use crate::artifact::Artifact;
use crate::config::LegacyProfile;
use crate::ecma::{parse_chunk, ParsedChunk};
use crate::error::{BuildError, BuildResult};

/// A construct and the first Chromium version that runs it in a classic script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Construct {
    name: &'static str,
    since: Option<u32>,
}

const MODULE_DECLARATION: Construct = Construct {
    name: "ES module declaration",
    since: None,
};
const IMPORT_META: Construct = Construct {
    name: "import.meta",
    since: None,
};
const DYNAMIC_IMPORT: Construct = Construct {
    name: "dynamic import()",
    since: None,
};
const TOP_LEVEL_AWAIT: Construct = Construct {
    name: "top-level await",
    since: None,
};
const STATIC_BLOCK: Construct = Construct {
    name: "class static block",
    since: Some(94),
};
const PRIVATE_IN: Construct = Construct {
    name: "private field `in` check",
    since: Some(91),
};
const REGEX_INDICES: Construct = Construct {
    name: "RegExp `d` flag",
    since: Some(90),
};
const REGEX_UNICODE_SETS: Construct = Construct {
    name: "RegExp `v` flag",
    since: Some(112),
};

/// Checks transpiled chunks against a [`LegacyProfile`].
#[derive(Debug, Clone, Copy)]
pub struct LegacyAudit {
    profile: LegacyProfile,
}

impl LegacyAudit {
    pub fn new(profile: LegacyProfile) -> Self {
        Self { profile }
    }

    /// Fails on the first construct the profile cannot run.
    pub fn check(&self, chunk: &Artifact) -> BuildResult<()> {
        let parsed = parse_chunk(&chunk.name, &chunk.code)?;
        let mut visitor = AuditVisitor {
            chrome: self.profile.chrome,
            function_depth: 0,
            violation: None,
        };
        parsed.program.visit_with(&mut visitor);

        match visitor.violation {
            Some((construct, span)) => Err(self.unsupported(&parsed, construct, span)),
            None => Ok(()),
        }
    }

    fn unsupported(&self, parsed: &ParsedChunk, construct: Construct, span: Span) -> BuildError {
        BuildError::UnsupportedSyntax {
            construct: construct.name.to_string(),
            profile: self.profile.to_string(),
            location: parsed.location(span),
        }
    }
}

struct AuditVisitor {
    chrome: u32,
    function_depth: usize,
    violation: Option<(Construct, Span)>,
}

impl AuditVisitor {
    fn flag(&mut self, construct: Construct, span: Span) {
        let supported = construct.since.is_some_and(|since| self.chrome >= since);
        if !supported && self.violation.is_none() {
            self.violation = Some((construct, span));
        }
    }
}

impl Visit for AuditVisitor {
    fn visit_module_decl(&mut self, decl: &ModuleDecl) {
        self.flag(MODULE_DECLARATION, decl.span());
        decl.visit_children_with(self);
    }

    fn visit_meta_prop_expr(&mut self, expr: &MetaPropExpr) {
        if expr.kind == MetaPropKind::ImportMeta {
            self.flag(IMPORT_META, expr.span);
        }
    }

    fn visit_call_expr(&mut self, call: &CallExpr) {
        if matches!(call.callee, Callee::Import(_)) {
            self.flag(DYNAMIC_IMPORT, call.span);
        }
        call.visit_children_with(self);
    }

    fn visit_function(&mut self, function: &Function) {
        self.function_depth += 1;
        function.visit_children_with(self);
        self.function_depth -= 1;
    }

    fn visit_arrow_expr(&mut self, arrow: &ArrowExpr) {
        self.function_depth += 1;
        arrow.visit_children_with(self);
        self.function_depth -= 1;
    }

    fn visit_expr(&mut self, expr: &Expr) {
        if let Expr::Await(await_expr) = expr {
            if self.function_depth == 0 {
                self.flag(TOP_LEVEL_AWAIT, await_expr.span);
            }
        }
        expr.visit_children_with(self);
    }

    fn visit_for_of_stmt(&mut self, stmt: &ForOfStmt) {
        if stmt.is_await && self.function_depth == 0 {
            self.flag(TOP_LEVEL_AWAIT, stmt.span);
        }
        stmt.visit_children_with(self);
    }

    fn visit_static_block(&mut self, block: &StaticBlock) {
        self.flag(STATIC_BLOCK, block.span);
        // Static blocks are function-like scopes for `await`
        self.function_depth += 1;
        block.visit_children_with(self);
        self.function_depth -= 1;
    }

    fn visit_bin_expr(&mut self, expr: &BinExpr) {
        if expr.op == BinaryOp::In && matches!(*expr.left, Expr::PrivateName(_)) {
            self.flag(PRIVATE_IN, expr.span);
        }
        expr.visit_children_with(self);
    }

    fn visit_regex(&mut self, regex: &RegexLit) {
        let flags: &str = &regex.flags;
        if flags.contains('d') {
            self.flag(REGEX_INDICES, regex.span);
        }
        if flags.contains('v') {
            self.flag(REGEX_UNICODE_SETS, regex.span);
        }
    }
}
