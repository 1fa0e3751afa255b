//! Parsing and printing JavaScript chunks with SWC.
//!
//! Chunks here are whole bundles that already went through a bundler or
//! Babel, so they are parsed as plain JavaScript (no TypeScript) and printed
//! without comments.

use std::collections::HashSet;

use deno_ast::swc::ast::{EsVersion, Id, Ident, Program};
use deno_ast::swc::atoms::Atom;
use deno_ast::swc::codegen::text_writer::JsWriter;
use deno_ast::swc::codegen::{Config as CodegenConfig, Emitter};
use deno_ast::swc::common::sync::Lrc;
use deno_ast::swc::common::Spanned;
use deno_ast::swc::common::{
    BytePos, FileName, Globals, LineCol, Mark, SourceMap, Span, SyntaxContext, GLOBALS,
};
use deno_ast::swc::ecma_visit::{Visit, VisitWith};
use deno_ast::swc::parser::lexer::Lexer;
use deno_ast::swc::parser::{EsSyntax, Parser, StringInput, Syntax};
use deno_ast::swc::sourcemap;
use deno_ast::swc::transforms::{hygiene, resolver};
use swc_ecma_transforms_base::rename::{renamer, Renamer};

use crate::error::{BuildError, BuildResult};

/// A parsed chunk and the source map its spans point into.
pub struct ParsedChunk {
    pub name: String,
    pub cm: Lrc<SourceMap>,
    pub program: Program,
}

impl ParsedChunk {
    /// `name:line:column` for a span, 1-based.
    pub fn location(&self, span: Span) -> String {
        let loc = self.cm.lookup_char_pos(span.lo);
        format!("{}:{}:{}", self.name, loc.line, loc.col.0 + 1)
    }
}

pub fn parse_chunk(name: &str, code: &str) -> BuildResult<ParsedChunk> {
    let cm: Lrc<SourceMap> = Default::default();
    let source_file = cm.new_source_file(FileName::Custom(name.to_string()).into(), code.to_string());

    let input = StringInput::from(&*source_file);
    let lexer = Lexer::new(
        Syntax::Es(EsSyntax::default()),
        EsVersion::latest(),
        input,
        None,
    );
    let mut parser = Parser::new_from(lexer);

    let program = parser.parse_program();
    let recovered = parser.take_errors();
    let chunk_error = |err: deno_ast::swc::parser::error::Error| {
        let loc = cm.lookup_char_pos(err.span().lo);
        BuildError::Parse {
            name: name.to_string(),
            message: format!(
                "{} at {}:{}:{}",
                err.kind().msg(),
                name,
                loc.line,
                loc.col.0 + 1
            ),
        }
    };

    let program = program.map_err(chunk_error)?;
    if let Some(err) = recovered.into_iter().next() {
        return Err(chunk_error(err));
    }

    Ok(ParsedChunk {
        name: name.to_string(),
        cm: cm.clone(),
        program,
    })
}

/// Prints a parsed chunk. With `minify` whitespace and comments are dropped.
pub fn print_chunk(chunk: &ParsedChunk, minify: bool) -> BuildResult<String> {
    emit(chunk, minify, None)
}

/// Prints a parsed chunk along with a source map for the printed code.
///
/// `input_map` describes the code the chunk was parsed from. The new map is
/// chained onto it, so it points at the same original sources.
pub fn print_chunk_with_map(
    chunk: &ParsedChunk,
    minify: bool,
    input_map: &str,
) -> BuildResult<(String, String)> {
    let orig = sourcemap::SourceMap::from_slice(input_map.as_bytes()).map_err(|err| {
        BuildError::Parse {
            name: chunk.name.clone(),
            message: format!("invalid source map: {err}"),
        }
    })?;

    let mut srcmap = Vec::new();
    let code = emit(chunk, minify, Some(&mut srcmap))?;

    let source_map_config = deno_ast::SourceMapConfig {
        inline_sources: false,
        maybe_base: None,
    };
    let mut buf = Vec::new();
    chunk
        .cm
        .build_source_map(&srcmap, Some(orig), source_map_config)
        .to_writer(&mut buf)
        .map_err(|err| BuildError::Parse {
            name: chunk.name.clone(),
            message: format!("failed to write source map: {err}"),
        })?;
    Ok((code, String::from_utf8_lossy(&buf).into_owned()))
}

fn emit(
    chunk: &ParsedChunk,
    minify: bool,
    srcmap: Option<&mut Vec<(BytePos, LineCol)>>,
) -> BuildResult<String> {
    let mut buf = Vec::new();
    {
        let cfg = CodegenConfig::default()
            .with_minify(minify)
            .with_target(EsVersion::Es2020)
            .with_omit_last_semi(false);

        let mut emitter = Emitter {
            cfg,
            cm: chunk.cm.clone(),
            comments: None,
            wr: Box::new(JsWriter::new(chunk.cm.clone(), "\n", &mut buf, srcmap)),
        };

        let emitted = match &chunk.program {
            Program::Module(module) => emitter.emit_module(module),
            Program::Script(script) => emitter.emit_script(script),
        };
        emitted.map_err(|err| BuildError::Parse {
            name: chunk.name.clone(),
            message: format!("failed to print: {err}"),
        })?;
    }

    String::from_utf8(buf).map_err(|err| BuildError::Parse {
        name: chunk.name.clone(),
        message: format!("printed code is not UTF-8: {err}"),
    })
}

/// Gives every binding below the top level a short name.
///
/// Top-level bindings of a classic script are globals other scripts can see
/// (`SpessaSynthLib` among them), so they keep their names. Scopes that call
/// `eval` are left alone.
pub fn mangle_chunk(chunk: ParsedChunk) -> ParsedChunk {
    let ParsedChunk { name, cm, program } = chunk;
    let program = GLOBALS.set(&Globals::new(), || {
        let unresolved_mark = Mark::new();
        let top_level_mark = Mark::new();
        let program = program.apply(resolver(unresolved_mark, top_level_mark, false));

        let mut top_level = TopLevelNames {
            ctxt: SyntaxContext::empty().apply_mark(top_level_mark),
            names: HashSet::new(),
        };
        program.visit_with(&mut top_level);
        let names = ShortNames {
            top_level: top_level.ctxt,
            top_level_names: top_level.names.into_iter().collect(),
        };

        program.apply(renamer(
            hygiene::Config {
                top_level_mark,
                ..Default::default()
            },
            names,
        ))
    });
    ParsedChunk { name, cm, program }
}

/// Words a generated name must not collide with.
const RESERVED: &[&str] = &[
    "do", "if", "in", "for", "let", "new", "try", "var", "case", "else", "enum", "eval", "null",
    "this", "true", "void", "with", "await", "break", "catch", "class", "const", "false", "super",
    "throw", "while", "yield", "delete", "export", "import", "public", "return", "static",
    "switch", "typeof", "default", "extends", "finally", "package", "private", "continue",
    "debugger", "function", "arguments", "interface", "protected", "implements", "instanceof",
    "undefined", "NaN", "Infinity",
];

const NAME_HEAD: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ$_";
const NAME_TAIL: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ$_0123456789";

/// The `n`th short identifier: `a`..`_`, then `aa`, `ba`, ...
fn short_name(mut n: usize) -> String {
    let mut name = String::new();
    name.push(NAME_HEAD[n % NAME_HEAD.len()] as char);
    n /= NAME_HEAD.len();
    while n > 0 {
        n -= 1;
        name.push(NAME_TAIL[n % NAME_TAIL.len()] as char);
        n /= NAME_TAIL.len();
    }
    name
}

/// Names bound at the top level. Generated names must not shadow them.
struct TopLevelNames {
    ctxt: SyntaxContext,
    names: HashSet<Atom>,
}

impl Visit for TopLevelNames {
    fn visit_ident(&mut self, ident: &Ident) {
        if ident.ctxt == self.ctxt {
            self.names.insert(ident.sym.clone());
        }
    }
}

struct ShortNames {
    top_level: SyntaxContext,
    top_level_names: Vec<Atom>,
}

impl Renamer for ShortNames {
    type Target = Atom;

    const MANGLE: bool = true;
    const RESET_N: bool = false;

    fn new_name_for(&self, _orig: &Id, n: &mut usize) -> Atom {
        loop {
            let name = short_name(*n);
            *n += 1;
            if !RESERVED.contains(&name.as_str()) {
                return name.into();
            }
        }
    }

    fn unresolved_symbols(&self) -> Vec<Atom> {
        self.top_level_names.clone()
    }

    fn preserve_name(&self, orig: &Id) -> bool {
        orig.1 == self.top_level
    }
}
