//! Keeping source maps in step with edits to generated code.
//!
//! Stages after Babel splice text into its output: polyfill imports are cut,
//! the worklet stub is replaced and the prelude goes in front. Each splice
//! moves the code that follows it, and [`remap`] moves the map's mappings the
//! same way.

use std::ops::Range;

use deno_ast::swc::sourcemap::{self, SourceMap, SourceMapBuilder};

/// One replacement in generated code: `range` of the old text becomes `text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub range: Range<usize>,
    pub text: String,
}

impl Edit {
    pub fn insert(at: usize, text: impl Into<String>) -> Self {
        Self {
            range: at..at,
            text: text.into(),
        }
    }

    pub fn remove(range: Range<usize>) -> Self {
        Self {
            range,
            text: String::new(),
        }
    }
}

/// Line and UTF-16 column, both 0-based, as source maps count them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Position {
    line: u32,
    col: u32,
}

struct LineIndex<'a> {
    text: &'a str,
    starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    fn new(text: &'a str) -> Self {
        let mut starts = vec![0];
        starts.extend(text.match_indices('\n').map(|(i, _)| i + 1));
        Self { text, starts }
    }

    fn position(&self, offset: usize) -> Position {
        let line = self.starts.partition_point(|&start| start <= offset) - 1;
        let col = self.text[self.starts[line]..offset].encode_utf16().count();
        Position {
            line: line as u32,
            col: col as u32,
        }
    }
}

/// Applies `edits` to `code`. Edits are sorted by start and do not overlap.
pub fn apply_edits(code: &str, edits: &[Edit]) -> String {
    let mut out = String::with_capacity(code.len());
    let mut last = 0;
    for edit in edits {
        out.push_str(&code[last..edit.range.start]);
        out.push_str(&edit.text);
        last = edit.range.end;
    }
    out.push_str(&code[last..]);
    out
}

/// Rewrites `map`, generated for `code`, to describe `code` after `edits`.
///
/// Mappings inside a replaced range are dropped. Mappings after it move with
/// the text they point at.
pub fn remap(map: &str, code: &str, edits: &[Edit]) -> Result<String, sourcemap::Error> {
    let map = SourceMap::from_slice(map.as_bytes())?;
    let edited = apply_edits(code, edits);
    let old = LineIndex::new(code);
    let new = LineIndex::new(&edited);

    let mut added = 0;
    let mut removed = 0;
    let bounds: Vec<(Position, Position, Position)> = edits
        .iter()
        .map(|edit| {
            let new_end = edit.range.start + added - removed + edit.text.len();
            added += edit.text.len();
            removed += edit.range.len();
            (
                old.position(edit.range.start),
                old.position(edit.range.end),
                new.position(new_end),
            )
        })
        .collect();

    let mut builder = SourceMapBuilder::new(map.get_file().cloned());
    for (idx, source) in map.sources().enumerate() {
        let id = builder.add_source(source.clone());
        builder.set_source_contents(id, map.get_source_contents(idx as u32).cloned());
    }
    for token in map.tokens() {
        let at = Position {
            line: token.get_dst_line(),
            col: token.get_dst_col(),
        };
        let Some(moved) = move_position(at, &bounds) else {
            continue;
        };
        builder.add(
            moved.line,
            moved.col,
            token.get_src_line(),
            token.get_src_col(),
            token.get_source().cloned(),
            token.get_name().cloned(),
            token.is_range(),
        );
    }

    let mut buf = Vec::new();
    builder.into_sourcemap().to_writer(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Where `at` lands after the edits described by `bounds` (old start, old end,
/// new end). `None` when an edit replaced it.
fn move_position(at: Position, bounds: &[(Position, Position, Position)]) -> Option<Position> {
    let mut moved = at;
    for (start, end, new_end) in bounds {
        if at < *start {
            break;
        }
        if at < *end {
            return None;
        }
        moved = if at.line == end.line {
            Position {
                line: new_end.line,
                col: new_end.col + (at.col - end.col),
            }
        } else {
            Position {
                line: at.line - end.line + new_end.line,
                col: at.col,
            }
        };
    }
    Some(moved)
}
