use std::path::PathBuf;

use crate::index::{IndexVec, simple_index};

pub mod ast;
pub mod intern;

#[derive(Debug)]
pub struct SourceFile {
    pub contents: String,
    pub origin: SourceFileOrigin,
}

impl SourceFile {
    pub fn value_of_span(&self, span: Span) -> &str {
        &self.contents[span.start..span.end]
    }

    /// One-based line and column of a byte offset
    pub fn line_and_column(&self, offset: usize) -> (usize, usize) {
        let offset = offset.min(self.contents.len());
        let before = &self.contents[..offset];

        let line = before.matches('\n').count() + 1;
        let column = match before.rfind('\n') {
            Some(newline) => before[newline + 1..].chars().count() + 1,
            None => before.chars().count() + 1,
        };

        (line, column)
    }
}

#[derive(Debug)]
pub enum SourceFileOrigin {
    Memory,
    File(PathBuf),
}

impl core::fmt::Display for SourceFileOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceFileOrigin::Memory => f.write_str("<memory>"),
            SourceFileOrigin::File(path) => f.write_fmt(format_args!("{}", path.display())),
        }
    }
}

simple_index! {
    /// Identifies a source file within a [`SourceMap`]
    pub struct SourceId;
}

/// Byte range inside one source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub source: SourceId,
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(source: SourceId, start: usize, end: usize) -> Self {
        Self { source, start, end }
    }

    /// Smallest span covering both `self` and `other`. Spans from different
    /// files keep `self`.
    pub fn to(self, other: Span) -> Span {
        if self.source != other.source {
            return self;
        }

        Span {
            source: self.source,
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// All files taking part in one compilation run
#[derive(Debug, Default)]
pub struct SourceMap {
    files: IndexVec<SourceId, SourceFile>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, file: SourceFile) -> SourceId {
        self.files.push(file)
    }

    pub fn add_memory(&mut self, contents: impl Into<String>) -> SourceId {
        self.add(SourceFile {
            contents: contents.into(),
            origin: SourceFileOrigin::Memory,
        })
    }

    pub fn get(&self, id: SourceId) -> Option<&SourceFile> {
        self.files.get(id)
    }

    /// Renders `origin:line:column` for the start of a span. Used for the
    /// location strings handed to runtime traps.
    pub fn format_span_position(&self, span: Span) -> String {
        match self.files.get(span.source) {
            Some(file) => {
                let (line, column) = file.line_and_column(span.start);
                format!("{}:{line}:{column}", file.origin)
            }
            None => format!("<unknown>:{}", span.start),
        }
    }
}
