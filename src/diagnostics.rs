use std::fmt;

use thiserror::Error;

/// Represents a byte span within a source chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSpan {
    pub start: usize,
    pub end: usize,
}

impl SourceSpan {
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// Classification of a diagnostic event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticKind {
    Lexer,
    Parser,
    Runtime,
}

/// Rich diagnostic information surfaced to end users.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    pub span: Option<SourceSpan>,
    pub notes: Vec<String>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            span: None,
            notes: Vec::new(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::Runtime, message)
    }

    pub fn with_span(mut self, span: SourceSpan) -> Self {
        self.span = Some(span);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)?;
        if let Some(span) = self.span {
            write!(f, " ({}..{})", span.start, span.end)?;
        }
        if !self.notes.is_empty() {
            writeln!(f)?;
            for note in &self.notes {
                writeln!(f, "  note: {note}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostic {}

/// Unified error type for the Lunaria engine and tooling.
#[derive(Debug, Error)]
pub enum LunariaError {
    #[error("{0}")]
    Diagnostic(#[from] Diagnostic),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LunariaError>;

/// Failures surfaced by the value-proxy bridge.
///
/// Every bridge operation restores the Lua value stack to empty before
/// returning one of these, so a failed call never corrupts later calls
/// against the same state.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A host value has no Lua representation (or vice versa).
    #[error("value has no Lua representation")]
    Conversion,
    /// The key passed to an index operation could not cross the boundary.
    #[error("cannot convert key")]
    KeyConversion,
    /// A positional call argument could not cross the boundary.
    #[error("cannot convert argument #{0}")]
    ArgumentConversion(usize),
    /// The value passed to an index-assignment could not cross the boundary.
    #[error("cannot convert value")]
    ValueConversion,
    /// Index operation attempted on a value that supports no indexing.
    #[error("Lua value is not indexable")]
    NotIndexable,
    /// Index-assignment attempted on a value that is not a table.
    #[error("Lua value is not a table")]
    NotMutable,
    /// Call attempted on a value that is not a function.
    #[error("Lua value is not callable")]
    NotCallable,
    /// A registry slot was vacated behind the proxy's back.
    #[error("lost reference")]
    LostReference,
    /// A Lua compile or runtime failure, carrying the diagnostic text.
    #[error("{0}")]
    Execution(String),
}

pub type BridgeResult<T> = std::result::Result<T, BridgeError>;
