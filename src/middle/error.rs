//! Diagnostics produced while elaborating and lowering. Errors are fatal and
//! stop the run at the first occurrence, warnings are collected.

use strum::Display;
use thiserror::Error;

use crate::frontend::Span;

pub type SemanticResult<T> = Result<T, SemanticError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum SemanticErrorKind {
    UnknownIdentifier,
    AmbiguousIdentifier,
    TypeMismatch,
    ArityMismatch,
    DuplicateDeclaration,
    UninitializedUse,
    /// A constructor can finish without assigning a field
    UninitializedProperty,
    /// `return`, `break` or `continue` where it is not allowed
    IllegalControlTransfer,
    /// Nullable wrapping a type which is not an array or class
    IllegalNullable,
    IllegalCast,
    IllegalIsCheck,
    MissingElseBranch,
    UnresolvedType,
    /// A non-void function body whose end is reachable
    MissingReturn,
    IntegerLiteralOutOfRange,
    /// Assignment to something which is not a variable or field
    IllegalAssignment,
    IllegalOverride,
    CyclicInheritance,
    MissingEntryPoint,
    InvalidIntrinsicCall,
}

#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}{}", self.origin_suffix())]
pub struct SemanticError {
    pub kind: SemanticErrorKind,
    pub message: String,
    /// The first span is the primary location
    pub spans: Vec<Span>,
    /// Location in the compiler which raised the error
    #[cfg(feature = "error-backtrace")]
    pub raised_at: &'static core::panic::Location<'static>,
}

impl SemanticError {
    #[track_caller]
    pub fn new(kind: SemanticErrorKind, message: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            message: message.into(),
            spans: vec![span],
            #[cfg(feature = "error-backtrace")]
            raised_at: core::panic::Location::caller(),
        }
    }

    /// Adds a secondary location, for example the earlier declaration of a
    /// duplicate
    pub fn with_span(mut self, span: Span) -> Self {
        self.spans.push(span);
        self
    }

    pub fn primary_span(&self) -> Span {
        self.spans[0]
    }

    #[cfg(feature = "error-backtrace")]
    fn origin_suffix(&self) -> String {
        format!(" (raised at {})", self.raised_at)
    }

    #[cfg(not(feature = "error-backtrace"))]
    fn origin_suffix(&self) -> &'static str {
        ""
    }
}

impl PartialEq for SemanticError {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.message == other.message && self.spans == other.spans
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum WarningKind {
    /// The cast target is already satisfied by the static type
    RedundantCast,
    /// The `is` check is statically always true
    RedundantTypeCheck,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
    pub span: Span,
}

impl core::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Shorthand used throughout elaboration: `Err(error(kind, span, message))?`
#[track_caller]
pub fn error(kind: SemanticErrorKind, span: Span, message: impl Into<String>) -> SemanticError {
    SemanticError::new(kind, message, span)
}
