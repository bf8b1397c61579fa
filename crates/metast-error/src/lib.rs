//! metast-error - Errors and diagnostics for the metast metalanguage
//!
//! Errors are split by the phase that detects them so callers can tell
//! "the program is invalid" apart from "the program ran and failed":
//!
//! - [`BuildError`]: construction-time (type registry, node constructors,
//!   unit checking). Rejected nodes never enter a graph.
//! - [`LoweringError`]: a backend cannot lower a unit.
//! - [`RuntimeError`]: generated code failed while executing in-process.
//! - [`CompileError`]: everything the compile pipeline can fail with.
//!
//! # Example
//!
//! ```rust
//! use metast_error::{BuildError, Diagnostic, DiagnosticRenderer};
//!
//! let err = BuildError::TypeMismatch {
//!     context: "binary `+`".to_string(),
//!     expected: "i64".to_string(),
//!     found: "str".to_string(),
//! };
//!
//! let diagnostic = Diagnostic::from(&err);
//! let output = DiagnosticRenderer::new().without_colors().render(&diagnostic);
//! assert!(output.starts_with("error[EB002]"));
//! ```

pub mod diagnostic;

pub use diagnostic::{Diagnostic, DiagnosticRenderer, ErrorCode, Level};

use thiserror::Error;

/// Result type for construction-time operations
pub type Result<T> = std::result::Result<T, BuildError>;

/// Errors raised while defining types or constructing nodes and units
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("type `{name}` is already defined as `{existing}`, cannot redefine it as `{requested}`")]
    DuplicateType {
        name: String,
        existing: String,
        requested: String,
    },

    #[error("type mismatch in {context}: expected `{expected}`, found `{found}`")]
    TypeMismatch {
        context: String,
        expected: String,
        found: String,
    },

    #[error("`{variant}` expects {expected} children, found {found}")]
    Arity {
        variant: String,
        expected: String,
        found: usize,
    },

    #[error("unbound name `{name}`")]
    UnboundName { name: String },

    #[error("unknown type `{name}`")]
    UnknownType { name: String },

    #[error("unknown function `{name}`")]
    UnknownFunction { name: String },

    #[error("function `{name}` is defined more than once")]
    DuplicateFunction { name: String },

    #[error("type registry is sealed, cannot define `{name}`")]
    RegistryFrozen { name: String },

    #[error("expression nesting exceeds the limit of {limit} levels")]
    NestingTooDeep { limit: usize },
}

impl BuildError {
    pub fn mismatch(
        context: impl Into<String>,
        expected: impl ToString,
        found: impl ToString,
    ) -> Self {
        BuildError::TypeMismatch {
            context: context.into(),
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    pub fn arity(variant: impl Into<String>, expected: impl ToString, found: usize) -> Self {
        BuildError::Arity {
            variant: variant.into(),
            expected: expected.to_string(),
            found,
        }
    }
}

/// Errors raised by a backend while lowering a compilation unit
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoweringError {
    #[error("backend `{backend}` has no lowering rule for `{variant}`")]
    UnsupportedVariant { backend: String, variant: String },

    #[error("backend `{backend}` cannot represent {detail}")]
    Unrepresentable { backend: String, detail: String },

    #[error("lowering was cancelled")]
    Cancelled,
}

/// Errors raised while loading or executing generated code
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("division by zero")]
    DivisionByZero,

    #[error("execution ran out of fuel after {steps} steps")]
    FuelExhausted { steps: u64 },

    #[error("operand stack overflow (limit {limit})")]
    StackOverflow { limit: usize },

    #[error("call depth exceeded (limit {limit})")]
    CallDepthExceeded { limit: usize },

    #[error("malformed artifact: {0}")]
    Malformed(String),

    #[error("missing input `{name}`")]
    MissingInput { name: String },

    #[error("input `{name}` expects `{expected}`, found `{found}`")]
    InputType {
        name: String,
        expected: String,
        found: String,
    },

    #[error("artifact produced by `{backend}` cannot be executed in-process")]
    NotExecutable { backend: String },

    #[error("execution timed out after {millis} ms")]
    Timeout { millis: u64 },

    #[error("execution was cancelled")]
    Cancelled,

    #[error("generated code panicked: {0}")]
    Panicked(String),
}

/// Errors from the compile pipeline (check, optimize, lower)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Lowering(#[from] LoweringError),

    #[error("compilation was cancelled")]
    Cancelled,

    #[error("invalid program description: {0}")]
    Program(String),
}

/// Collection of diagnostics accumulated while checking a batch of units
#[derive(Debug, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.items.push(diagnostic);
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(|d| d.level == Level::Error)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    /// Renders all diagnostics
    pub fn render(&self, renderer: &DiagnosticRenderer) -> String {
        self.items
            .iter()
            .map(|d| renderer.render(d))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
