//! Diagnostic - rustc-style error reports
//!
//! Every error of the crate converts into a [`Diagnostic`] carrying:
//! - Error code (EB002, EL001, etc.)
//! - Main message
//! - Notes and fix suggestions

use crate::{BuildError, CompileError, LoweringError, RuntimeError};
use std::fmt;

/// Diagnostic severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// Fatal error - prevents compilation
    Error,
    /// Warning - does not prevent compilation
    Warning,
    /// Note - additional information
    Note,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Error => "error",
            Level::Warning => "warning",
            Level::Note => "note",
        }
    }

    /// Returns the ANSI code for coloring (if terminal supports it)
    pub fn color_code(&self) -> &'static str {
        match self {
            Level::Error => "\x1b[1;31m",   // Bold Red
            Level::Warning => "\x1b[1;33m", // Bold Yellow
            Level::Note => "\x1b[1;36m",    // Bold Cyan
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Structured error code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode {
    /// Category (B = Build, L = Lowering, R = Runtime, C = Compile pipeline)
    pub category: char,
    /// Error number
    pub number: u16,
}

impl ErrorCode {
    pub const fn new(category: char, number: u16) -> Self {
        Self { category, number }
    }

    // Build errors
    pub const DUPLICATE_TYPE: Self = Self::new('B', 1);
    pub const TYPE_MISMATCH: Self = Self::new('B', 2);
    pub const ARITY: Self = Self::new('B', 3);
    pub const UNBOUND_NAME: Self = Self::new('B', 4);
    pub const UNKNOWN_TYPE: Self = Self::new('B', 5);
    pub const UNKNOWN_FUNCTION: Self = Self::new('B', 6);
    pub const DUPLICATE_FUNCTION: Self = Self::new('B', 7);
    pub const REGISTRY_FROZEN: Self = Self::new('B', 8);
    pub const NESTING_TOO_DEEP: Self = Self::new('B', 9);

    // Lowering errors
    pub const UNSUPPORTED_VARIANT: Self = Self::new('L', 1);
    pub const UNREPRESENTABLE: Self = Self::new('L', 2);
    pub const LOWERING_CANCELLED: Self = Self::new('L', 3);

    // Runtime errors
    pub const DIVISION_BY_ZERO: Self = Self::new('R', 1);
    pub const FUEL_EXHAUSTED: Self = Self::new('R', 2);
    pub const STACK_OVERFLOW: Self = Self::new('R', 3);
    pub const CALL_DEPTH: Self = Self::new('R', 4);
    pub const MALFORMED: Self = Self::new('R', 5);
    pub const MISSING_INPUT: Self = Self::new('R', 6);
    pub const INPUT_TYPE: Self = Self::new('R', 7);
    pub const NOT_EXECUTABLE: Self = Self::new('R', 8);
    pub const TIMEOUT: Self = Self::new('R', 9);
    pub const PANICKED: Self = Self::new('R', 10);
    pub const RUN_CANCELLED: Self = Self::new('R', 11);

    // Pipeline errors
    pub const CANCELLED: Self = Self::new('C', 1);
    pub const INVALID_PROGRAM: Self = Self::new('C', 2);
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{}{:03}", self.category, self.number)
    }
}

/// A complete diagnostic
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Severity level
    pub level: Level,
    /// Error code (optional)
    pub code: Option<ErrorCode>,
    /// Main message
    pub message: String,
    /// Additional notes
    pub notes: Vec<String>,
    /// Fix suggestions
    pub help: Vec<String>,
}

impl Diagnostic {
    /// Creates a new error
    pub fn error(message: impl Into<String>) -> Self {
        Self::with_level(Level::Error, message)
    }

    /// Creates a new warning
    pub fn warning(message: impl Into<String>) -> Self {
        Self::with_level(Level::Warning, message)
    }

    fn with_level(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            code: None,
            message: message.into(),
            notes: Vec::new(),
            help: Vec::new(),
        }
    }

    /// Sets the error code
    pub fn with_code(mut self, code: ErrorCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Adds a note
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Adds a fix suggestion
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help.push(help.into());
        self
    }
}

impl From<&BuildError> for Diagnostic {
    fn from(err: &BuildError) -> Self {
        let diagnostic = Diagnostic::error(err.to_string());
        match err {
            BuildError::DuplicateType { .. } => diagnostic
                .with_code(ErrorCode::DUPLICATE_TYPE)
                .with_help("pick a different name or reuse the existing shape"),
            BuildError::TypeMismatch { .. } => diagnostic
                .with_code(ErrorCode::TYPE_MISMATCH)
                .with_note("the node was rejected before entering any graph"),
            BuildError::Arity { .. } => diagnostic.with_code(ErrorCode::ARITY),
            BuildError::UnboundName { name } => diagnostic
                .with_code(ErrorCode::UNBOUND_NAME)
                .with_help(format!("bind `{}` with a `let` or declare it as an input", name)),
            BuildError::UnknownType { .. } => diagnostic.with_code(ErrorCode::UNKNOWN_TYPE),
            BuildError::UnknownFunction { .. } => diagnostic.with_code(ErrorCode::UNKNOWN_FUNCTION),
            BuildError::DuplicateFunction { .. } => {
                diagnostic.with_code(ErrorCode::DUPLICATE_FUNCTION)
            }
            BuildError::RegistryFrozen { .. } => diagnostic
                .with_code(ErrorCode::REGISTRY_FROZEN)
                .with_note("types must be defined before the registry is sealed"),
            BuildError::NestingTooDeep { .. } => diagnostic
                .with_code(ErrorCode::NESTING_TOO_DEEP)
                .with_help("split the expression with `let` bindings or helper functions"),
        }
    }
}

impl From<&LoweringError> for Diagnostic {
    fn from(err: &LoweringError) -> Self {
        let diagnostic = Diagnostic::error(err.to_string());
        match err {
            LoweringError::UnsupportedVariant { .. } => diagnostic
                .with_code(ErrorCode::UNSUPPORTED_VARIANT)
                .with_help("select a backend that supports this node, e.g. `bytecode`"),
            LoweringError::Unrepresentable { .. } => diagnostic.with_code(ErrorCode::UNREPRESENTABLE),
            LoweringError::Cancelled => diagnostic.with_code(ErrorCode::LOWERING_CANCELLED),
        }
    }
}

impl From<&RuntimeError> for Diagnostic {
    fn from(err: &RuntimeError) -> Self {
        let code = match err {
            RuntimeError::DivisionByZero => ErrorCode::DIVISION_BY_ZERO,
            RuntimeError::FuelExhausted { .. } => ErrorCode::FUEL_EXHAUSTED,
            RuntimeError::StackOverflow { .. } => ErrorCode::STACK_OVERFLOW,
            RuntimeError::CallDepthExceeded { .. } => ErrorCode::CALL_DEPTH,
            RuntimeError::Malformed(_) => ErrorCode::MALFORMED,
            RuntimeError::MissingInput { .. } => ErrorCode::MISSING_INPUT,
            RuntimeError::InputType { .. } => ErrorCode::INPUT_TYPE,
            RuntimeError::NotExecutable { .. } => ErrorCode::NOT_EXECUTABLE,
            RuntimeError::Timeout { .. } => ErrorCode::TIMEOUT,
            RuntimeError::Panicked(_) => ErrorCode::PANICKED,
            RuntimeError::Cancelled => ErrorCode::RUN_CANCELLED,
        };
        Diagnostic::error(err.to_string())
            .with_code(code)
            .with_note("the program compiled; this failure happened while running it")
    }
}

impl From<&CompileError> for Diagnostic {
    fn from(err: &CompileError) -> Self {
        match err {
            CompileError::Build(e) => e.into(),
            CompileError::Lowering(e) => e.into(),
            CompileError::Cancelled => {
                Diagnostic::error(err.to_string()).with_code(ErrorCode::CANCELLED)
            }
            CompileError::Program(_) => {
                Diagnostic::error(err.to_string()).with_code(ErrorCode::INVALID_PROGRAM)
            }
        }
    }
}

/// Renders a diagnostic for display
#[derive(Debug, Clone)]
pub struct DiagnosticRenderer {
    use_colors: bool,
}

impl Default for DiagnosticRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticRenderer {
    pub fn new() -> Self {
        Self { use_colors: true }
    }

    pub fn without_colors(mut self) -> Self {
        self.use_colors = false;
        self
    }

    /// Renders the diagnostic as a string
    pub fn render(&self, diagnostic: &Diagnostic) -> String {
        let mut output = String::new();

        // Line 1: error[EB001]: message
        let reset = if self.use_colors { "\x1b[0m" } else { "" };
        let color = if self.use_colors {
            diagnostic.level.color_code()
        } else {
            ""
        };
        let bold = if self.use_colors { "\x1b[1m" } else { "" };
        let green = if self.use_colors { "\x1b[1;32m" } else { "" };

        output.push_str(color);
        output.push_str(diagnostic.level.as_str());

        if let Some(code) = &diagnostic.code {
            output.push('[');
            output.push_str(&code.to_string());
            output.push(']');
        }

        output.push_str(reset);
        output.push_str(bold);
        output.push_str(": ");
        output.push_str(&diagnostic.message);
        output.push_str(reset);
        output.push('\n');

        for note in &diagnostic.notes {
            output.push_str(&format!("  = {}note{}: {}\n", bold, reset, note));
        }

        for help in &diagnostic.help {
            output.push_str(&format!("  = {}help{}: {}\n", green, reset, help));
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_display() {
        assert_eq!(ErrorCode::TYPE_MISMATCH.to_string(), "EB002");
        assert_eq!(ErrorCode::UNSUPPORTED_VARIANT.to_string(), "EL001");
        assert_eq!(ErrorCode::PANICKED.to_string(), "ER010");
    }

    #[test]
    fn test_diagnostic_rendering() {
        let err = LoweringError::UnsupportedVariant {
            backend: "formula".to_string(),
            variant: "loop".to_string(),
        };
        let diagnostic = Diagnostic::from(&err);

        let output = DiagnosticRenderer::new().without_colors().render(&diagnostic);

        assert!(output.starts_with("error[EL001]: backend `formula` has no lowering rule for `loop`"));
        assert!(output.contains("= help: select a backend"));
    }

    #[test]
    fn test_runtime_diagnostic_is_distinguishable() {
        let diagnostic = Diagnostic::from(&RuntimeError::DivisionByZero);
        assert_eq!(diagnostic.code, Some(ErrorCode::DIVISION_BY_ZERO));
        assert!(diagnostic.notes.iter().any(|n| n.contains("while running")));
    }
}
