//! metast-codegen - Code generation for the metast metalanguage
//!
//! Supports multiple backends:
//! - **Bytecode Backend**: portable MTBC stack bytecode, runnable in-process
//!   by `metast-runtime` (default)
//! - **JS Backend**: a restricted JavaScript subset with the same numeric
//!   semantics as the bytecode
//! - **Formula Backend**: spreadsheet formula text for loop-free programs
//!
//! Every backend lowers control flow to explicit constructs (jumps and
//! labels, or blocks with `break`) and reports node variants it has no rule
//! for as [`LoweringError::UnsupportedVariant`].
//!
//! # Example
//!
//! ```rust
//! use metast_codegen::{backend_for, Artifact};
//! use metast_ir::builder::*;
//! use metast_ir::{BackendKind, CancelToken, UnitBuilder};
//!
//! let unit = UnitBuilder::new("demo").build(if_expr(boolean(true), i64(1), i64(2))?)?;
//! let artifact = backend_for(BackendKind::Js).lower(&unit, &CancelToken::new()).unwrap();
//! assert!(artifact.as_text().unwrap().contains("function __entry()"));
//! # Ok::<(), metast_error::BuildError>(())
//! ```

pub mod bytecode;
pub mod formula_backend;
pub mod js_backend;

pub use bytecode::BytecodeBackend;
pub use formula_backend::FormulaBackend;
pub use js_backend::JsBackend;

use metast_error::LoweringError;
use metast_ir::{BackendKind, CancelToken, CompilationUnit, ExtensionNode, Node};
use tracing::debug;

/// Name of the generated function that evaluates the unit's entry node
pub const ENTRY_NAME: &str = "__entry";

/// Trait for code generation backends
pub trait CodeGen: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Lowers a checked unit; output is deterministic for a given unit
    fn lower(&self, unit: &CompilationUnit, cancel: &CancelToken) -> Result<Artifact, LoweringError>;
}

/// Output of a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    /// Text for an external toolchain
    Source { backend: BackendKind, text: String },
    /// MTBC module
    Bytecode { bytes: Vec<u8> },
}

impl Artifact {
    pub fn backend(&self) -> BackendKind {
        match self {
            Artifact::Source { backend, .. } => *backend,
            Artifact::Bytecode { .. } => BackendKind::Bytecode,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Artifact::Source { text, .. } => Some(text),
            Artifact::Bytecode { .. } => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Artifact::Source { text, .. } => text.as_bytes(),
            Artifact::Bytecode { bytes } => bytes,
        }
    }

    /// Whether the loader can run this artifact in-process
    pub fn is_executable(&self) -> bool {
        matches!(self, Artifact::Bytecode { .. })
    }
}

/// Backend implementing `kind`
pub fn backend_for(kind: BackendKind) -> Box<dyn CodeGen> {
    match kind {
        BackendKind::Bytecode => Box::new(BytecodeBackend::new()),
        BackendKind::Js => Box::new(JsBackend::new()),
        BackendKind::Formula => Box::new(FormulaBackend::new()),
    }
}

/// Lowers `unit` with the backend named in its options
pub fn lower(unit: &CompilationUnit, cancel: &CancelToken) -> Result<Artifact, LoweringError> {
    let backend = backend_for(unit.options().backend);
    debug!(unit = unit.name(), backend = backend.name(), "lowering");
    let artifact = backend.lower(unit, cancel)?;
    debug!(unit = unit.name(), bytes = artifact.len(), "lowered");
    Ok(artifact)
}

pub(crate) fn check_cancel(cancel: &CancelToken) -> Result<(), LoweringError> {
    if cancel.is_cancelled() {
        Err(LoweringError::Cancelled)
    } else {
        Ok(())
    }
}

pub(crate) fn unsupported(backend: BackendKind, node: &Node) -> LoweringError {
    LoweringError::UnsupportedVariant {
        backend: backend.name().to_string(),
        variant: node.variant_name(),
    }
}

/// Core-node equivalent of an extension node
///
/// Extensions without an expansion have no lowering rule in any backend.
pub(crate) fn expand_extension(
    backend: BackendKind,
    node: &Node,
    ext: &ExtensionNode,
) -> Result<Node, LoweringError> {
    match ext.payload().expand(ext.args()) {
        Some(Ok(expanded)) => Ok(expanded),
        Some(Err(err)) => Err(LoweringError::Unrepresentable {
            backend: backend.name().to_string(),
            detail: format!("expansion of `{}`: {}", ext.name(), err),
        }),
        None => Err(unsupported(backend, node)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metast_ir::builder::*;
    use metast_ir::{CompileOptions, UnitBuilder};

    #[test]
    fn test_backend_selection() {
        for kind in BackendKind::ALL {
            assert_eq!(backend_for(kind).kind(), kind);
        }
    }

    #[test]
    fn test_lower_uses_unit_options() {
        let unit = UnitBuilder::new("u")
            .options(CompileOptions::default().with_backend(BackendKind::Formula))
            .build(add(i64(1), i64(2)).unwrap())
            .unwrap();
        let artifact = lower(&unit, &CancelToken::new()).unwrap();
        assert_eq!(artifact.backend(), BackendKind::Formula);
        assert!(!artifact.is_executable());
    }

    #[test]
    fn test_cancelled_lowering() {
        let unit = UnitBuilder::new("u").build(i64(1)).unwrap();
        let token = CancelToken::new();
        token.cancel();
        for kind in BackendKind::ALL {
            assert_eq!(
                backend_for(kind).lower(&unit, &token),
                Err(LoweringError::Cancelled)
            );
        }
    }
}
