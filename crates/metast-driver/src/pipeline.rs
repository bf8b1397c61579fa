//! Single-unit pipeline: optimize, then lower with the configured backend

use metast_codegen::Artifact;
use metast_error::{CompileError, LoweringError};
use metast_ir::{CancelToken, CompilationUnit};
use tracing::info;

/// Result of a successful compilation
#[derive(Debug, Clone)]
pub struct Compiled {
    /// The unit after the transform engine ran
    pub unit: CompilationUnit,
    pub artifact: Artifact,
}

/// Compiles `unit` at its own [`CompileOptions`](metast_ir::CompileOptions)
///
/// Cancellation is observed between passes and between functions during
/// lowering; a cancelled compilation yields [`CompileError::Cancelled`] and
/// no artifact.
pub fn compile(unit: &CompilationUnit, cancel: &CancelToken) -> Result<Compiled, CompileError> {
    let options = unit.options();
    let optimized = metast_opt::optimize(unit, cancel)?;
    let artifact = metast_codegen::lower(&optimized, cancel).map_err(|e| match e {
        LoweringError::Cancelled => CompileError::Cancelled,
        other => CompileError::Lowering(other),
    })?;
    info!(
        unit = unit.name(),
        backend = %options.backend,
        opt = %options.opt_level,
        size = artifact.len(),
        "compiled"
    );
    Ok(Compiled {
        unit: optimized,
        artifact,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use metast_ir::builder::*;
    use metast_ir::{BackendKind, CompileOptions, OptLevel, UnitBuilder};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_compile_folds_before_lowering() {
        let options = CompileOptions::new(BackendKind::Formula, OptLevel::Basic);
        let unit = UnitBuilder::new("u")
            .options(options)
            .build(if_expr(boolean(true), i64(1), i64(2)).unwrap())
            .unwrap();
        let compiled = compile(&unit, &CancelToken::new()).unwrap();
        assert_eq!(compiled.unit.entry(), &i64(1));
        assert_eq!(compiled.artifact.as_text(), Some("=1\n"));
    }

    #[test]
    fn test_cancelled_before_start() {
        let unit = UnitBuilder::new("u").build(i64(1)).unwrap();
        let token = CancelToken::new();
        token.cancel();
        assert_eq!(compile(&unit, &token).unwrap_err(), CompileError::Cancelled);
    }
}
