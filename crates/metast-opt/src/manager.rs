//! Pass scheduling

use crate::{AlgebraicSimplify, BranchPrune, ConstantFold, ConstantPropagation, DeadBindingElim, Inline, Pass};
use metast_error::CompileError;
use metast_ir::builder::node_count;
use metast_ir::{CancelToken, CompilationUnit, OptLevel};
use tracing::debug;

/// Upper bound on rounds before the manager stops looking for a fixpoint
pub const DEFAULT_MAX_ROUNDS: usize = 8;

/// Ordered list of passes run to a fixpoint
pub struct PassManager {
    passes: Vec<Box<dyn Pass>>,
    max_rounds: usize,
}

impl Default for PassManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PassManager {
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    /// Pipeline of an optimization level
    ///
    /// - `none`: no passes
    /// - `basic`: folding and branch pruning
    /// - `full`: inlining first, then every other pass
    pub fn for_level(level: OptLevel) -> Self {
        match level {
            OptLevel::None => Self::new(),
            OptLevel::Basic => Self::new().with_pass(ConstantFold).with_pass(BranchPrune),
            OptLevel::Full => Self::new()
                .with_pass(Inline::default())
                .with_pass(ConstantPropagation)
                .with_pass(ConstantFold)
                .with_pass(AlgebraicSimplify)
                .with_pass(BranchPrune)
                .with_pass(DeadBindingElim),
        }
    }

    pub fn with_pass(mut self, pass: impl Pass + 'static) -> Self {
        self.passes.push(Box::new(pass));
        self
    }

    pub fn with_max_rounds(mut self, rounds: usize) -> Self {
        self.max_rounds = rounds.max(1);
        self
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Runs every pass in order, repeating until a round changes nothing
    ///
    /// The input is never modified; on cancellation no partial result is
    /// returned.
    pub fn run(&self, unit: &CompilationUnit, cancel: &CancelToken) -> Result<CompilationUnit, CompileError> {
        let mut current = unit.clone();
        if self.passes.is_empty() {
            return Ok(current);
        }
        for round in 1..=self.max_rounds {
            let before = current.clone();
            for pass in &self.passes {
                if cancel.is_cancelled() {
                    debug!(pass = pass.name(), "optimization cancelled");
                    return Err(CompileError::Cancelled);
                }
                current = pass.run_unit(&current, cancel)?;
                debug!(
                    pass = pass.name(),
                    round,
                    nodes = current.roots().map(node_count).sum::<usize>(),
                    "pass finished"
                );
            }
            if current == before {
                debug!(rounds = round, "reached fixpoint");
                break;
            }
        }
        Ok(current)
    }
}

/// Optimizes `unit` at its configured level
pub fn optimize(unit: &CompilationUnit, cancel: &CancelToken) -> Result<CompilationUnit, CompileError> {
    PassManager::for_level(unit.options().opt_level).run(unit, cancel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use metast_ir::builder::*;
    use metast_ir::{CompileOptions, FunctionBuilder, Type, UnitBuilder};
    use pretty_assertions::assert_eq;

    fn unit_at(level: OptLevel, entry: metast_ir::Node) -> CompilationUnit {
        UnitBuilder::new("t")
            .input("x", Type::i64())
            .options(CompileOptions::default().with_opt_level(level))
            .build(entry)
            .unwrap()
    }

    #[test]
    fn test_none_is_identity() {
        let unit = unit_at(OptLevel::None, if_expr(boolean(true), i64(1), i64(2)).unwrap());
        let out = optimize(&unit, &CancelToken::new()).unwrap();
        assert_eq!(out, unit);
    }

    #[test]
    fn test_basic_reduces_if_to_literal() {
        let unit = unit_at(OptLevel::Basic, if_expr(boolean(true), i64(1), i64(2)).unwrap());
        let out = optimize(&unit, &CancelToken::new()).unwrap();
        assert_eq!(out.entry(), &i64(1));
    }

    #[test]
    fn test_basic_fold_then_prune_reaches_fixpoint() {
        // if 1 < 2 { 10 * 10 } else { x }
        let cond = lt(i64(1), i64(2)).unwrap();
        let then = mul(i64(10), i64(10)).unwrap();
        let unit = unit_at(OptLevel::Basic, if_expr(cond, then, var("x", Type::i64())).unwrap());
        let out = optimize(&unit, &CancelToken::new()).unwrap();
        assert_eq!(out.entry(), &i64(100));
    }

    #[test]
    fn test_full_inlines_and_folds() {
        let f = FunctionBuilder::new("twice", Type::i64()).param("n", Type::i64());
        let n = f.arg("n").unwrap();
        let twice = f.body(add(n.clone(), n).unwrap()).unwrap();
        let entry = call(twice.sig(), vec![i64(21)]).unwrap();
        let unit = UnitBuilder::new("t")
            .function(twice)
            .options(CompileOptions::default().with_opt_level(OptLevel::Full))
            .build(entry)
            .unwrap();
        let out = optimize(&unit, &CancelToken::new()).unwrap();
        assert_eq!(out.entry(), &i64(42));
    }

    #[test]
    fn test_idempotent_pipeline() {
        let x = var("x", Type::i64());
        let entry = let_in(
            "k",
            i64(2),
            add(mul(x, var("k", Type::i64())).unwrap(), add(i64(0), i64(0)).unwrap()).unwrap(),
        )
        .unwrap();
        let unit = unit_at(OptLevel::Full, entry);
        let token = CancelToken::new();
        let once = optimize(&unit, &token).unwrap();
        assert_eq!(once.entry().to_string(), "(mul x 2)");
        assert_eq!(optimize(&once, &token).unwrap(), once);
    }

    #[test]
    fn test_cancelled_before_start() {
        let unit = unit_at(OptLevel::Full, i64(1));
        let token = CancelToken::new();
        token.cancel();
        assert_eq!(optimize(&unit, &token), Err(CompileError::Cancelled));
    }

    #[test]
    fn test_level_pipelines() {
        assert!(PassManager::for_level(OptLevel::None).pass_names().is_empty());
        assert_eq!(
            PassManager::for_level(OptLevel::Basic).pass_names(),
            vec!["constant-fold", "branch-prune"]
        );
        assert_eq!(PassManager::for_level(OptLevel::Full).pass_names()[0], "inline");
    }
}
