//! Pass trait and the generic traversal engine

use metast_error::{CompileError, Result};
use metast_ir::builder::{map_children, visit};
use metast_ir::{BinaryOp, CancelToken, CompilationUnit, Node, NodeKind, Value};
use tracing::trace;

/// Outcome of a rewrite rule on a single node
#[derive(Debug, Clone)]
pub enum Rewrite {
    /// Leave the node as is
    Keep,
    /// Substitute the node; the replacement is not traversed again
    Replace(Node),
    /// Substitute the node and run the traversal over the replacement
    Revisit(Node),
}

/// Post-order traversal: children first, then `rule` on the rebuilt node
///
/// Nodes whose children did not change keep their identity, so a rule
/// that always answers `Keep` returns the input handle.
pub fn transform<F>(node: &Node, rule: &mut F) -> Result<Node>
where
    F: FnMut(&Node) -> Result<Rewrite>,
{
    let rebuilt = map_children(node, |child| transform(child, rule))?;
    match rule(&rebuilt)? {
        Rewrite::Keep => Ok(rebuilt),
        Rewrite::Replace(replacement) => {
            trace!(from = %rebuilt, to = %replacement, "rewrite");
            Ok(replacement)
        }
        Rewrite::Revisit(replacement) => {
            trace!(from = %rebuilt, to = %replacement, "rewrite (revisit)");
            transform(&replacement, rule)
        }
    }
}

/// Read-only view of the unit a pass is running over
#[derive(Debug, Clone, Copy)]
pub struct PassContext<'a> {
    pub unit: &'a CompilationUnit,
}

impl<'a> PassContext<'a> {
    pub fn new(unit: &'a CompilationUnit) -> Self {
        Self { unit }
    }
}

/// A pure graph-to-graph transformation
///
/// Implementations must be idempotent and leave nodes they have no rule
/// for untouched.
pub trait Pass: Send + Sync {
    fn name(&self) -> &'static str;

    /// Rewrites one root (a function body or the entry)
    fn run(&self, node: &Node, ctx: &PassContext<'_>) -> Result<Node>;

    /// Rewrites every function body and the entry of `unit`
    ///
    /// Polls `cancel` between roots.
    fn run_unit(
        &self,
        unit: &CompilationUnit,
        cancel: &CancelToken,
    ) -> std::result::Result<CompilationUnit, CompileError> {
        let ctx = PassContext::new(unit);
        let mut functions = Vec::new();
        for def in unit.functions() {
            if cancel.is_cancelled() {
                return Err(CompileError::Cancelled);
            }
            let body = self.run(def.body(), &ctx)?;
            functions.push(def.with_body(body)?);
        }
        if cancel.is_cancelled() {
            return Err(CompileError::Cancelled);
        }
        let entry = self.run(unit.entry(), &ctx)?;
        Ok(unit.with_bodies(functions, entry)?)
    }
}

/// Whether evaluating `node` can be skipped without changing behavior
///
/// Requires the node to be pure and free of integer division by anything
/// other than a non-zero literal.
pub fn is_discardable(node: &Node) -> bool {
    if !node.is_pure() {
        return false;
    }
    let mut may_trap = false;
    visit(node, &mut |n| {
        if let NodeKind::Binary { op: BinaryOp::Div | BinaryOp::Rem, rhs, .. } = n.kind() {
            let safe_divisor = matches!(rhs.as_literal(), Some(v) if !v.is_zero());
            if rhs.ty().is_integer() && !safe_divisor {
                may_trap = true;
            }
        }
    });
    !may_trap
}

pub(crate) fn literal_bool(node: &Node) -> Option<bool> {
    match node.as_literal() {
        Some(Value::Bool(b)) => Some(*b),
        _ => None,
    }
}
