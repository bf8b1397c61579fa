//! Builder API
//!
//! One constructor per node variant, each delegating to [`Node::new`], plus
//! graph-to-graph combinators. Builders are pure: they only ever return new
//! nodes.
//!
//! # Example
//!
//! ```rust
//! use metast_ir::builder::*;
//! use metast_ir::Type;
//!
//! // let x = 2 in if x > 1 { x * 10 } else { 0 }
//! let x = var("x", Type::i64());
//! let body = if_expr(gt(x.clone(), i64(1))?, mul(x, i64(10))?, i64(0))?;
//! let program = let_in("x", i64(2), body)?;
//! assert_eq!(program.to_string(), "(let x 2 (if (gt x 1) (mul x 10) 0))");
//! # Ok::<(), metast_error::BuildError>(())
//! ```

use crate::extension::Extension;
use crate::node::{Arity, FnSig, Node, NodeKind};
use crate::ops::{BinaryOp, CompareOp, UnaryOp};
use crate::types::{Shape, Type};
use crate::value::Value;
use metast_error::{BuildError, Result};
use std::collections::BTreeSet;
use std::sync::Arc;

// =========================================
// Leaves
// =========================================

pub fn lit(value: impl Into<Value>) -> Node {
    Node::literal(value.into())
}

pub fn i32(v: i32) -> Node {
    lit(v)
}

pub fn i64(v: i64) -> Node {
    lit(v)
}

pub fn f64(v: f64) -> Node {
    lit(v)
}

pub fn boolean(v: bool) -> Node {
    lit(v)
}

pub fn str(s: &str) -> Node {
    lit(s)
}

pub fn unit() -> Node {
    Node::literal(Value::Unit)
}

/// Reference to a binding of declared type `ty`
///
/// Whether `name` is actually bound is checked when the enclosing
/// compilation unit is built.
pub fn var(name: impl Into<String>, ty: Type) -> Node {
    Node::var(name, ty)
}

// =========================================
// Operators
// =========================================

pub fn unary(op: UnaryOp, operand: Node) -> Result<Node> {
    Node::new(NodeKind::Unary { op, operand })
}

pub fn neg(operand: Node) -> Result<Node> {
    unary(UnaryOp::Neg, operand)
}

pub fn not(operand: Node) -> Result<Node> {
    unary(UnaryOp::Not, operand)
}

pub fn binary(op: BinaryOp, lhs: Node, rhs: Node) -> Result<Node> {
    Node::new(NodeKind::Binary { op, lhs, rhs })
}

pub fn add(lhs: Node, rhs: Node) -> Result<Node> {
    binary(BinaryOp::Add, lhs, rhs)
}

pub fn sub(lhs: Node, rhs: Node) -> Result<Node> {
    binary(BinaryOp::Sub, lhs, rhs)
}

pub fn mul(lhs: Node, rhs: Node) -> Result<Node> {
    binary(BinaryOp::Mul, lhs, rhs)
}

pub fn div(lhs: Node, rhs: Node) -> Result<Node> {
    binary(BinaryOp::Div, lhs, rhs)
}

pub fn rem(lhs: Node, rhs: Node) -> Result<Node> {
    binary(BinaryOp::Rem, lhs, rhs)
}

pub fn and(lhs: Node, rhs: Node) -> Result<Node> {
    binary(BinaryOp::And, lhs, rhs)
}

pub fn or(lhs: Node, rhs: Node) -> Result<Node> {
    binary(BinaryOp::Or, lhs, rhs)
}

pub fn compare(op: CompareOp, lhs: Node, rhs: Node) -> Result<Node> {
    Node::new(NodeKind::Compare { op, lhs, rhs })
}

pub fn eq(lhs: Node, rhs: Node) -> Result<Node> {
    compare(CompareOp::Eq, lhs, rhs)
}

pub fn lt(lhs: Node, rhs: Node) -> Result<Node> {
    compare(CompareOp::Lt, lhs, rhs)
}

pub fn le(lhs: Node, rhs: Node) -> Result<Node> {
    compare(CompareOp::Le, lhs, rhs)
}

pub fn gt(lhs: Node, rhs: Node) -> Result<Node> {
    compare(CompareOp::Gt, lhs, rhs)
}

pub fn cast(operand: Node, to: Type) -> Result<Node> {
    Node::new(NodeKind::Cast { to, operand })
}

// =========================================
// Control flow and bindings
// =========================================

pub fn if_expr(cond: Node, then_branch: Node, else_branch: Node) -> Result<Node> {
    Node::new(NodeKind::If { cond, then_branch, else_branch })
}

pub fn let_in(name: impl Into<String>, value: Node, body: Node) -> Result<Node> {
    Node::new(NodeKind::Let { name: name.into(), value, body })
}

pub fn assign(name: impl Into<String>, value: Node) -> Result<Node> {
    Node::new(NodeKind::Assign { name: name.into(), value })
}

pub fn loop_while(cond: Node, body: Node) -> Result<Node> {
    Node::new(NodeKind::Loop { cond, body })
}

pub fn seq(items: Vec<Node>) -> Result<Node> {
    Node::new(NodeKind::Seq(items))
}

pub fn call(callee: &FnSig, args: Vec<Node>) -> Result<Node> {
    Node::new(NodeKind::Call { callee: callee.clone(), args })
}

pub fn extension(payload: impl Extension + 'static, args: Vec<Node>) -> Result<Node> {
    Node::extension(Arc::new(payload), args)
}

pub fn extension_arc(payload: Arc<dyn Extension>, args: Vec<Node>) -> Result<Node> {
    Node::extension(payload, args)
}

// =========================================
// Graph combinators
// =========================================

/// Rebuilds `node` with each direct child replaced by `f(child)`
pub fn map_children<F>(node: &Node, mut f: F) -> Result<Node>
where
    F: FnMut(&Node) -> Result<Node>,
{
    let children = node
        .children()
        .into_iter()
        .map(&mut f)
        .collect::<Result<Vec<_>>>()?;
    node.with_children(children)
}

/// Recursive map over the AST: children first, then `f` on the rebuilt node
pub fn rewrite_bottom_up<F>(node: &Node, f: &mut F) -> Result<Node>
where
    F: FnMut(Node) -> Result<Node>,
{
    let rebuilt = map_children(node, |child| rewrite_bottom_up(child, f))?;
    f(rebuilt)
}

/// Pre-order, read-only walk
pub fn visit<F: FnMut(&Node)>(node: &Node, f: &mut F) {
    f(node);
    for child in node.children() {
        visit(child, f);
    }
}

pub fn node_count(node: &Node) -> usize {
    let mut count = 0;
    visit(node, &mut |_| count += 1);
    count
}

/// Names read or written in `node` that no enclosing `let` inside it binds
pub fn free_vars(node: &Node) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    collect_free(node, &mut Vec::new(), &mut out);
    out
}

fn collect_free(node: &Node, bound: &mut Vec<String>, out: &mut BTreeSet<String>) {
    match node.kind() {
        NodeKind::Var { name, .. } => {
            if !bound.contains(name) {
                out.insert(name.clone());
            }
        }
        NodeKind::Assign { name, value } => {
            if !bound.contains(name) {
                out.insert(name.clone());
            }
            collect_free(value, bound, out);
        }
        NodeKind::Let { name, value, body } => {
            collect_free(value, bound, out);
            bound.push(name.clone());
            collect_free(body, bound, out);
            bound.pop();
        }
        _ => {
            for child in node.children() {
                collect_free(child, bound, out);
            }
        }
    }
}

pub fn occurs_free(node: &Node, name: &str) -> bool {
    free_vars(node).contains(name)
}

/// Whether a free occurrence of `name` is the target of an `assign`
pub fn is_assigned(node: &Node, name: &str) -> bool {
    match node.kind() {
        NodeKind::Assign { name: target, value } => target == name || is_assigned(value, name),
        NodeKind::Let { name: bound, value, body } => {
            is_assigned(value, name) || (bound != name && is_assigned(body, name))
        }
        _ => node.children().into_iter().any(|c| is_assigned(c, name)),
    }
}

/// Returns `base`, or `base_N` for the first N not in `avoid`
pub fn fresh_name(base: &str, avoid: &BTreeSet<String>) -> String {
    if !avoid.contains(base) {
        return base.to_string();
    }
    (1..)
        .map(|n| format!("{}_{}", base, n))
        .find(|candidate| !avoid.contains(candidate))
        .unwrap_or_else(|| base.to_string())
}

/// Renames free occurrences (reads and writes) of `from` to `to`
pub fn rename(node: &Node, from: &str, to: &str) -> Result<Node> {
    match node.kind() {
        NodeKind::Var { name, ty } if name == from => Ok(var(to, ty.clone())),
        NodeKind::Assign { name, value } if name == from => assign(to, rename(value, from, to)?),
        NodeKind::Let { name, value, body } if name == from => {
            let value = rename(value, from, to)?;
            node.with_children(vec![value, body.clone()])
        }
        _ => map_children(node, |child| rename(child, from, to)),
    }
}

/// Replaces free reads of `name` with `replacement`
///
/// Capture-avoiding: an inner `let` that would capture a free variable of
/// the replacement is renamed first. Writes (`assign`) to `name` are left
/// untouched; callers check [`is_assigned`] before substituting.
pub fn substitute(node: &Node, name: &str, replacement: &Node) -> Result<Node> {
    let replacement_free = free_vars(replacement);
    subst(node, name, replacement, &replacement_free)
}

fn subst(node: &Node, name: &str, replacement: &Node, rfree: &BTreeSet<String>) -> Result<Node> {
    match node.kind() {
        NodeKind::Var { name: n, .. } if n == name => Ok(replacement.clone()),
        NodeKind::Let { name: bound, value, body } => {
            let value = subst(value, name, replacement, rfree)?;
            if bound == name || !occurs_free(body, name) {
                return node.with_children(vec![value, body.clone()]);
            }
            if rfree.contains(bound) {
                let mut avoid = free_vars(body);
                avoid.extend(rfree.iter().cloned());
                avoid.insert(name.to_string());
                let fresh = fresh_name(bound, &avoid);
                let body = rename(body, bound, &fresh)?;
                let body = subst(&body, name, replacement, rfree)?;
                return let_in(fresh, value, body);
            }
            let body = subst(body, name, replacement, rfree)?;
            node.with_children(vec![value, body])
        }
        _ => map_children(node, |child| subst(child, name, replacement, rfree)),
    }
}

fn reduce(op: BinaryOp, variant: &str, nodes: Vec<Node>) -> Result<Node> {
    let mut it = nodes.into_iter();
    let first = it
        .next()
        .ok_or_else(|| BuildError::arity(variant, Arity::AtLeast(1), 0))?;
    it.try_fold(first, |acc, next| binary(op, acc, next))
}

/// `a + b + c + ...`, left associative
pub fn sum(nodes: Vec<Node>) -> Result<Node> {
    reduce(BinaryOp::Add, "sum", nodes)
}

/// `a * b * c * ...`, left associative
pub fn product(nodes: Vec<Node>) -> Result<Node> {
    reduce(BinaryOp::Mul, "product", nodes)
}

/// Conjunction; `true` when empty
pub fn all(nodes: Vec<Node>) -> Result<Node> {
    if nodes.is_empty() {
        return Ok(boolean(true));
    }
    reduce(BinaryOp::And, "all", nodes)
}

/// Disjunction; `false` when empty
pub fn any(nodes: Vec<Node>) -> Result<Node> {
    if nodes.is_empty() {
        return Ok(boolean(false));
    }
    reduce(BinaryOp::Or, "any", nodes)
}

/// First matching case wins: `if c1 { v1 } else if c2 { v2 } ... else { default }`
pub fn select(cases: Vec<(Node, Node)>, default: Node) -> Result<Node> {
    cases
        .into_iter()
        .rev()
        .try_fold(default, |otherwise, (cond, value)| if_expr(cond, value, otherwise))
}

/// `stmts...; result`
pub fn block(mut stmts: Vec<Node>, result: Node) -> Result<Node> {
    if stmts.is_empty() {
        return Ok(result);
    }
    stmts.push(result);
    seq(stmts)
}

/// Counted loop: `let i = start; while i < end { body; i = i + 1 }`
///
/// `body` may read `i` as `var(name, start.ty())`. Evaluates to unit.
pub fn count_loop(name: &str, start: Node, end: Node, body: Node) -> Result<Node> {
    let ty = start.ty().clone();
    let one = match ty.shape() {
        Shape::I32 => i32(1),
        Shape::I64 => i64(1),
        _ => return Err(BuildError::mismatch("count_loop start", "i32 or i64", &ty)),
    };
    let counter = var(name, ty);
    let step = assign(name, add(counter.clone(), one)?)?;
    let looped = loop_while(lt(counter, end)?, seq(vec![body, step])?)?;
    let_in(name, start, looped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn x() -> Node {
        var("x", Type::i64())
    }

    #[test]
    fn test_valid_construction() {
        let node = if_expr(boolean(true), i64(1), i64(2)).unwrap();
        assert_eq!(node.ty(), &Type::i64());
        let node = add(f64(1.0), f64(2.0)).unwrap();
        assert_eq!(node.ty(), &Type::f64());
        let node = loop_while(boolean(false), unit()).unwrap();
        assert_eq!(node.ty(), &Type::unit());
    }

    #[test]
    fn test_mismatch_rejected() {
        let op = BinaryOp::from_symbol("+").unwrap();
        let err = binary(op, i64(1), str("a")).unwrap_err();
        assert!(matches!(err, BuildError::TypeMismatch { .. }));
    }

    #[test]
    fn test_map_children() {
        let node = add(i64(1), i64(2)).unwrap();
        let doubled = map_children(&node, |c| mul(c.clone(), i64(2))).unwrap();
        assert_eq!(doubled.to_string(), "(add (mul 1 2) (mul 2 2))");
    }

    #[test]
    fn test_rewrite_bottom_up() {
        // Replace every i64 literal n with n + 1
        let node = sub(i64(10), mul(i64(2), i64(3)).unwrap()).unwrap();
        let bumped = rewrite_bottom_up(&node, &mut |n: Node| match n.as_literal() {
            Some(Value::I64(v)) => Ok(i64(v + 1)),
            _ => Ok(n),
        })
        .unwrap();
        assert_eq!(bumped.to_string(), "(sub 11 (mul 3 4))");
    }

    #[test]
    fn test_free_vars_respect_let() {
        let node = let_in("x", i64(1), add(x(), var("y", Type::i64())).unwrap()).unwrap();
        let free: Vec<String> = free_vars(&node).into_iter().collect();
        assert_eq!(free, vec!["y".to_string()]);
    }

    #[test]
    fn test_substitute_stops_at_shadowing() {
        let inner = let_in("x", i64(5), x()).unwrap();
        let node = add(x(), inner).unwrap();
        let out = substitute(&node, "x", &i64(9)).unwrap();
        assert_eq!(out.to_string(), "(add 9 (let x 5 x))");
    }

    #[test]
    fn test_substitute_avoids_capture() {
        // (let y 1 (add x y)) with x := y must not capture the outer y
        let y = var("y", Type::i64());
        let node = let_in("y", i64(1), add(x(), y.clone()).unwrap()).unwrap();
        let out = substitute(&node, "x", &y).unwrap();
        assert_eq!(out.to_string(), "(let y_1 1 (add y y_1))");
    }

    #[test]
    fn test_is_assigned() {
        let node = seq(vec![assign("x", i64(1)).unwrap(), x()]).unwrap();
        assert!(is_assigned(&node, "x"));
        let shadowed = let_in("x", i64(0), node).unwrap();
        assert!(!is_assigned(&shadowed, "x"));
    }

    #[test]
    fn test_select() {
        let node = select(
            vec![(lt(x(), i64(0)).unwrap(), str("neg")), (eq(x(), i64(0)).unwrap(), str("zero"))],
            str("pos"),
        )
        .unwrap();
        assert_eq!(node.to_string(), "(if (lt x 0) \"neg\" (if (eq x 0) \"zero\" \"pos\"))");
    }

    #[test]
    fn test_sum_and_empty() {
        let node = sum(vec![i64(1), i64(2), i64(3)]).unwrap();
        assert_eq!(node.to_string(), "(add (add 1 2) 3)");
        assert!(matches!(sum(vec![]), Err(BuildError::Arity { .. })));
        assert_eq!(all(vec![]).unwrap(), boolean(true));
    }

    #[test]
    fn test_count_loop() {
        let node = count_loop("i", i64(0), i64(3), unit()).unwrap();
        assert_eq!(node.ty(), &Type::unit());
        assert_eq!(
            node.to_string(),
            "(let i 0 (loop (lt i 3) (seq () (set i (add i 1)))))"
        );
        assert!(count_loop("i", f64(0.0), f64(1.0), unit()).is_err());
    }

    #[test]
    fn test_node_count() {
        let node = add(i64(1), mul(i64(2), i64(3)).unwrap()).unwrap();
        assert_eq!(node_count(&node), 5);
    }
}
