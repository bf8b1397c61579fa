//! Function inlining

use crate::pass::{transform, Pass, PassContext, Rewrite};
use metast_error::Result;
use metast_ir::builder::{cast, free_vars, fresh_name, let_in, node_count, rename, visit};
use metast_ir::{CompilationUnit, FunctionDef, Node, NodeKind};
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

/// Default size limit (in nodes) of an inlinable body
pub const DEFAULT_INLINE_THRESHOLD: usize = 32;

/// Replaces calls to small non-recursive functions by their body
///
/// Each parameter becomes a `let` around the body, bound to the argument
/// under a fresh name, so argument evaluation order and count are
/// unchanged. Calls exposed by an inlined body are inlined in turn.
#[derive(Debug, Clone, Copy)]
pub struct Inline {
    pub threshold: usize,
}

impl Default for Inline {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_INLINE_THRESHOLD,
        }
    }
}

impl Inline {
    pub fn with_threshold(threshold: usize) -> Self {
        Self { threshold }
    }

    fn candidates<'u>(&self, unit: &'u CompilationUnit) -> BTreeMap<&'u str, &'u FunctionDef> {
        let graph = call_graph(unit);
        unit.functions()
            .filter(|f| node_count(f.body()) <= self.threshold)
            .filter(|f| !reaches(&graph, f.name(), f.name()))
            .map(|f| (f.name(), f))
            .collect()
    }
}

impl Pass for Inline {
    fn name(&self) -> &'static str {
        "inline"
    }

    fn run(&self, node: &Node, ctx: &PassContext<'_>) -> Result<Node> {
        let candidates = self.candidates(ctx.unit);
        if candidates.is_empty() {
            return Ok(node.clone());
        }
        transform(node, &mut |n| {
            let NodeKind::Call { callee, args } = n.kind() else {
                return Ok(Rewrite::Keep);
            };
            let Some(def) = candidates.get(callee.name.as_str()) else {
                return Ok(Rewrite::Keep);
            };
            match expand_call(def, args)? {
                Some(expanded) => {
                    trace!(function = %callee.name, "inlined call");
                    Ok(Rewrite::Revisit(expanded))
                }
                None => Ok(Rewrite::Keep),
            }
        })
    }
}

/// `let p1' = a1 in ... let pn' = an in body[p/p']`
///
/// A fresh name avoids the free variables of every argument and every
/// other name in the body.
fn expand_call(def: &FunctionDef, args: &[Node]) -> Result<Option<Node>> {
    let mut avoid: BTreeSet<String> = args.iter().flat_map(free_vars).collect();
    let body_names = names_in(def.body());
    let mut body = def.body().clone();
    let mut bindings = Vec::new();
    for ((param, ty), arg) in def.params().zip(args) {
        let mut taken = avoid.clone();
        taken.extend(body_names.iter().filter(|n| *n != param).cloned());
        let fresh = fresh_name(param, &taken);
        avoid.insert(fresh.clone());
        body = rename(&body, param, &fresh)?;
        let value = if arg.ty() == ty {
            arg.clone()
        } else {
            // Subtype argument; only numeric widening can be made explicit
            match cast(arg.clone(), ty.clone()) {
                Ok(widened) => widened,
                Err(_) => return Ok(None),
            }
        };
        bindings.push((fresh, value));
    }
    let expanded = bindings
        .into_iter()
        .rev()
        .try_fold(body, |inner, (name, value)| let_in(name, value, inner))?;
    Ok(Some(expanded))
}

/// Every name read, written or bound in `node`
fn names_in(node: &Node) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    visit(node, &mut |n| match n.kind() {
        NodeKind::Var { name, .. } | NodeKind::Assign { name, .. } | NodeKind::Let { name, .. } => {
            names.insert(name.clone());
        }
        _ => {}
    });
    names
}

fn call_graph(unit: &CompilationUnit) -> BTreeMap<String, BTreeSet<String>> {
    unit.functions()
        .map(|f| {
            let mut callees = BTreeSet::new();
            visit(f.body(), &mut |n| {
                if let NodeKind::Call { callee, .. } = n.kind() {
                    callees.insert(callee.name.clone());
                }
            });
            (f.name().to_string(), callees)
        })
        .collect()
}

/// Whether `to` is reachable from `from` through at least one call
fn reaches(graph: &BTreeMap<String, BTreeSet<String>>, from: &str, to: &str) -> bool {
    let mut stack: Vec<&str> = graph.get(from).into_iter().flatten().map(String::as_str).collect();
    let mut seen = BTreeSet::new();
    while let Some(name) = stack.pop() {
        if name == to {
            return true;
        }
        if seen.insert(name) {
            stack.extend(graph.get(name).into_iter().flatten().map(String::as_str));
        }
    }
    false
}
