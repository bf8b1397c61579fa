//! Static branch resolution

use crate::pass::{literal_bool, transform, Pass, PassContext, Rewrite};
use metast_error::Result;
use metast_ir::Node;

/// Resolves control-flow nodes whose condition is a literal
///
/// `if` collapses to the chosen branch and a loop whose condition is
/// `false` collapses to unit. Dispatch goes through the control-flow
/// capability, so extension nodes that implement it are pruned as well.
#[derive(Debug, Default, Clone, Copy)]
pub struct BranchPrune;

impl Pass for BranchPrune {
    fn name(&self) -> &'static str {
        "branch-prune"
    }

    fn run(&self, node: &Node, _ctx: &PassContext<'_>) -> Result<Node> {
        transform(node, &mut |n| Ok(prune_node(n)))
    }
}

fn prune_node(node: &Node) -> Rewrite {
    let Some(flow) = node.control_flow() else {
        return Rewrite::Keep;
    };
    let children: Vec<Node> = node.children().into_iter().cloned().collect();
    let resolved = children
        .get(flow.condition_index())
        .and_then(literal_bool)
        .and_then(|condition| flow.resolve(condition, &children))
        .filter(|replacement| replacement.ty() == node.ty());
    match resolved {
        Some(replacement) => Rewrite::Replace(replacement),
        None => Rewrite::Keep,
    }
}
