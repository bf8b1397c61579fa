//! Capability sets
//!
//! Passes and backends dispatch on what a node can do rather than on which
//! variant it is. A node advertises a [`Capabilities`] set and, for the
//! capabilities that carry behavior, exposes the matching interface
//! ([`Foldable`], [`ControlFlow`]).

use crate::node::Node;
use crate::value::Value;
use std::fmt;
use std::ops::BitOr;

/// Bit set of node capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Capabilities(u8);

impl Capabilities {
    pub const NONE: Self = Self(0);
    /// Evaluates to a constant when all operands are literals
    pub const FOLDABLE: Self = Self(1);
    /// Branches on a condition child
    pub const CONTROL_FLOW: Self = Self(1 << 1);
    /// Evaluation has no effect besides producing a value
    pub const PURE: Self = Self(1 << 2);
    /// Introduces, reads or writes a named binding
    pub const BINDING: Self = Self(1 << 3);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Capabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::FOLDABLE, "foldable"),
            (Self::CONTROL_FLOW, "control-flow"),
            (Self::PURE, "pure"),
            (Self::BINDING, "binding"),
        ];
        let present: Vec<&str> = names
            .iter()
            .filter(|(cap, _)| self.contains(*cap))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "{{{}}}", present.join(", "))
    }
}

/// Constant evaluation of a node given literal operands
pub trait Foldable {
    /// Returns `None` when the operands cannot be folded (e.g. division by zero)
    fn fold(&self, operands: &[Value]) -> Option<Value>;
}

/// Static resolution of a control-flow node
pub trait ControlFlow {
    /// Index of the condition among the node's children
    fn condition_index(&self) -> usize;

    /// Node that replaces this one when the condition is known
    fn resolve(&self, condition: bool, children: &[Node]) -> Option<Node>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_set() {
        let caps = Capabilities::FOLDABLE | Capabilities::PURE;
        assert!(caps.contains(Capabilities::FOLDABLE));
        assert!(caps.contains(Capabilities::PURE));
        assert!(!caps.contains(Capabilities::CONTROL_FLOW));
        assert!(caps.contains(Capabilities::NONE));
        assert_eq!(caps.to_string(), "{foldable, pure}");
        assert!(Capabilities::NONE.is_empty());
    }
}
