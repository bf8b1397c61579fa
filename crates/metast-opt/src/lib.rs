//! metast-opt - Transform engine for the metast IR
//!
//! Passes are pure functions from graphs to graphs. They dispatch on node
//! capabilities rather than on variants wherever they can, so extension
//! nodes take part in folding and pruning without changes here.
//!
//! # Pipeline
//!
//! ```text
//!   CompilationUnit
//!         ↓
//!   PassManager (per OptLevel, repeated to a fixpoint)
//!   ├── Inline                (full)
//!   ├── ConstantPropagation   (full)
//!   ├── ConstantFold          (basic, full)
//!   ├── AlgebraicSimplify     (full)
//!   ├── BranchPrune           (basic, full)
//!   └── DeadBindingElim       (full)
//!         ↓
//!   CompilationUnit (optimized)
//! ```

pub mod dce;
pub mod fold;
pub mod inline;
pub mod manager;
pub mod pass;
pub mod propagate;
pub mod prune;
pub mod simplify;

pub use dce::DeadBindingElim;
pub use fold::ConstantFold;
pub use inline::Inline;
pub use manager::{optimize, PassManager};
pub use pass::{is_discardable, transform, Pass, PassContext, Rewrite};
pub use propagate::ConstantPropagation;
pub use prune::BranchPrune;
pub use simplify::AlgebraicSimplify;
