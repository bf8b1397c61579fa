//! metast-ir - Typed IR of the metast metalanguage
//!
//! Programs are graphs of immutable, typed nodes built from ordinary Rust
//! calls. The IR:
//! - Validates arity and typing at construction, so ill-typed nodes never exist
//! - Describes what each node can do through capability sets
//! - Accepts new node kinds through extension payloads
//! - Pins numeric semantics in one place ([`ops`])
//!
//! # Architecture
//!
//! ```text
//!   TypeRegistry (define_type / is_subtype)
//!         ↓
//!   Builder API (lit, add, if_expr, let_in, ...)
//!         ↓
//!   Node graph
//!   ├── NodeKind (closed variant set)
//!   ├── Capabilities (foldable, control-flow, pure, binding)
//!   └── Extension payloads
//!         ↓
//!   CompilationUnit
//!   ├── Functions
//!   ├── Entry node
//!   ├── Inputs (Environment)
//!   └── CompileOptions
//!         ↓
//!    [Transform / Lowering]
//! ```

pub mod builder;
pub mod cancel;
pub mod capability;
pub mod env;
pub mod extension;
pub mod node;
pub mod ops;
pub mod types;
pub mod unit;
pub mod value;

pub use cancel::CancelToken;
pub use capability::{Capabilities, ControlFlow, Foldable};
pub use env::{Binding, Environment};
pub use extension::{Extension, ExtensionNode};
pub use node::{Arity, FnSig, Node, NodeKind, NodeTag};
pub use ops::{cast_type, cast_value, BinaryOp, CompareOp, UnaryOp};
pub use types::{is_subtype, types_equal, Shape, Type, TypeRegistry};
pub use unit::{
    BackendKind, CompilationUnit, CompileOptions, FunctionBuilder, FunctionDef, OptLevel,
    UnitBuilder, MAX_NESTING,
};
pub use value::Value;
