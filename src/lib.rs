//! Symbolic expression graphs for dynamic-system models.
//!
//! This crate represents algebraic expressions over model quantities as
//! explicit node/edge graphs and compiles them into numeric callables. It
//! builds on [ndarray](https://github.com/rust-ndarray/ndarray) for numeric
//! containers and
//! [Cranelift](https://github.com/bytecodealliance/wasmtime/tree/main/cranelift)
//! for native code generation.
//!
//! # Features
//!
//! - Expression graphs with leaf deduplication, graph merging and shape
//!   inference
//! - Variables, block parameters and time-varying signal references as
//!   leaf symbols, with identity managed by an arena
//! - Free-symbol extraction and temporal classification
//! - Direct and partial numeric evaluation
//! - Compilation into interpreter closures or JIT-compiled native code
//!
//! # Example
//!
//! ```rust
//! use symgraph::backends::InterpBackend;
//! use symgraph::graph::{add, mul};
//! use symgraph::lambdify::{lambdify, Argument};
//! use symgraph::{Context, Value};
//!
//! let mut ctx = Context::new();
//! let x = ctx.variable("x");
//! let y = ctx.variable("y");
//!
//! // 2*x + y^2 as an explicit graph
//! let graph = add(mul(2.0, &x), mul(&y, &y));
//!
//! let mut backend = InterpBackend::new(ctx.ops().clone());
//! let f = lambdify(
//!     &ctx,
//!     &mut backend,
//!     &graph,
//!     &[Argument::Single(x.into()), Argument::Single(y.into())],
//!     "f",
//! )
//! .unwrap();
//!
//! let result = f(&[Value::Scalar(1.0), Value::Scalar(2.0)]).unwrap();
//! assert_eq!(result, Value::Scalar(6.0));
//! ```

pub use context::Context;
pub use graph::{Algebraic, Bindings, ExpressionGraph};
pub use shape::Shape;
pub use value::Value;

pub mod prelude {
    pub use crate::backends::{Backend, InterpBackend, JitBackend};
    pub use crate::context::Context;
    pub use crate::graph::{add, div, matmul, mul, neg, pow, sub, transpose};
    pub use crate::graph::{Algebraic, Bindings, ExpressionGraph};
    pub use crate::lambdify::{lambdify, Argument};
    pub use crate::ops::Op;
    pub use crate::shape::Shape;
    pub use crate::symbols::{Leaf, Parameter, SignalReference, Variable};
    pub use crate::value::Value;
}

/// Arena ownership of blocks and ports with stable handles
pub mod arena;
/// Backend collaborators and the two shipped backends
pub mod backends;
/// Registry for converting foreign numeric types
pub mod casts;
/// Engine-wide state: registries, arena, the time variable
pub mod context;
/// Error types for the various failure modes
pub mod errors;
/// The node/edge graph representation and builder functions
pub mod graph;
/// Compilation of graphs into backend callables
pub mod lambdify;
/// Operators, arities and the extension-operator registry
pub mod ops;
/// Shapes and shape-inference rules
pub mod shape;
/// Leaf symbol types and the block/port contracts
pub mod symbols;
/// Numeric values: scalars, vectors and matrices
pub mod value;
