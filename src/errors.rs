//! Error types for the symgraph crate.
//!
//! Each stage of the engine has its own error enum:
//!
//! - `ShapeError`: a shape-inference rule rejected its argument shapes
//! - `RegistryError`: duplicate operator or caster registration (fatal at startup)
//! - `CastError`: no or no unique converter for a foreign value
//! - `ArenaError`: invalid block/port handles or parameter lookups
//! - `EvalError`: direct numeric evaluation of a graph failed
//! - `LambdifyError`: compilation of a graph into a callable failed
//! - `BackendError`: a backend collaborator rejected or failed a request
//!
//! All errors are raised synchronously to the immediate caller; nothing is
//! retried or recovered internally.

use thiserror::Error;

use crate::shape::Shape;

/// Errors produced by shape-inference rules.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
    /// Arguments to a broadcasting operator were neither equal nor scalar
    #[error("incompatible shapes: {lhs} and {rhs}")]
    Incompatible { lhs: Shape, rhs: Shape },
    /// Matrix product inner dimensions did not match
    #[error("matrix product dimension mismatch: {lhs} by {rhs}")]
    InnerDimension { lhs: Shape, rhs: Shape },
    /// A rule that requires a matrix shape was given something else
    #[error("expected a matrix shape, got {0}")]
    NotAMatrix(Shape),
    /// A shape rule was invoked without arguments
    #[error("shape rule applied to an empty argument list")]
    NoArguments,
    /// An operator was applied to the wrong number of arguments
    #[error("operator {op} expects {expected} arguments, got {got}")]
    Arity {
        op: String,
        expected: usize,
        got: usize,
    },
}

/// Errors raised at registration time.
///
/// These are configuration errors and are intended to abort at startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// An extension operator was registered twice under the same name
    #[error("operator {0:?} is already registered")]
    DuplicateOperator(String),
    /// A caster was registered twice for the same (from, to) pair
    #[error("cast from {from} to {to} is already defined")]
    DuplicateCast {
        from: &'static str,
        to: &'static str,
    },
}

/// Errors raised when casting foreign values into graph-embeddable form.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CastError {
    /// No converter is registered for the value's type
    #[error("don't know how to cast {0}")]
    UnknownCast(String),
    /// No target type was given and more than one converter is registered
    #[error("don't know how to uniquely cast from {0}")]
    AmbiguousCast(String),
}

/// Errors raised by block/port arena lookups.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArenaError {
    /// The block handle does not refer to a live arena entry
    #[error("unknown block handle: {0}")]
    UnknownBlock(u64),
    /// The port handle does not refer to a live arena entry
    #[error("unknown port handle: {0}")]
    UnknownPort(u64),
    /// A parameter index was outside the block's valid range
    #[error("invalid parameter index {index}: expected a number between 0 and {len}")]
    InvalidParameterIndex { index: usize, len: usize },
    /// A parameter name could not be resolved against the block
    #[error("could not find parameter {0:?} in block")]
    UnknownParameterName(String),
}

/// Errors raised during direct numeric evaluation of a graph.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    /// A shape rule rejected the operands
    #[error(transparent)]
    Shape(#[from] ShapeError),
    /// An operator was applied to operand kinds it does not support
    #[error("operator {op} cannot be applied to {operands}")]
    UnsupportedOperands { op: String, operands: String },
    /// Evaluation required a numeric value for a leaf that has no binding
    #[error("unresolved symbol: {0}")]
    UnresolvedSymbol(String),
    /// An extension operator id was not found in the registry
    #[error("unknown extension operator id {0}")]
    UnknownExtOp(u32),
}

/// Errors raised while compiling a graph into a backend callable.
#[derive(Error, Debug)]
pub enum LambdifyError {
    /// A leaf reachable from the head has neither a substitution nor a value
    #[error("unresolved symbol in compiled graph: {0}")]
    UnresolvedSymbol(String),
    /// A list argument contained a non-scalar leaf
    #[error("invalid argument {index}: lists must contain scalar leaves")]
    NonScalarListEntry { index: usize },
    /// A single argument had a matrix shape, which cannot map to one vector symbol
    #[error("invalid argument {index}: cannot map shape {shape} to a vector symbol")]
    InvalidArgumentShape { index: usize, shape: Shape },
    /// Shape inference failed on the graph being compiled
    #[error(transparent)]
    Shape(#[from] ShapeError),
    /// The backend collaborator reported an error
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Errors reported by backend collaborators.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The backend does not support the requested operation or value kind
    #[error("unsupported by backend: {0}")]
    Unsupported(String),
    /// The compiled body references a symbol not declared as an argument
    #[error("unresolved symbol at backend compilation: {0}")]
    UnresolvedSymbol(String),
    /// The host machine architecture is not supported
    #[error("host machine is not supported: {0}")]
    HostMachineNotSupported(String),
    /// Error during backend code generation
    #[error("codegen error: {0}")]
    Codegen(String),
    /// Error in the backend's module plumbing
    #[error("module error: {0}")]
    Module(String),
    /// Error declaring or defining the compiled function
    #[error("declaration error: {0}")]
    Declaration(String),
    /// A compiled callable was invoked with inputs of the wrong size
    #[error("invalid input: expected {expected}, got {got}")]
    InvalidInput { expected: usize, got: usize },
    /// Evaluation inside an interpreted callable failed
    #[error(transparent)]
    Eval(#[from] EvalError),
}
