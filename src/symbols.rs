//! Symbolic leaf types: variables, block parameters and signal references.
//!
//! Leaves are the childless nodes of an expression graph. The engine knows
//! four kinds:
//!
//! - [`Variable`]: a free symbol with identity semantics
//! - [`Parameter`]: a scalar symbol bound to one entry of a block's
//!   parameter vector, globally unique per `(block, index)` pair
//! - [`SignalReference`]: the full time-varying vector output of a port,
//!   unique per live port
//! - [`Leaf::Constant`]: an embedded numeric value
//!
//! Parameters and signal references are only minted by the
//! [`ModelArena`](crate::arena::ModelArena), which owns the memoization
//! tables that give them their uniqueness guarantees. The [`Block`] and
//! [`Port`] traits are the collaborator contracts the arena stores.

use std::collections::HashSet;
use std::fmt;
use std::ops::Range;

use crate::arena::{BlockId, PortId};
use crate::graph::{Algebraic, ExpressionGraph};
use crate::ops::Op;
use crate::shape::Shape;
use crate::value::Value;

/// A model block exposing an ordered parameter list.
///
/// Blocks live in the arena; the engine only needs their parameter names
/// and a stable handle, everything else about block-diagram composition is
/// out of scope.
pub trait Block {
    /// Ordered parameter names of this block.
    fn parameters(&self) -> &[String];

    /// Resolves a parameter name to its index, by position.
    fn find_parameter(&self, name: &str) -> Option<usize> {
        self.parameters().iter().position(|p| p == name)
    }
}

/// A model port exposing the width of its output signal.
pub trait Port {
    /// Number of scalar channels carried by this port.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A free symbolic variable.
///
/// Equality and hashing are by identity: two variables are the same symbol
/// only if they were minted as the same symbol, regardless of name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Variable {
    id: u64,
    name: Option<String>,
    shape: Shape,
}

impl Variable {
    pub(crate) fn new(id: u64, name: Option<String>, shape: Shape) -> Self {
        Self { id, name, shape }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "var_{}", self.id),
        }
    }
}

/// A symbol bound to one entry of a block's parameter vector.
///
/// Parameters are always scalar. Exactly one parameter exists per
/// `(block, index)` pair; the arena memoizes them, so repeated requests
/// compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Parameter {
    block: BlockId,
    index: usize,
    name: String,
}

impl Parameter {
    pub(crate) fn new(block: BlockId, index: usize, name: String) -> Self {
        Self { block, index, name }
    }

    pub fn block(&self) -> BlockId {
        self.block
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> Shape {
        Shape::scalar()
    }

    /// The owning block and the half-open slice this parameter occupies in
    /// the block's parameter vector.
    pub fn source_and_slice(&self) -> (BlockId, Range<usize>) {
        (self.block, self.index..self.index + 1)
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A symbol representing the full vector output of a port over time.
///
/// At most one live reference exists per port; the arena memoizes them and
/// mints a fresh, distinct instance (new generation) once the previous one
/// has been invalidated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignalReference {
    port: PortId,
    len: usize,
    generation: u64,
}

impl SignalReference {
    pub(crate) fn new(port: PortId, len: usize, generation: u64) -> Self {
        Self {
            port,
            len,
            generation,
        }
    }

    pub fn port(&self) -> PortId {
        self.port
    }

    pub fn shape(&self) -> Shape {
        Shape::Vector(self.len)
    }

    /// Samples this signal at a time argument, producing a one-operator
    /// graph whose head is `EvaluateSignal` over `[self, t]`.
    ///
    /// The time argument may be numeric or symbolic.
    pub fn at(&self, t: impl Into<Algebraic>) -> ExpressionGraph {
        ExpressionGraph::new(
            Op::EvaluateSignal,
            vec![Algebraic::Leaf(Leaf::Signal(self.clone())), t.into()],
        )
    }
}

impl fmt::Display for SignalReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "signal_{}", self.port.raw())
    }
}

/// A childless graph node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Leaf {
    Variable(Variable),
    Parameter(Parameter),
    Signal(SignalReference),
    Constant(Value),
}

impl Leaf {
    /// The shape fixed at this leaf's construction.
    pub fn shape(&self) -> Shape {
        match self {
            Leaf::Variable(v) => v.shape(),
            Leaf::Parameter(p) => p.shape(),
            Leaf::Signal(s) => s.shape(),
            Leaf::Constant(c) => c.shape(),
        }
    }

    /// Whether this leaf on its own depends on time.
    ///
    /// Signals are temporal, the time variable is temporal, everything else
    /// is not.
    pub fn is_temporal(&self, time: &Variable) -> bool {
        match self {
            Leaf::Signal(_) => true,
            Leaf::Variable(v) => v == time,
            _ => false,
        }
    }

    /// Whether this leaf is a symbol (as opposed to an embedded constant).
    pub fn is_symbol(&self) -> bool {
        !matches!(self, Leaf::Constant(_))
    }

    /// Free symbols contributed by this leaf in isolation.
    ///
    /// A signal reference is a function of time, so on its own it
    /// contributes both itself and the time variable; constants contribute
    /// nothing; every other leaf contributes itself.
    pub fn symbols(&self, time: &Variable) -> HashSet<Leaf> {
        match self {
            Leaf::Constant(_) => HashSet::new(),
            Leaf::Signal(_) => {
                HashSet::from([self.clone(), Leaf::Variable(time.clone())])
            }
            other => HashSet::from([other.clone()]),
        }
    }
}

impl fmt::Display for Leaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Leaf::Variable(v) => write!(f, "{v}"),
            Leaf::Parameter(p) => write!(f, "{p}"),
            Leaf::Signal(s) => write!(f, "{s}"),
            Leaf::Constant(c) => write!(f, "{c}"),
        }
    }
}

impl From<Variable> for Leaf {
    fn from(v: Variable) -> Self {
        Leaf::Variable(v)
    }
}

impl From<Parameter> for Leaf {
    fn from(p: Parameter) -> Self {
        Leaf::Parameter(p)
    }
}

impl From<SignalReference> for Leaf {
    fn from(s: SignalReference) -> Self {
        Leaf::Signal(s)
    }
}

impl From<Value> for Leaf {
    fn from(v: Value) -> Self {
        Leaf::Constant(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    #[test]
    fn test_variable_identity() {
        let mut ctx = Context::new();
        let a = ctx.variable("x");
        let b = ctx.variable("x");
        // same name, different symbols
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_variable_default_shape_is_scalar() {
        let mut ctx = Context::new();
        let x = ctx.variable("x");
        assert_eq!(x.shape(), Shape::scalar());

        let v = ctx.vector_variable("v", 3);
        assert_eq!(v.shape(), Shape::Vector(3));
    }

    #[test]
    fn test_leaf_temporality() {
        let mut ctx = Context::new();
        let x = ctx.variable("x");
        let time = ctx.time().clone();

        assert!(!Leaf::Variable(x).is_temporal(&time));
        assert!(Leaf::Variable(time.clone()).is_temporal(&time));
        assert!(!Leaf::Constant(Value::Scalar(1.0)).is_temporal(&time));
    }
}
