//! The engine context: registries, arena and the global time variable.
//!
//! A [`Context`] is constructed once at process start and passed by
//! reference to every call site that builds or queries graphs. It owns the
//! operator registry, the cast registry (pre-loaded with the default
//! converters), the block/port arena with its leaf caches, and the global
//! time variable `t`. There is no global mutable state anywhere in the
//! crate.
//!
//! The context is deliberately not shareable across threads without
//! external synchronization; graph construction and evaluation are
//! single-threaded, synchronous value computation.

use std::any::Any;

use crate::arena::{BlockId, ModelArena, PortId};
use crate::casts::{register_default_casts, CastRegistry};
use crate::errors::{ArenaError, CastError, ShapeError};
use crate::graph::{Algebraic, ExpressionGraph};
use crate::ops::{Op, OpRegistry};
use crate::shape::Shape;
use crate::symbols::{Block, Leaf, Parameter, Port, SignalReference, Variable};
use crate::value::Value;

/// Owner of all engine-wide state.
pub struct Context {
    ops: OpRegistry,
    casts: CastRegistry,
    arena: ModelArena,
    time: Variable,
    next_var_id: u64,
}

impl Context {
    /// Creates a context with the built-in operators and default casts.
    pub fn new() -> Self {
        let mut casts = CastRegistry::new();
        // A fresh registry cannot contain duplicates.
        register_default_casts(&mut casts).expect("default casts are unique");
        Self {
            ops: OpRegistry::new(),
            casts,
            arena: ModelArena::new(),
            time: Variable::new(0, Some("t".to_string()), Shape::scalar()),
            next_var_id: 1,
        }
    }

    /// The global time variable.
    pub fn time(&self) -> &Variable {
        &self.time
    }

    /// Mints a fresh scalar variable.
    ///
    /// Variables have identity semantics: calling this twice with the same
    /// name produces two distinct symbols.
    pub fn variable(&mut self, name: impl Into<String>) -> Variable {
        self.variable_with_shape(name, Shape::scalar())
    }

    /// Mints a fresh vector variable of the given length.
    pub fn vector_variable(&mut self, name: impl Into<String>, len: usize) -> Variable {
        self.variable_with_shape(name, Shape::Vector(len))
    }

    /// Mints a fresh variable with an explicit shape.
    pub fn variable_with_shape(&mut self, name: impl Into<String>, shape: Shape) -> Variable {
        let id = self.next_var_id;
        self.next_var_id += 1;
        Variable::new(id, Some(name.into()), shape)
    }

    pub fn ops(&self) -> &OpRegistry {
        &self.ops
    }

    pub fn ops_mut(&mut self) -> &mut OpRegistry {
        &mut self.ops
    }

    pub fn casts(&self) -> &CastRegistry {
        &self.casts
    }

    pub fn casts_mut(&mut self) -> &mut CastRegistry {
        &mut self.casts
    }

    pub fn arena(&self) -> &ModelArena {
        &self.arena
    }

    pub fn arena_mut(&mut self) -> &mut ModelArena {
        &mut self.arena
    }

    /// Hands a block to the arena, returning its stable handle.
    pub fn insert_block(&mut self, block: Box<dyn Block>) -> BlockId {
        self.arena.insert_block(block)
    }

    /// Hands a port to the arena, returning its stable handle.
    pub fn insert_port(&mut self, port: Box<dyn Port>) -> PortId {
        self.arena.insert_port(port)
    }

    /// The memoized parameter leaf for `(block, index)`.
    pub fn parameter(&mut self, block: BlockId, index: usize) -> Result<Parameter, ArenaError> {
        self.arena.parameter(block, index)
    }

    /// The memoized parameter leaf resolved by name.
    pub fn parameter_by_name(
        &mut self,
        block: BlockId,
        name: &str,
    ) -> Result<Parameter, ArenaError> {
        self.arena.parameter_by_name(block, name)
    }

    /// The memoized signal reference for a port.
    pub fn signal(&mut self, port: PortId) -> Result<SignalReference, ArenaError> {
        self.arena.signal(port)
    }

    /// Embeds a foreign numeric value as a constant leaf, through the cast
    /// registry. This is the only place backend-specific numeric types
    /// touch the graph engine.
    pub fn constant(&self, value: &dyn Any) -> Result<Algebraic, CastError> {
        let value: Value = self.casts.cast_to(value)?;
        Ok(Algebraic::Leaf(Leaf::Constant(value)))
    }

    /// Builds a graph by applying an operator to arguments, with arity
    /// checking. This is the general form behind the builder functions and
    /// the only way to apply extension operators.
    pub fn apply(
        &self,
        op: Op,
        args: Vec<Algebraic>,
    ) -> Result<ExpressionGraph, ShapeError> {
        let arity = self.ops.arity(op);
        if !arity.accepts(args.len()) {
            let expected = match arity {
                crate::ops::Arity::Fixed(n) => n,
                crate::ops::Arity::Variadic => args.len(),
            };
            return Err(ShapeError::Arity {
                op: self.ops.name(op),
                expected,
                got: args.len(),
            });
        }
        Ok(ExpressionGraph::new(op, args))
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::Arity;
    use crate::shape::broadcast_shape;
    use std::sync::Arc;

    #[test]
    fn test_time_variable_is_stable() {
        let ctx = Context::new();
        assert_eq!(ctx.time(), ctx.time());
        assert_eq!(ctx.time().name(), Some("t"));
    }

    #[test]
    fn test_constant_through_cast_registry() {
        let ctx = Context::new();
        let constant = ctx.constant(&2.0f64).unwrap();
        assert!(matches!(
            constant,
            Algebraic::Leaf(Leaf::Constant(Value::Scalar(x))) if x == 2.0
        ));

        let err = ctx.constant(&"nope").unwrap_err();
        assert!(matches!(err, CastError::UnknownCast(_)));
    }

    #[test]
    fn test_apply_checks_arity() {
        let mut ctx = Context::new();
        let x = ctx.variable("x");
        let err = ctx
            .apply(Op::Add, vec![Algebraic::from(x)])
            .unwrap_err();
        assert!(matches!(err, ShapeError::Arity { expected: 2, got: 1, .. }));
    }

    #[test]
    fn test_apply_extension_operator() {
        let mut ctx = Context::new();
        let id = ctx
            .ops_mut()
            .register(
                "double",
                Arity::Fixed(1),
                broadcast_shape,
                Arc::new(|args| crate::value::apply_builtin(Op::Add, &[args[0].clone(), args[0].clone()])),
            )
            .unwrap();

        let x = ctx.variable("x");
        let graph = ctx.apply(Op::Ext(id), vec![Algebraic::from(x)]).unwrap();
        assert_eq!(graph.shape(&ctx).unwrap(), Shape::scalar());
    }
}
