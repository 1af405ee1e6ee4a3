//! Compiling expression graphs into backend callables.
//!
//! [`lambdify`] fixes a calling convention for a graph: each argument in
//! the caller-supplied list becomes one flat input vector of the compiled
//! function, in order. Internally every argument is rebound to a fresh
//! backend symbol vector named `x_0`, `x_1`, ... sized by the argument's
//! scalar length; the original leaf names never reach the backend.
//!
//! An argument is either a single leaf (scalar or vector shaped) or a list
//! of scalar leaves packed into one vector. Matrix-shaped leaves cannot be
//! flattened into a single symbol vector and are rejected, as are
//! non-scalar leaves inside a list.
//!
//! The graph walk substitutes bound leaves with their backend terms and
//! folds embedded constants through [`Backend::constant`]; any other leaf
//! reachable from the head is a compile error, not a runtime one.

use std::collections::HashMap;

use itertools::Itertools;

use crate::backends::Backend;
use crate::context::Context;
use crate::errors::LambdifyError;
use crate::graph::{ExpressionGraph, Node};
use crate::shape::Shape;
use crate::symbols::Leaf;

/// One input of a compiled function.
#[derive(Debug, Clone)]
pub enum Argument {
    /// A scalar or vector shaped leaf bound to the whole input vector
    Single(Leaf),
    /// Scalar leaves packed into one input vector, in order
    List(Vec<Leaf>),
}

impl From<Leaf> for Argument {
    fn from(leaf: Leaf) -> Self {
        Argument::Single(leaf)
    }
}

impl Argument {
    fn len(&self, index: usize) -> Result<usize, LambdifyError> {
        match self {
            Argument::Single(leaf) => match leaf.shape() {
                Shape::Vector(n) => Ok(n),
                shape @ Shape::Matrix(..) => {
                    Err(LambdifyError::InvalidArgumentShape { index, shape })
                }
            },
            Argument::List(leaves) => {
                for leaf in leaves {
                    if !leaf.shape().is_scalar() {
                        return Err(LambdifyError::NonScalarListEntry { index });
                    }
                }
                Ok(leaves.len())
            }
        }
    }
}

/// Compiles a graph into a backend callable.
///
/// The compiled function takes one flat `f64`-vector per entry of
/// `arguments`, in order. `name` is handed to the backend for its compiled
/// artifact; backends may ignore it.
///
/// # Errors
/// * [`LambdifyError::InvalidArgumentShape`] for a matrix-shaped argument
/// * [`LambdifyError::NonScalarListEntry`] for a non-scalar leaf in a list
/// * [`LambdifyError::UnresolvedSymbol`] if the graph references a leaf
///   not covered by `arguments`
/// * [`LambdifyError::Backend`] if the backend rejects an operator or
///   value kind
pub fn lambdify<B: Backend>(
    ctx: &Context,
    backend: &mut B,
    graph: &ExpressionGraph,
    arguments: &[Argument],
    name: &str,
) -> Result<B::Func, LambdifyError> {
    // make sure the graph is well-shaped before handing it to the backend
    graph.shape(ctx)?;

    let mut substitutions: HashMap<Leaf, B::Repr> = HashMap::new();
    let mut arg_vectors = Vec::with_capacity(arguments.len());

    for (index, argument) in arguments.iter().enumerate() {
        let len = argument.len(index)?;
        let vector = backend.symbol_vector(&format!("x_{index}"), len)?;
        match argument {
            Argument::Single(leaf) => {
                let repr = if leaf.shape().is_scalar() {
                    backend.component(&vector, 0)?
                } else {
                    vector.clone()
                };
                substitutions.insert(leaf.clone(), repr);
            }
            Argument::List(leaves) => {
                for (slot, leaf) in leaves.iter().enumerate() {
                    let repr = backend.component(&vector, slot)?;
                    substitutions.insert(leaf.clone(), repr);
                }
            }
        }
        arg_vectors.push(vector);
    }

    let body = walk(backend, graph, graph.head(), &substitutions)?;
    Ok(backend.compile(body, &arg_vectors, name)?)
}

fn walk<B: Backend>(
    backend: &mut B,
    graph: &ExpressionGraph,
    node: usize,
    substitutions: &HashMap<Leaf, B::Repr>,
) -> Result<B::Repr, LambdifyError> {
    match graph.node_at(node) {
        Node::Leaf(Leaf::Constant(value)) => Ok(backend.constant(value)?),
        Node::Leaf(leaf) => substitutions
            .get(leaf)
            .cloned()
            .ok_or_else(|| LambdifyError::UnresolvedSymbol(leaf.to_string())),
        Node::Op(op) => {
            let args: Vec<B::Repr> = graph
                .children(node)
                .iter()
                .map(|child| walk(backend, graph, *child, substitutions))
                .try_collect()?;
            Ok(backend.apply(*op, args)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InterpBackend;
    use crate::graph::{add, mul};
    use crate::value::Value;

    #[test]
    fn test_single_scalar_arguments() {
        let mut ctx = Context::new();
        let a = ctx.variable("a");
        let b = ctx.variable("b");
        let graph = add(mul(&a, 2.0), &b);

        let mut backend = InterpBackend::new(ctx.ops().clone());
        let f = lambdify(
            &ctx,
            &mut backend,
            &graph,
            &[Argument::Single(a.into()), Argument::Single(b.into())],
            "affine",
        )
        .unwrap();

        let result = f(&[Value::Scalar(3.0), Value::Scalar(1.0)]).unwrap();
        assert_eq!(result, Value::Scalar(7.0));
    }

    #[test]
    fn test_list_argument_packs_scalars() {
        let mut ctx = Context::new();
        let a = ctx.variable("a");
        let b = ctx.variable("b");
        let graph = add(&a, mul(&b, &b));

        let mut backend = InterpBackend::new(ctx.ops().clone());
        let f = lambdify(
            &ctx,
            &mut backend,
            &graph,
            &[Argument::List(vec![a.into(), b.into()])],
            "packed",
        )
        .unwrap();

        let packed = Value::Vector(ndarray::arr1(&[1.0, 3.0]));
        assert_eq!(f(&[packed]).unwrap(), Value::Scalar(10.0));
    }

    #[test]
    fn test_vector_argument_binds_whole_symbol() {
        let mut ctx = Context::new();
        let v = ctx.vector_variable("v", 3);
        let graph = mul(&v, 2.0);

        let mut backend = InterpBackend::new(ctx.ops().clone());
        let f = lambdify(
            &ctx,
            &mut backend,
            &graph,
            &[Argument::Single(v.into())],
            "scale",
        )
        .unwrap();

        let result = f(&[Value::Vector(ndarray::arr1(&[1.0, 2.0, 3.0]))]).unwrap();
        assert_eq!(result, Value::Vector(ndarray::arr1(&[2.0, 4.0, 6.0])));
    }

    #[test]
    fn test_unbound_leaf_is_a_compile_error() {
        let mut ctx = Context::new();
        let a = ctx.variable("a");
        let b = ctx.variable("b");
        let graph = add(&a, &b);

        let mut backend = InterpBackend::new(ctx.ops().clone());
        let err = lambdify(
            &ctx,
            &mut backend,
            &graph,
            &[Argument::Single(a.into())],
            "partial",
        )
        .err()
        .expect("compilation with an unbound leaf must fail");
        assert!(matches!(err, LambdifyError::UnresolvedSymbol(name) if name == "b"));
    }

    #[test]
    fn test_non_scalar_list_entry_rejected() {
        let mut ctx = Context::new();
        let v = ctx.vector_variable("v", 2);
        let graph = mul(&v, 2.0);

        let mut backend = InterpBackend::new(ctx.ops().clone());
        let err = lambdify(
            &ctx,
            &mut backend,
            &graph,
            &[Argument::List(vec![v.into()])],
            "bad",
        )
        .err()
        .expect("a vector leaf in a list must be rejected");
        assert!(matches!(err, LambdifyError::NonScalarListEntry { index: 0 }));
    }

    #[test]
    fn test_matrix_argument_rejected() {
        let mut ctx = Context::new();
        let m = ctx.variable_with_shape("m", Shape::Matrix(2, 2));
        let graph = mul(&m, 2.0);

        let mut backend = InterpBackend::new(ctx.ops().clone());
        let err = lambdify(
            &ctx,
            &mut backend,
            &graph,
            &[Argument::Single(m.into())],
            "bad",
        )
        .err()
        .expect("a matrix-shaped argument must be rejected");
        assert!(matches!(
            err,
            LambdifyError::InvalidArgumentShape {
                index: 0,
                shape: Shape::Matrix(2, 2)
            }
        ));
    }
}
