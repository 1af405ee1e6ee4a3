//! Interpreted backend: evaluates compiled graphs as closure-held trees.
//!
//! This backend supports the full operator set, including vector and
//! matrix operands and registered extension operators, at the cost of
//! walking a tree per call. It is the reference implementation the JIT
//! backend is tested against.
//!
//! A compiled function takes one [`Value`] per argument vector, in
//! allocation order. Scalar arguments may be passed as `Value::Scalar` or
//! as a length-one vector.

use std::sync::Arc;

use itertools::Itertools;

use crate::backends::Backend;
use crate::errors::BackendError;
use crate::ops::{Op, OpRegistry};
use crate::value::Value;

/// A compiled interpreter callable.
pub type InterpFunction = Arc<dyn Fn(&[Value]) -> Result<Value, BackendError> + Send + Sync>;

/// Backend term: an evaluation tree over argument slots.
#[derive(Clone)]
pub enum InterpExpr {
    Const(Value),
    /// A whole argument vector
    Sym {
        arg: usize,
        len: usize,
        name: String,
    },
    /// One scalar component of an argument vector
    Component {
        arg: usize,
        index: usize,
        name: String,
    },
    Apply(Op, Vec<InterpExpr>),
}

impl InterpExpr {
    fn collect_args(&self, out: &mut Vec<(usize, String)>) {
        match self {
            InterpExpr::Const(_) => {}
            InterpExpr::Sym { arg, name, .. } | InterpExpr::Component { arg, name, .. } => {
                out.push((*arg, name.clone()));
            }
            InterpExpr::Apply(_, children) => {
                for child in children {
                    child.collect_args(out);
                }
            }
        }
    }

    fn eval(&self, ops: &OpRegistry, args: &[Value]) -> Result<Value, BackendError> {
        match self {
            InterpExpr::Const(value) => Ok(value.clone()),
            InterpExpr::Sym { arg, len, .. } => {
                let value = &args[*arg];
                let got = value.shape().len();
                if got != *len {
                    return Err(BackendError::InvalidInput {
                        expected: *len,
                        got,
                    });
                }
                Ok(value.clone())
            }
            InterpExpr::Component { arg, index, .. } => match &args[*arg] {
                Value::Scalar(x) if *index == 0 => Ok(Value::Scalar(*x)),
                Value::Vector(v) if *index < v.len() => Ok(Value::Scalar(v[*index])),
                other => Err(BackendError::InvalidInput {
                    expected: *index + 1,
                    got: other.shape().len(),
                }),
            },
            InterpExpr::Apply(op, children) => {
                let values: Vec<Value> = children
                    .iter()
                    .map(|child| child.eval(ops, args))
                    .try_collect()?;
                Ok(ops.eval(*op, &values)?)
            }
        }
    }
}

/// Closure-tree interpreter over [`Value`]s.
pub struct InterpBackend {
    ops: OpRegistry,
    next_arg: usize,
}

impl InterpBackend {
    /// Creates a backend evaluating extension operators against the given
    /// registry. Pass a clone of the context's registry so registered
    /// operators resolve identically at compile and call time.
    pub fn new(ops: OpRegistry) -> Self {
        Self { ops, next_arg: 0 }
    }
}

impl Backend for InterpBackend {
    type Repr = InterpExpr;
    type Func = InterpFunction;

    fn symbol_vector(&mut self, base: &str, len: usize) -> Result<InterpExpr, BackendError> {
        let arg = self.next_arg;
        self.next_arg += 1;
        Ok(InterpExpr::Sym {
            arg,
            len,
            name: base.to_string(),
        })
    }

    fn component(&self, vector: &InterpExpr, index: usize) -> Result<InterpExpr, BackendError> {
        match vector {
            InterpExpr::Sym { arg, len, name } if index < *len => Ok(InterpExpr::Component {
                arg: *arg,
                index,
                name: format!("{name}[{index}]"),
            }),
            InterpExpr::Sym { len, .. } => Err(BackendError::InvalidInput {
                expected: index + 1,
                got: *len,
            }),
            _ => Err(BackendError::Unsupported(
                "component projection of a non-symbol term".to_string(),
            )),
        }
    }

    fn constant(&self, value: &Value) -> Result<InterpExpr, BackendError> {
        Ok(InterpExpr::Const(value.clone()))
    }

    fn apply(&mut self, op: Op, args: Vec<InterpExpr>) -> Result<InterpExpr, BackendError> {
        if op == Op::EvaluateSignal {
            // signals must be bound to data before compilation
            return Err(BackendError::Unsupported(
                "signal evaluation in a compiled function".to_string(),
            ));
        }
        Ok(InterpExpr::Apply(op, args))
    }

    fn compile(
        &mut self,
        body: InterpExpr,
        args: &[InterpExpr],
        _name: &str,
    ) -> Result<InterpFunction, BackendError> {
        let declared: Vec<usize> = args
            .iter()
            .filter_map(|repr| match repr {
                InterpExpr::Sym { arg, .. } => Some(*arg),
                _ => None,
            })
            .collect();

        let mut referenced = Vec::new();
        body.collect_args(&mut referenced);
        for (arg, name) in &referenced {
            if !declared.contains(arg) {
                return Err(BackendError::UnresolvedSymbol(name.clone()));
            }
        }

        let arg_count = args.len();
        let ops = self.ops.clone();
        Ok(Arc::new(move |inputs: &[Value]| {
            if inputs.len() != arg_count {
                return Err(BackendError::InvalidInput {
                    expected: arg_count,
                    got: inputs.len(),
                });
            }
            body.eval(&ops, inputs)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::graph::{add, matmul, pow, sub};
    use crate::lambdify::{lambdify, Argument};
    use crate::ops::Arity;
    use crate::shape::broadcast_shape;
    use crate::value::apply_builtin;
    use ndarray::arr2;

    #[test]
    fn test_matches_direct_graph_evaluation() {
        let mut ctx = Context::new();
        let a = ctx.variable("a");
        let b = ctx.variable("b");
        let graph = sub(pow(&a, 2.0), &b);

        let mut bindings = crate::graph::Bindings::new();
        bindings.bind(a.clone(), 3.0).bind(b.clone(), 4.0);
        let direct = graph.eval(&ctx, &bindings).unwrap();

        let mut backend = InterpBackend::new(ctx.ops().clone());
        let f = lambdify(
            &ctx,
            &mut backend,
            &graph,
            &[Argument::Single(a.into()), Argument::Single(b.into())],
            "f",
        )
        .unwrap();
        let compiled = f(&[Value::Scalar(3.0), Value::Scalar(4.0)]).unwrap();

        assert_eq!(direct, compiled);
    }

    #[test]
    fn test_matrix_operands() {
        let mut ctx = Context::new();
        let gain = ctx.variable("gain");

        let a = arr2(&[[1.0, 2.0], [3.0, 4.0]]);
        let b = arr2(&[[1.0], [1.0]]);
        let graph = crate::graph::mul(&gain, matmul(a, b));

        let mut backend = InterpBackend::new(ctx.ops().clone());
        let f = lambdify(
            &ctx,
            &mut backend,
            &graph,
            &[Argument::Single(gain.into())],
            "scaled_product",
        )
        .unwrap();

        let result = f(&[Value::Scalar(2.0)]).unwrap();
        assert_eq!(result, Value::Matrix(arr2(&[[6.0], [14.0]])));
    }

    #[test]
    fn test_extension_operator() {
        let mut ctx = Context::new();
        let id = ctx
            .ops_mut()
            .register(
                "square",
                Arity::Fixed(1),
                broadcast_shape,
                std::sync::Arc::new(|args| {
                    apply_builtin(Op::Mul, &[args[0].clone(), args[0].clone()])
                }),
            )
            .unwrap();

        let x = ctx.variable("x");
        let graph = ctx
            .apply(Op::Ext(id), vec![crate::graph::Algebraic::from(&x)])
            .unwrap();
        let graph = add(graph, 1.0);

        let mut backend = InterpBackend::new(ctx.ops().clone());
        let f = lambdify(
            &ctx,
            &mut backend,
            &graph,
            &[Argument::Single(x.into())],
            "sq",
        )
        .unwrap();

        assert_eq!(f(&[Value::Scalar(3.0)]).unwrap(), Value::Scalar(10.0));
    }

    #[test]
    fn test_wrong_argument_count_at_call_time() {
        let mut ctx = Context::new();
        let a = ctx.variable("a");
        let graph = add(&a, 1.0);

        let mut backend = InterpBackend::new(ctx.ops().clone());
        let f = lambdify(
            &ctx,
            &mut backend,
            &graph,
            &[Argument::Single(a.into())],
            "f",
        )
        .unwrap();

        let err = f(&[]).unwrap_err();
        assert!(matches!(
            err,
            BackendError::InvalidInput {
                expected: 1,
                got: 0
            }
        ));
    }

    #[test]
    fn test_signal_application_is_rejected() {
        let mut ctx = Context::new();
        struct OnePort;
        impl crate::symbols::Port for OnePort {
            fn len(&self) -> usize {
                1
            }
        }
        let port = ctx.insert_port(Box::new(OnePort));
        let sig = ctx.signal(port).unwrap();
        let graph = sig.at(0.0);

        // even with the signal bound as an argument, sampling has no
        // compiled counterpart
        let mut backend = InterpBackend::new(ctx.ops().clone());
        let err = lambdify(
            &ctx,
            &mut backend,
            &graph,
            &[Argument::Single(sig.into())],
            "sig",
        )
        .err()
        .expect("signal sampling must be rejected by the backend");
        assert!(matches!(
            err,
            crate::errors::LambdifyError::Backend(BackendError::Unsupported(_))
        ));
    }
}
