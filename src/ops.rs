//! The operator set and the operator/shape registry.
//!
//! Operators are a closed tagged enum rather than an open trait hierarchy:
//! the built-in algebraic operators are variants of [`Op`], and additional
//! operators plug in through [`OpRegistry::register`] as [`Op::Ext`]
//! entries carrying their own arity, shape rule and evaluation function.
//!
//! Operator membership is therefore a structural test on graph nodes, and
//! every registered operator behaves as an operator in every graph it
//! appears in. Registering the same extension name twice is a fatal
//! configuration error.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::errors::{EvalError, RegistryError, ShapeError};
use crate::shape::{broadcast_shape, matmul_shape, transpose_shape, Shape, ShapeFn};
use crate::value::{apply_builtin, Value};

/// Handle to an extension operator owned by an [`OpRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExtOpId(pub(crate) u32);

/// A graph operator.
///
/// The built-in variants cover the algebraic operations every model needs;
/// `EvaluateSignal` is the application of a signal to a time argument and
/// gets special treatment in free-symbol extraction and temporal
/// classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Neg,
    Pow,
    MatMul,
    Transpose,
    /// Application of a signal to a time argument: `signal(t)`
    EvaluateSignal,
    /// An operator registered at runtime
    Ext(ExtOpId),
}

/// Arity class of an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly this many arguments
    Fixed(usize),
    /// Any number of arguments
    Variadic,
}

impl Arity {
    /// Checks an argument count against this arity class.
    pub fn accepts(&self, count: usize) -> bool {
        match self {
            Arity::Fixed(n) => *n == count,
            Arity::Variadic => true,
        }
    }
}

/// Evaluation function of an extension operator.
pub type ExtEvalFn = Arc<dyn Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync>;

#[derive(Clone)]
struct ExtOp {
    name: String,
    arity: Arity,
    shape: ShapeFn,
    eval: ExtEvalFn,
}

/// Registry of extension operators plus shape/arity/eval dispatch for the
/// whole operator set.
///
/// One registry is constructed per [`Context`](crate::context::Context) and
/// passed by reference to every call site that needs operator metadata.
/// The registry is cheap to clone (extension eval functions are shared), so
/// backends that evaluate at call time can carry their own handle.
#[derive(Clone, Default)]
pub struct OpRegistry {
    ext: Vec<ExtOp>,
    by_name: HashMap<String, ExtOpId>,
}

impl OpRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an extension operator.
    ///
    /// # Arguments
    /// * `name` - Unique operator name; re-registration is a fatal error
    /// * `arity` - Fixed argument count or variadic
    /// * `shape` - Shape-inference rule (use [`broadcast_shape`] for the default)
    /// * `eval` - Numeric evaluation over [`Value`] operands
    ///
    /// # Errors
    /// [`RegistryError::DuplicateOperator`] if the name is already taken.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        arity: Arity,
        shape: ShapeFn,
        eval: ExtEvalFn,
    ) -> Result<ExtOpId, RegistryError> {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            return Err(RegistryError::DuplicateOperator(name));
        }
        let id = ExtOpId(self.ext.len() as u32);
        self.by_name.insert(name.clone(), id);
        self.ext.push(ExtOp {
            name,
            arity,
            shape,
            eval,
        });
        Ok(id)
    }

    /// Looks up a registered extension operator by name.
    pub fn lookup(&self, name: &str) -> Option<Op> {
        self.by_name.get(name).map(|id| Op::Ext(*id))
    }

    /// Human-readable operator name.
    pub fn name(&self, op: Op) -> String {
        match op {
            Op::Add => "add".to_string(),
            Op::Sub => "sub".to_string(),
            Op::Mul => "mul".to_string(),
            Op::Div => "div".to_string(),
            Op::Neg => "neg".to_string(),
            Op::Pow => "pow".to_string(),
            Op::MatMul => "matmul".to_string(),
            Op::Transpose => "transpose".to_string(),
            Op::EvaluateSignal => "evaluate_signal".to_string(),
            Op::Ext(id) => self
                .ext
                .get(id.0 as usize)
                .map(|def| def.name.clone())
                .unwrap_or_else(|| format!("ext#{}", id.0)),
        }
    }

    /// Arity class of an operator.
    pub fn arity(&self, op: Op) -> Arity {
        match op {
            Op::Neg | Op::Transpose => Arity::Fixed(1),
            Op::Add
            | Op::Sub
            | Op::Mul
            | Op::Div
            | Op::Pow
            | Op::MatMul
            | Op::EvaluateSignal => Arity::Fixed(2),
            Op::Ext(id) => self
                .ext
                .get(id.0 as usize)
                .map(|def| def.arity)
                .unwrap_or(Arity::Variadic),
        }
    }

    /// Infers the output shape of `op` applied to arguments of the given shapes.
    pub fn infer_shape(&self, op: Op, shapes: &[Shape]) -> Result<Shape, ShapeError> {
        match op {
            Op::MatMul => matmul_shape(shapes),
            Op::Transpose => transpose_shape(shapes),
            // Sampling a signal yields the signal's own (vector) shape.
            Op::EvaluateSignal => shapes.first().copied().ok_or(ShapeError::NoArguments),
            Op::Ext(id) => {
                let def = self.ext.get(id.0 as usize).ok_or(ShapeError::Arity {
                    op: format!("ext#{}", id.0),
                    expected: 0,
                    got: shapes.len(),
                })?;
                (def.shape)(shapes)
            }
            _ => broadcast_shape(shapes),
        }
    }

    /// Applies an operator to fully numeric operands.
    ///
    /// `EvaluateSignal` cannot be evaluated here; the graph evaluator
    /// resolves signal bindings itself before it would reach this point.
    pub fn eval(&self, op: Op, args: &[Value]) -> Result<Value, EvalError> {
        match op {
            Op::Ext(id) => {
                let def = self
                    .ext
                    .get(id.0 as usize)
                    .ok_or(EvalError::UnknownExtOp(id.0))?;
                if !def.arity.accepts(args.len()) {
                    let expected = match def.arity {
                        Arity::Fixed(n) => n,
                        Arity::Variadic => args.len(),
                    };
                    return Err(EvalError::Shape(ShapeError::Arity {
                        op: def.name.clone(),
                        expected,
                        got: args.len(),
                    }));
                }
                (def.eval)(args)
            }
            _ => apply_builtin(op, args),
        }
    }
}

impl fmt::Debug for OpRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpRegistry")
            .field("extensions", &self.by_name.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_dot() -> (OpRegistry, ExtOpId) {
        let mut reg = OpRegistry::new();
        let id = reg
            .register(
                "sum_all",
                Arity::Variadic,
                |_| Ok(Shape::scalar()),
                Arc::new(|args| {
                    let mut total = 0.0;
                    for arg in args {
                        match arg {
                            Value::Scalar(x) => total += x,
                            Value::Vector(v) => total += v.sum(),
                            Value::Matrix(m) => total += m.sum(),
                        }
                    }
                    Ok(Value::Scalar(total))
                }),
            )
            .unwrap();
        (reg, id)
    }

    #[test]
    fn test_register_and_eval_extension() {
        let (reg, id) = registry_with_dot();
        let op = Op::Ext(id);
        assert_eq!(reg.name(op), "sum_all");
        assert_eq!(reg.arity(op), Arity::Variadic);

        let result = reg
            .eval(op, &[Value::Scalar(1.0), Value::Scalar(2.0), Value::Scalar(3.0)])
            .unwrap();
        assert_eq!(result, Value::Scalar(6.0));
    }

    #[test]
    fn test_duplicate_registration_is_fatal() {
        let (mut reg, _) = registry_with_dot();
        let err = reg
            .register(
                "sum_all",
                Arity::Fixed(1),
                crate::shape::broadcast_shape,
                Arc::new(|args| Ok(args[0].clone())),
            )
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateOperator("sum_all".to_string()));
    }

    #[test]
    fn test_lookup_by_name() {
        let (reg, id) = registry_with_dot();
        assert_eq!(reg.lookup("sum_all"), Some(Op::Ext(id)));
        assert_eq!(reg.lookup("missing"), None);
    }

    #[test]
    fn test_builtin_shape_dispatch() {
        let reg = OpRegistry::new();
        let shape = reg
            .infer_shape(Op::MatMul, &[Shape::Matrix(3, 4), Shape::Matrix(4, 2)])
            .unwrap();
        assert_eq!(shape, Shape::Matrix(3, 2));

        let shape = reg
            .infer_shape(Op::Add, &[Shape::scalar(), Shape::Vector(3)])
            .unwrap();
        assert_eq!(shape, Shape::Vector(3));
    }

    #[test]
    fn test_evaluate_signal_shape_is_signal_shape() {
        let reg = OpRegistry::new();
        let shape = reg
            .infer_shape(Op::EvaluateSignal, &[Shape::Vector(4), Shape::scalar()])
            .unwrap();
        assert_eq!(shape, Shape::Vector(4));
    }
}
