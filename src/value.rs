//! Numeric values and the kernels behind the built-in operators.
//!
//! [`Value`] is the closed set of numeric types the engine can embed as
//! constant leaves and produce from direct graph evaluation: scalars,
//! column vectors and matrices (backed by [`ndarray`]). The kernels in this
//! module implement the built-in operator set over values, with scalar
//! broadcast following the same rule as shape inference.
//!
//! Equality and hashing are bitwise on the underlying `f64`s, so values can
//! serve as deduplication keys for constant leaves and feed into the
//! structural hash of a graph.

use std::fmt;
use std::hash::{Hash, Hasher};

use ndarray::{Array1, Array2};

use crate::errors::{EvalError, ShapeError};
use crate::ops::Op;
use crate::shape::Shape;

/// A concrete numeric value.
#[derive(Debug, Clone)]
pub enum Value {
    /// A scalar
    Scalar(f64),
    /// A column vector
    Vector(Array1<f64>),
    /// A matrix
    Matrix(Array2<f64>),
}

impl Value {
    /// The shape of this value; scalars report the scalar shape `(1,)`.
    pub fn shape(&self) -> Shape {
        match self {
            Value::Scalar(_) => Shape::scalar(),
            Value::Vector(v) => Shape::Vector(v.len()),
            Value::Matrix(m) => {
                let (n, c) = m.dim();
                Shape::Matrix(n, c)
            }
        }
    }

    /// Extracts a scalar if this value is scalar-shaped.
    ///
    /// Length-one vectors and 1x1 matrices count as scalars, matching the
    /// broadcast shape rule.
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Value::Scalar(x) => Some(*x),
            Value::Vector(v) if v.len() == 1 => Some(v[0]),
            Value::Matrix(m) if m.dim() == (1, 1) => Some(m[(0, 0)]),
            _ => None,
        }
    }

    /// Short description of the value kind, used in error messages.
    pub fn kind(&self) -> String {
        match self {
            Value::Scalar(_) => "scalar".to_string(),
            Value::Vector(v) => format!("vector of length {}", v.len()),
            Value::Matrix(m) => {
                let (n, c) = m.dim();
                format!("{n}x{c} matrix")
            }
        }
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Scalar(x)
    }
}

impl From<Array1<f64>> for Value {
    fn from(v: Array1<f64>) -> Self {
        Value::Vector(v)
    }
}

impl From<Array2<f64>> for Value {
    fn from(m: Array2<f64>) -> Self {
        Value::Matrix(m)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::Vector(Array1::from_vec(v))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Scalar(x) => write!(f, "{x}"),
            Value::Vector(v) => write!(f, "{v}"),
            Value::Matrix(m) => write!(f, "{m}"),
        }
    }
}

// Bitwise equality keeps Eq and Hash consistent for use as map keys.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Scalar(a), Value::Scalar(b)) => a.to_bits() == b.to_bits(),
            (Value::Vector(a), Value::Vector(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|(x, y)| x.to_bits() == y.to_bits())
            }
            (Value::Matrix(a), Value::Matrix(b)) => {
                a.dim() == b.dim()
                    && a.iter()
                        .zip(b.iter())
                        .all(|(x, y)| x.to_bits() == y.to_bits())
            }
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Scalar(x) => {
                0u8.hash(state);
                x.to_bits().hash(state);
            }
            Value::Vector(v) => {
                1u8.hash(state);
                v.len().hash(state);
                for x in v.iter() {
                    x.to_bits().hash(state);
                }
            }
            Value::Matrix(m) => {
                2u8.hash(state);
                m.dim().hash(state);
                for x in m.iter() {
                    x.to_bits().hash(state);
                }
            }
        }
    }
}

/// Applies a built-in operator to fully numeric operands.
///
/// `EvaluateSignal` and extension operators are not handled here; the graph
/// evaluator deals with signal sampling itself and dispatches extension
/// operators through the registry.
pub fn apply_builtin(op: Op, args: &[Value]) -> Result<Value, EvalError> {
    match (op, args) {
        (Op::Add, [a, b]) => broadcast_binary(a, b, |x, y| x + y),
        (Op::Sub, [a, b]) => broadcast_binary(a, b, |x, y| x - y),
        (Op::Mul, [a, b]) => broadcast_binary(a, b, |x, y| x * y),
        (Op::Div, [a, b]) => broadcast_binary(a, b, |x, y| x / y),
        (Op::Pow, [a, b]) => broadcast_binary(a, b, f64::powf),
        (Op::Neg, [a]) => Ok(map_unary(a, |x| -x)),
        (Op::MatMul, [a, b]) => matmul(a, b),
        (Op::Transpose, [a]) => transpose(a),
        (op @ (Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Pow | Op::MatMul), _) => {
            Err(arity(op, 2, args.len()))
        }
        (op @ (Op::Neg | Op::Transpose), _) => Err(arity(op, 1, args.len())),
        (op, args) => Err(EvalError::UnsupportedOperands {
            op: format!("{op:?}"),
            operands: describe(args),
        }),
    }
}

fn arity(op: Op, expected: usize, got: usize) -> EvalError {
    EvalError::Shape(ShapeError::Arity {
        op: format!("{op:?}"),
        expected,
        got,
    })
}

fn describe(args: &[Value]) -> String {
    args.iter()
        .map(Value::kind)
        .collect::<Vec<_>>()
        .join(", ")
}

fn map_unary(a: &Value, f: impl Fn(f64) -> f64) -> Value {
    match a {
        Value::Scalar(x) => Value::Scalar(f(*x)),
        Value::Vector(v) => Value::Vector(v.mapv(&f)),
        Value::Matrix(m) => Value::Matrix(m.mapv(&f)),
    }
}

/// Elementwise binary kernel with scalar broadcast.
///
/// Any scalar-shaped operand broadcasts against the other; otherwise the
/// operands must have identical shape.
fn broadcast_binary(a: &Value, b: &Value, f: impl Fn(f64, f64) -> f64) -> Result<Value, EvalError> {
    if let (Some(x), Some(y)) = (a.as_scalar(), b.as_scalar()) {
        return Ok(Value::Scalar(f(x, y)));
    }
    if let Some(x) = a.as_scalar() {
        return Ok(map_unary(b, |y| f(x, y)));
    }
    if let Some(y) = b.as_scalar() {
        return Ok(map_unary(a, |x| f(x, y)));
    }
    match (a, b) {
        (Value::Vector(u), Value::Vector(v)) if u.len() == v.len() => {
            Ok(Value::Vector(ndarray::Zip::from(u).and(v).map_collect(|x, y| f(*x, *y))))
        }
        (Value::Matrix(u), Value::Matrix(v)) if u.dim() == v.dim() => {
            Ok(Value::Matrix(ndarray::Zip::from(u).and(v).map_collect(|x, y| f(*x, *y))))
        }
        _ => Err(EvalError::Shape(ShapeError::Incompatible {
            lhs: a.shape(),
            rhs: b.shape(),
        })),
    }
}

fn matmul(a: &Value, b: &Value) -> Result<Value, EvalError> {
    match (a, b) {
        (Value::Matrix(u), Value::Matrix(v)) => {
            if u.ncols() != v.nrows() {
                return Err(EvalError::Shape(ShapeError::InnerDimension {
                    lhs: a.shape(),
                    rhs: b.shape(),
                }));
            }
            Ok(Value::Matrix(u.dot(v)))
        }
        (Value::Matrix(_), other) | (other, _) => {
            Err(EvalError::Shape(ShapeError::NotAMatrix(other.shape())))
        }
    }
}

fn transpose(a: &Value) -> Result<Value, EvalError> {
    match a {
        Value::Matrix(m) => Ok(Value::Matrix(m.t().to_owned())),
        other => Err(EvalError::Shape(ShapeError::NotAMatrix(other.shape()))),
    }
}
