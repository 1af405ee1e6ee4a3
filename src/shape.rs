//! Shapes and shape-inference rules.
//!
//! Every leaf fixes a [`Shape`] at construction; the shape of an operator
//! node is computed by applying the operator's shape rule to the shapes of
//! its children. Three built-in rules cover the default operator set:
//!
//! - [`broadcast_shape`]: all arguments equal or scalar (the default rule)
//! - [`matmul_shape`]: chained inner-dimension check for matrix products
//! - [`transpose_shape`]: swaps the two axes of a matrix shape
//!
//! Extension operators registered with the operator registry may carry a
//! custom [`ShapeFn`] instead.

use std::fmt;

use crate::errors::ShapeError;

/// The shape of a symbolic or numeric value.
///
/// Scalars are represented as vectors of length one, mirroring the usual
/// convention of flattening model signals into column vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    /// A column vector of the given length
    Vector(usize),
    /// A matrix with the given number of rows and columns
    Matrix(usize, usize),
}

impl Shape {
    /// The scalar shape, a vector of length one.
    pub const fn scalar() -> Self {
        Shape::Vector(1)
    }

    /// Returns true if this is the scalar shape.
    pub fn is_scalar(&self) -> bool {
        matches!(self, Shape::Vector(1))
    }

    /// Total number of scalar components.
    pub fn len(&self) -> usize {
        match self {
            Shape::Vector(n) => *n,
            Shape::Matrix(n, m) => n * m,
        }
    }

    /// Returns true if the shape holds no components.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Vector(n) => write!(f, "({n},)"),
            Shape::Matrix(n, m) => write!(f, "({n}, {m})"),
        }
    }
}

/// Signature of a custom shape-inference rule.
pub type ShapeFn = fn(&[Shape]) -> Result<Shape, ShapeError>;

/// Default rule: all argument shapes must be equal or scalar.
///
/// The result is the common non-scalar shape, or scalar if every argument
/// is scalar.
pub fn broadcast_shape(shapes: &[Shape]) -> Result<Shape, ShapeError> {
    let (&first, rest) = shapes.split_first().ok_or(ShapeError::NoArguments)?;
    let mut this_shape = first;
    for &shape in rest {
        if shape == this_shape || shape.is_scalar() {
            continue;
        }
        if this_shape.is_scalar() {
            this_shape = shape;
        } else {
            return Err(ShapeError::Incompatible {
                lhs: this_shape,
                rhs: shape,
            });
        }
    }
    Ok(this_shape)
}

/// Matrix-product rule: `(n, m) x (m, p) -> (n, p)`, chained left to right.
///
/// Every argument must be matrix-shaped; an inner-dimension mismatch is a
/// [`ShapeError::InnerDimension`].
pub fn matmul_shape(shapes: &[Shape]) -> Result<Shape, ShapeError> {
    let (first, rest) = shapes.split_first().ok_or(ShapeError::NoArguments)?;
    let (n, mut m) = as_matrix(first)?;
    for shape in rest {
        let (n_next, m_next) = as_matrix(shape)?;
        if m != n_next {
            return Err(ShapeError::InnerDimension {
                lhs: Shape::Matrix(n, m),
                rhs: *shape,
            });
        }
        m = m_next;
    }
    Ok(Shape::Matrix(n, m))
}

/// Transpose rule: swaps the two axes of a single matrix shape.
pub fn transpose_shape(shapes: &[Shape]) -> Result<Shape, ShapeError> {
    match shapes {
        [shape] => {
            let (n, m) = as_matrix(shape)?;
            Ok(Shape::Matrix(m, n))
        }
        [] => Err(ShapeError::NoArguments),
        _ => Err(ShapeError::Arity {
            op: "transpose".to_string(),
            expected: 1,
            got: shapes.len(),
        }),
    }
}

fn as_matrix(shape: &Shape) -> Result<(usize, usize), ShapeError> {
    match shape {
        Shape::Matrix(n, m) => Ok((*n, *m)),
        other => Err(ShapeError::NotAMatrix(*other)),
    }
}
