//! Backend collaborators: turning expression graphs into callables.
//!
//! A backend owns its own symbolic representation and its own notion of a
//! compiled function. The engine drives it exclusively through the
//! [`Backend`] trait: [`lambdify`](crate::lambdify::lambdify) mints symbol
//! vectors, maps graph nodes onto backend terms with
//! [`apply`](Backend::apply) and [`constant`](Backend::constant), and hands
//! the finished body to [`compile`](Backend::compile).
//!
//! Two backends ship with the crate:
//!
//! - [`InterpBackend`]: a closure-tree interpreter over [`Value`]s,
//!   supporting every operator including vector and matrix operands and
//!   registered extension operators
//! - [`JitBackend`]: native scalar code through Cranelift, restricted to
//!   the scalar arithmetic operators
//!
//! A backend may reject any request with [`BackendError::Unsupported`];
//! the error carries the operator or value kind that was refused.

pub mod interp;
pub mod jit;

pub use interp::{InterpBackend, InterpFunction};
pub use jit::{JitBackend, JitFunction};

use crate::errors::BackendError;
use crate::ops::Op;
use crate::value::Value;

/// Contract between the engine and a compilation target.
///
/// Symbol vectors are allocated in call order; each allocation claims the
/// next contiguous range of input slots, which fixes the calling convention
/// of the compiled function.
pub trait Backend {
    /// The backend's symbolic term representation.
    type Repr: Clone;
    /// The backend's compiled callable.
    type Func;

    /// Allocates a fresh symbol vector of `len` components over the next
    /// `len` input slots.
    fn symbol_vector(&mut self, base: &str, len: usize) -> Result<Self::Repr, BackendError>;

    /// Projects one scalar component out of a symbol vector.
    fn component(&self, vector: &Self::Repr, index: usize) -> Result<Self::Repr, BackendError>;

    /// Embeds a numeric value as a backend term.
    fn constant(&self, value: &Value) -> Result<Self::Repr, BackendError>;

    /// Applies an operator to backend terms.
    fn apply(&mut self, op: Op, args: Vec<Self::Repr>) -> Result<Self::Repr, BackendError>;

    /// Compiles a finished body into a callable taking the arguments in
    /// the order their symbol vectors were allocated.
    fn compile(
        &mut self,
        body: Self::Repr,
        args: &[Self::Repr],
        name: &str,
    ) -> Result<Self::Func, BackendError>;
}
