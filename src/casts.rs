//! Registry for casting foreign numeric types into graph-embeddable form.
//!
//! Backend and user code deal in their own numeric types (`f64`, `Vec<f64>`,
//! ndarray arrays, nalgebra vectors behind the `nalgebra` feature, ...).
//! The cast registry is the single boundary where those types are converted
//! into something the engine understands, via an explicit `(from, to)`
//! dispatch table resolved at registration time.
//!
//! Registering the same `(from, to)` pair twice is a fatal configuration
//! error. Casting without an explicit target requires exactly one converter
//! for the source type.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use ndarray::{Array1, Array2};

use crate::errors::{CastError, RegistryError};
use crate::value::Value;

type Caster = Arc<dyn Fn(&dyn Any) -> Box<dyn Any> + Send + Sync>;

struct CastEntry {
    to: TypeId,
    caster: Caster,
}

/// Table of `(from, to)` converters.
#[derive(Default)]
pub struct CastRegistry {
    by_from: HashMap<TypeId, Vec<CastEntry>>,
    from_names: HashMap<TypeId, &'static str>,
}

impl CastRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a converter from `F` to `T`.
    ///
    /// # Errors
    /// [`RegistryError::DuplicateCast`] if a converter for this pair is
    /// already defined.
    pub fn register<F, T>(
        &mut self,
        caster: impl Fn(&F) -> T + Send + Sync + 'static,
    ) -> Result<(), RegistryError>
    where
        F: Any,
        T: Any,
    {
        let from = TypeId::of::<F>();
        let to = TypeId::of::<T>();
        let entries = self.by_from.entry(from).or_default();
        if entries.iter().any(|entry| entry.to == to) {
            return Err(RegistryError::DuplicateCast {
                from: type_name::<F>(),
                to: type_name::<T>(),
            });
        }
        entries.push(CastEntry {
            to,
            caster: Arc::new(move |value: &dyn Any| {
                // The table is keyed by TypeId, so the downcast cannot fail.
                let value = value.downcast_ref::<F>().expect("cast table type mismatch");
                Box::new(caster(value)) as Box<dyn Any>
            }),
        });
        self.from_names.insert(from, type_name::<F>());
        Ok(())
    }

    /// Casts a value using the single converter registered for its type.
    ///
    /// # Errors
    /// * [`CastError::UnknownCast`] if no converter is registered
    /// * [`CastError::AmbiguousCast`] if more than one converter is
    ///   registered and no target type was specified
    pub fn cast(&self, value: &dyn Any) -> Result<Box<dyn Any>, CastError> {
        let from = value.type_id();
        let entries = self
            .by_from
            .get(&from)
            .ok_or_else(|| CastError::UnknownCast(self.describe(from)))?;
        match entries.as_slice() {
            [entry] => Ok((entry.caster)(value)),
            _ => Err(CastError::AmbiguousCast(self.describe(from))),
        }
    }

    /// Casts a value to an explicit target type.
    pub fn cast_to<T: Any>(&self, value: &dyn Any) -> Result<T, CastError> {
        let from = value.type_id();
        let to = TypeId::of::<T>();
        let entry = self
            .by_from
            .get(&from)
            .and_then(|entries| entries.iter().find(|entry| entry.to == to))
            .ok_or_else(|| {
                CastError::UnknownCast(format!("{} to {}", self.describe(from), type_name::<T>()))
            })?;
        Ok(*(entry.caster)(value)
            .downcast::<T>()
            .expect("cast table type mismatch"))
    }

    /// Casts a value to the type of an exemplar value.
    pub fn cast_like(&self, value: &dyn Any, exemplar: &dyn Any) -> Result<Box<dyn Any>, CastError> {
        let from = value.type_id();
        let to = exemplar.type_id();
        let entry = self
            .by_from
            .get(&from)
            .and_then(|entries| entries.iter().find(|entry| entry.to == to))
            .ok_or_else(|| {
                CastError::UnknownCast(format!("{} to {}", self.describe(from), self.describe(to)))
            })?;
        Ok((entry.caster)(value))
    }

    fn describe(&self, from: TypeId) -> String {
        self.from_names
            .get(&from)
            .map(|name| name.to_string())
            .unwrap_or_else(|| format!("{from:?}"))
    }
}

/// Installs the converters every context starts with: plain Rust numerics
/// and ndarray containers into [`Value`], plus nalgebra containers when the
/// `nalgebra` feature is enabled.
pub fn register_default_casts(registry: &mut CastRegistry) -> Result<(), RegistryError> {
    registry.register(|x: &f64| Value::Scalar(*x))?;
    registry.register(|x: &i64| Value::Scalar(*x as f64))?;
    registry.register(|v: &Vec<f64>| Value::Vector(Array1::from_vec(v.clone())))?;
    registry.register(|v: &Array1<f64>| Value::Vector(v.clone()))?;
    registry.register(|m: &Array2<f64>| Value::Matrix(m.clone()))?;

    #[cfg(feature = "nalgebra")]
    {
        registry.register(|v: &nalgebra::DVector<f64>| {
            Value::Vector(Array1::from_iter(v.iter().copied()))
        })?;
        registry.register(|m: &nalgebra::DMatrix<f64>| {
            let (rows, cols) = m.shape();
            Value::Matrix(Array2::from_shape_fn((rows, cols), |(i, j)| m[(i, j)]))
        })?;
    }

    Ok(())
}
