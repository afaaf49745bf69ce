//! [`TypeRegistry`] – maps unit type names to factories.
//!
//! The builder resolves the `type` field of a unit declaration through this
//! registry.  Populate it once at process start with every unit type the
//! binary links in.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut registry = TypeRegistry::new();
//! registry.register("string-consumer", |_cx, id| StringConsumer::new(id));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use robokit_types::{BuildError, UnitError};

use crate::context::Context;
use crate::unit::{HostedUnit, Managed, Unit};

type Factory = Arc<dyn Fn(&Context, &str) -> Result<Box<dyn HostedUnit>, UnitError> + Send + Sync>;

/// Explicit type-name → factory table.
#[derive(Clone, Default)]
pub struct TypeRegistry {
    factories: HashMap<String, Factory>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an infallible factory.  A previous factory under the same
    /// name is replaced.
    pub fn register<U, F>(&mut self, type_name: impl Into<String>, factory: F) -> &mut Self
    where
        U: Unit,
        F: Fn(&Context, &str) -> U + Send + Sync + 'static,
    {
        self.register_fallible(type_name, move |cx: &Context, id: &str| Ok(factory(cx, id)))
    }

    /// Register a factory that may refuse to construct a unit.
    pub fn register_fallible<U, F>(&mut self, type_name: impl Into<String>, factory: F) -> &mut Self
    where
        U: Unit,
        F: Fn(&Context, &str) -> Result<U, UnitError> + Send + Sync + 'static,
    {
        let factory: Factory = Arc::new(
            move |cx: &Context, id: &str| -> Result<Box<dyn HostedUnit>, UnitError> {
                let unit = factory(cx, id)?;
                Ok(Box::new(Managed::new(unit)))
            },
        );
        self.factories.insert(type_name.into(), factory);
        self
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    /// Registered type names, sorted.
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Construct a unit of `type_name` with identifier `id`.
    ///
    /// # Errors
    ///
    /// [`BuildError::UnknownType`] for unregistered names and
    /// [`BuildError::Construction`] when the factory fails or returns a unit
    /// carrying a different identifier.
    pub(crate) fn instantiate(
        &self,
        type_name: &str,
        context: &Context,
        id: &str,
    ) -> Result<Box<dyn HostedUnit>, BuildError> {
        let factory = self
            .factories
            .get(type_name)
            .ok_or_else(|| BuildError::UnknownType(type_name.to_string()))?;
        let construction = |reason: String| BuildError::Construction {
            type_name: type_name.to_string(),
            id: id.to_string(),
            reason,
        };
        let unit = factory(context, id).map_err(|e| construction(e.to_string()))?;
        if unit.id() != id {
            return Err(construction(format!(
                "factory produced a unit with id '{}'",
                unit.id()
            )));
        }
        Ok(unit)
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.type_names())
            .finish()
    }
}
