//! [`Builder`] – assembles a finished, immutable [`Context`].
//!
//! Units can be added as ready-made objects, by registered type name, or from
//! a declarative definition document (see [`crate::definition`]).  Every
//! `add_*` call consumes the builder and hands it back on success, so a
//! failed step leaves nothing behind that could be built by accident.
//!
//! # Example
//!
//! ```rust,ignore
//! let context = Builder::with_registry(registry)
//!     .add_configured("string-producer", &config, "producer")?
//!     .add_type("string-consumer", "consumer")?
//!     .build();
//! context.start().await;
//! ```

use std::collections::HashSet;
use std::io::Read;

use robokit_types::{BuildError, Configuration};
use tracing::debug;

use crate::context::Context;
use crate::definition::{self, Declaration};
use crate::registry::TypeRegistry;
use crate::unit::{HostedUnit, Managed, Unit};

/// Assembly-time collector of units.
pub struct Builder {
    context: Context,
    registry: TypeRegistry,
    units: Vec<Box<dyn HostedUnit>>,
    ids: HashSet<String>,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    /// A builder without any registered unit types.
    pub fn new() -> Self {
        Self::with_registry(TypeRegistry::new())
    }

    pub fn with_registry(registry: TypeRegistry) -> Self {
        Self {
            context: Context::new(),
            registry,
            units: Vec::new(),
            ids: HashSet::new(),
        }
    }

    /// The not-yet-started context units are being built against.
    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Add a constructed unit.  It stays `Uninitialized` unless it was
    /// wrapped and initialized beforehand (see [`Builder::add_managed`]).
    ///
    /// # Errors
    ///
    /// [`BuildError::DuplicateId`] if the identifier is already taken.
    pub fn add<U: Unit>(self, unit: U) -> Result<Self, BuildError> {
        self.add_managed(Managed::new(unit))
    }

    /// Add a unit that may already have been initialized.
    pub fn add_managed<U: Unit>(mut self, unit: Managed<U>) -> Result<Self, BuildError> {
        self.push(Box::new(unit))?;
        Ok(self)
    }

    /// Instantiate `type_name` under `id` without initializing it.
    ///
    /// # Errors
    ///
    /// [`BuildError::UnknownType`], [`BuildError::Construction`] or
    /// [`BuildError::DuplicateId`].
    pub fn add_type(mut self, type_name: &str, id: &str) -> Result<Self, BuildError> {
        let unit = self.registry.instantiate(type_name, &self.context, id)?;
        self.push(unit)?;
        Ok(self)
    }

    /// Instantiate `type_name` under `id` and initialize it with `config`.
    ///
    /// # Errors
    ///
    /// As [`Builder::add_type`], plus [`BuildError::Initialization`] when the
    /// unit rejects its configuration.  The unit is not registered then.
    pub fn add_configured(
        mut self,
        type_name: &str,
        config: &Configuration,
        id: &str,
    ) -> Result<Self, BuildError> {
        self.instantiate(type_name, Some(config), id)?;
        Ok(self)
    }

    /// Add every unit declared in a definition document read from `reader`.
    ///
    /// The reader is consumed to the end and the document parsed as a whole
    /// before any unit is instantiated.  Declarations lacking an id or a type
    /// are logged and skipped, together with any bad values they contain.  The
    /// first declaration that cannot be instantiated or initialized aborts
    /// the rest of the document.
    ///
    /// # Errors
    ///
    /// [`BuildError::Io`], [`BuildError::Definition`] for malformed
    /// documents, or any error of [`Builder::add_configured`].
    pub fn add_definitions<R: Read>(self, mut reader: R) -> Result<Self, BuildError> {
        let mut source = String::new();
        reader.read_to_string(&mut source)?;
        self.add_definitions_str(&source)
    }

    /// As [`Builder::add_definitions`], for a document already in memory.
    pub fn add_definitions_str(mut self, source: &str) -> Result<Self, BuildError> {
        definition::parse(source, |declaration| self.declare(declaration))?;
        Ok(self)
    }

    /// Register every accumulated unit and return the finished context.
    pub fn build(self) -> Context {
        self.context.register(self.units);
        self.context
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn declare(&mut self, declaration: Declaration) -> Result<(), BuildError> {
        debug!(
            unit = %declaration.id,
            type_name = %declaration.type_name,
            "loading declared unit"
        );
        self.instantiate(
            &declaration.type_name,
            declaration.config.as_ref(),
            &declaration.id,
        )
    }

    fn instantiate(
        &mut self,
        type_name: &str,
        config: Option<&Configuration>,
        id: &str,
    ) -> Result<(), BuildError> {
        let mut unit = self.registry.instantiate(type_name, &self.context, id)?;
        if let Some(config) = config {
            unit.initialize(config)
                .map_err(|source| BuildError::Initialization {
                    id: id.to_string(),
                    source,
                })?;
        }
        self.push(unit)
    }

    fn push(&mut self, unit: Box<dyn HostedUnit>) -> Result<(), BuildError> {
        if !self.ids.insert(unit.id().to_string()) {
            return Err(BuildError::DuplicateId(unit.id().to_string()));
        }
        debug!(unit = %unit.id(), state = %unit.state_cell().get(), "unit added");
        self.units.push(unit);
        Ok(())
    }
}
