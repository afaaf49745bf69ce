//! `robokit-core` – the unit runtime.
//!
//! Hosts independently-lifecycled units, routes typed messages between them,
//! and starts and stops them as one system.
//!
//! # Modules
//!
//! - [`unit`] – the [`Unit`] trait every component implements, the
//!   [`Managed`] wrapper that tracks a unit's
//!   [`LifecycleState`][robokit_types::LifecycleState], and the
//!   [`UnitContext`] passed to every hook.
//! - [`reference`] – [`Reference`]: a cloneable, typed handle that enqueues
//!   messages for exactly one unit.
//! - [`context`] – [`Context`]: the immutable unit directory with lookup by
//!   identifier or message type, plus concurrent start and two-phase
//!   shutdown.
//! - [`builder`] – [`Builder`]: assembles a context from unit objects,
//!   registered type names, or definition documents.
//! - [`registry`] – [`TypeRegistry`]: explicit type-name → factory table used
//!   by the builder.
//! - [`definition`] – the declarative unit definition format and its parser.
//! - [`scheduler`] – [`Scheduler`]: delayed and periodic message delivery
//!   with a [`FinalInvocationListener`] for finite series.
//!
//! # Execution model
//!
//! Every unit runs on its own Tokio task.  Hooks and message handlers of one
//! unit never overlap; different units run concurrently.  A unit that fails
//! (error or panic in any hook) moves to `Failed` without affecting its
//! siblings.

pub mod builder;
pub mod context;
pub mod definition;
pub mod reference;
pub mod registry;
pub mod scheduler;
pub mod unit;

mod worker;

pub use builder::Builder;
pub use context::Context;
pub use definition::Declaration;
pub use reference::Reference;
pub use registry::TypeRegistry;
pub use scheduler::{FinalInvocationListener, Repeat, ScheduledSeries, Scheduler};
pub use unit::{Managed, Unit, UnitContext};

// Unit implementations need the attribute macro; re-exported so they do not
// have to depend on `async-trait` directly.
pub use async_trait::async_trait;
pub use robokit_types::{
    BuildError, ConfigError, ConfigValue, Configuration, ConfigurationBuilder, ContextError,
    DefinitionError, LifecycleState, UnitError,
};
