//! The [`Unit`] contract and the [`Managed`] lifecycle cell around it.
//!
//! Every hardware driver or logic component implements [`Unit`].  The
//! runtime owns the unit after it has been added to a
//! [`Builder`][crate::builder::Builder] and calls its hooks from a single
//! worker task, so a unit never sees two hooks or two messages at once.
//!
//! # Lifecycle
//!
//! | Hook | Transition |
//! |---|---|
//! | [`Unit::on_initialization`] | `Uninitialized → Initialized` |
//! | [`Unit::start`] | `Initialized → Starting → Started` |
//! | [`Unit::stop`] | `Started → Stopping → Stopped` |
//! | [`Unit::shutdown`] | `Stopped → ShutDown` |
//!
//! A hook returning an error (or panicking) moves the unit, and only that
//! unit, to [`LifecycleState::Failed`].
//!
//! Hooks run on the Tokio runtime.  Drivers that block on hardware should
//! wrap the blocking section in [`tokio::task::spawn_blocking`].

use std::any::{Any, type_name};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;
use robokit_types::{ConfigError, Configuration, ContextError, LifecycleState, UnitError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::context::Context;
use crate::reference::Reference;
use crate::scheduler::Scheduler;
use crate::worker::Worker;

// ─────────────────────────────────────────────────────────────────────────────
// Unit trait
// ─────────────────────────────────────────────────────────────────────────────

/// An independently-lifecycled component participating in the runtime.
///
/// Only [`Unit::id`] and [`Unit::on_message`] are mandatory; the remaining
/// hooks default to no-ops.
#[async_trait]
pub trait Unit: Send + 'static {
    /// The one message type this unit accepts.
    type Message: Send + 'static;

    /// Identifier, unique within one context.
    fn id(&self) -> &str;

    /// Read the unit's configuration.  Runs at most once, at assembly time.
    ///
    /// # Errors
    ///
    /// Return a [`ConfigError`] for missing or malformed keys.
    fn on_initialization(&mut self, config: &Configuration) -> Result<(), ConfigError> {
        let _ = config;
        Ok(())
    }

    /// Acquire resources (hardware handles, listeners) and resolve peers.
    async fn start(&mut self, cx: &UnitContext) -> Result<(), UnitError> {
        let _ = cx;
        Ok(())
    }

    /// Handle one message.  Called sequentially, in arrival order.
    ///
    /// The runtime delivers messages in every non-failed state; units that
    /// only act while running should check [`UnitContext::state`].
    async fn on_message(&mut self, cx: &UnitContext, message: Self::Message)
        -> Result<(), UnitError>;

    /// Release what [`Unit::start`] acquired.  Called at most once.
    async fn stop(&mut self, cx: &UnitContext) -> Result<(), UnitError> {
        let _ = cx;
        Ok(())
    }

    /// Release what the unit acquired during initialization.  Called at most
    /// once, also for units whose start failed.
    async fn shutdown(&mut self, cx: &UnitContext) -> Result<(), UnitError> {
        let _ = cx;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared state cell
// ─────────────────────────────────────────────────────────────────────────────

/// Lock-free [`LifecycleState`] shared between a worker and observers.
#[derive(Clone, Debug)]
pub(crate) struct StateCell(Arc<AtomicU8>);

impl StateCell {
    pub(crate) fn new(state: LifecycleState) -> Self {
        Self(Arc::new(AtomicU8::new(state.into())))
    }

    pub(crate) fn get(&self) -> LifecycleState {
        // Only valid discriminants are ever stored.
        LifecycleState::try_from(self.0.load(Ordering::Acquire)).unwrap_or(LifecycleState::Failed)
    }

    pub(crate) fn set(&self, state: LifecycleState) {
        self.0.store(state.into(), Ordering::Release);
    }

    /// Atomically move from `from` to `to`.  Returns `false` if the cell held
    /// another state.
    pub(crate) fn transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        self.0
            .compare_exchange(from.into(), to.into(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// UnitContext
// ─────────────────────────────────────────────────────────────────────────────

/// What a unit sees of the runtime while one of its hooks runs.
#[derive(Clone)]
pub struct UnitContext {
    id: Arc<str>,
    state: StateCell,
    context: Context,
}

impl UnitContext {
    pub(crate) fn new(id: Arc<str>, state: StateCell, context: Context) -> Self {
        Self { id, state, context }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The unit's current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.state.get()
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Resolve a peer through the owning context.
    ///
    /// # Errors
    ///
    /// See [`Context::reference`].
    pub fn reference<M: Send + 'static>(&self, id: &str) -> Result<Reference<M>, ContextError> {
        self.context.reference(id)
    }

    pub fn scheduler(&self) -> Scheduler {
        self.context.scheduler()
    }

    pub(crate) fn set_state(&self, state: LifecycleState) {
        self.state.set(state);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Managed
// ─────────────────────────────────────────────────────────────────────────────

/// A unit together with its lifecycle state and mailbox.
///
/// Wrap a unit in `Managed` to initialize it before handing it to
/// [`Builder::add_managed`][crate::builder::Builder::add_managed].  The
/// mailbox exists from construction on, so messages sent before the context
/// starts are queued and delivered once the worker runs.
pub struct Managed<U: Unit> {
    unit: U,
    id: Arc<str>,
    state: StateCell,
    sender: mpsc::UnboundedSender<U::Message>,
    mailbox: mpsc::UnboundedReceiver<U::Message>,
}

impl<U: Unit> Managed<U> {
    pub fn new(unit: U) -> Self {
        let id: Arc<str> = Arc::from(unit.id());
        let (sender, mailbox) = mpsc::unbounded_channel();
        Self {
            unit,
            id,
            state: StateCell::new(LifecycleState::Uninitialized),
            sender,
            mailbox,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> LifecycleState {
        self.state.get()
    }

    pub fn unit(&self) -> &U {
        &self.unit
    }

    /// Run the initialization hook with `config`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::AlreadyInitialized`] on a second call, or whatever the
    /// hook reports.  Either way the unit moves to `Failed`.
    pub fn initialize(&mut self, config: &Configuration) -> Result<(), ConfigError> {
        if self.state.get() != LifecycleState::Uninitialized {
            self.state.set(LifecycleState::Failed);
            return Err(ConfigError::AlreadyInitialized {
                id: self.id.to_string(),
            });
        }
        match self.unit.on_initialization(config) {
            Ok(()) => {
                self.state.set(LifecycleState::Initialized);
                debug!(unit = %self.id, "unit initialized");
                Ok(())
            }
            Err(e) => {
                self.state.set(LifecycleState::Failed);
                warn!(unit = %self.id, error = %e, "unit initialization failed");
                Err(e)
            }
        }
    }

    /// A reference to this unit.  Usable before the context is built.
    pub fn reference(&self) -> Reference<U::Message> {
        Reference::new(self.id.clone(), self.sender.clone())
    }
}

impl<U: Unit> From<U> for Managed<U> {
    fn from(unit: U) -> Self {
        Managed::new(unit)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Type-erased view used by the builder and the context
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) trait HostedUnit: Send {
    fn id(&self) -> &str;
    fn state_cell(&self) -> StateCell;
    fn message_type(&self) -> &'static str;
    fn reference_any(&self) -> Arc<dyn Any + Send + Sync>;
    fn initialize(&mut self, config: &Configuration) -> Result<(), ConfigError>;
    fn launch(self: Box<Self>, context: Context) -> Worker;
}

impl<U: Unit> HostedUnit for Managed<U> {
    fn id(&self) -> &str {
        &self.id
    }

    fn state_cell(&self) -> StateCell {
        self.state.clone()
    }

    fn message_type(&self) -> &'static str {
        type_name::<U::Message>()
    }

    fn reference_any(&self) -> Arc<dyn Any + Send + Sync> {
        Arc::new(self.reference())
    }

    fn initialize(&mut self, config: &Configuration) -> Result<(), ConfigError> {
        Managed::initialize(self, config)
    }

    fn launch(self: Box<Self>, context: Context) -> Worker {
        let Managed {
            unit,
            id,
            state,
            mailbox,
            ..
        } = *self;
        Worker::spawn(unit, UnitContext::new(id, state, context), mailbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Lamp {
        id: String,
        color: Option<String>,
    }

    #[async_trait]
    impl Unit for Lamp {
        type Message = ();

        fn id(&self) -> &str {
            &self.id
        }

        fn on_initialization(&mut self, config: &Configuration) -> Result<(), ConfigError> {
            self.color = Some(config.require_string("color")?.to_string());
            Ok(())
        }

        async fn on_message(&mut self, _cx: &UnitContext, _message: ()) -> Result<(), UnitError> {
            Ok(())
        }
    }

    fn lamp() -> Managed<Lamp> {
        Managed::new(Lamp {
            id: "lamp".to_string(),
            color: None,
        })
    }

    #[test]
    fn initialization_moves_to_initialized() {
        let mut managed = lamp();
        assert_eq!(managed.state(), LifecycleState::Uninitialized);
        let config = Configuration::builder().with_string("color", "red").build();
        managed.initialize(&config).unwrap();
        assert_eq!(managed.state(), LifecycleState::Initialized);
        assert_eq!(managed.unit().color.as_deref(), Some("red"));
    }

    #[test]
    fn missing_key_fails_the_unit() {
        let mut managed = lamp();
        let err = managed.initialize(&Configuration::empty()).unwrap_err();
        assert_eq!(err, ConfigError::missing("color"));
        assert_eq!(managed.state(), LifecycleState::Failed);
    }

    #[test]
    fn second_initialization_fails_the_unit() {
        let mut managed = lamp();
        let config = Configuration::builder().with_string("color", "red").build();
        managed.initialize(&config).unwrap();
        let err = managed.initialize(&config).unwrap_err();
        assert!(matches!(err, ConfigError::AlreadyInitialized { .. }));
        assert_eq!(managed.state(), LifecycleState::Failed);
    }

    #[test]
    fn state_cell_transition_is_conditional() {
        let cell = StateCell::new(LifecycleState::Uninitialized);
        assert!(cell.transition(LifecycleState::Uninitialized, LifecycleState::Starting));
        assert!(!cell.transition(LifecycleState::Uninitialized, LifecycleState::Started));
        assert_eq!(cell.get(), LifecycleState::Starting);
    }

    #[test]
    fn reference_carries_the_unit_id() {
        let managed = lamp();
        assert_eq!(managed.reference().id(), "lamp");
        assert_eq!(HostedUnit::message_type(&managed), "()");
    }
}
