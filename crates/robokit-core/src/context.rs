//! [`Context`] – owner of every unit in one running system.
//!
//! A context is produced by [`Builder::build`][crate::builder::Builder::build]
//! and is read-only afterwards: the set of units cannot change, so lookups
//! need no registry-wide locking.
//!
//! # Orchestration
//!
//! - [`Context::start`] launches one worker per unit and starts all units
//!   concurrently.
//! - [`Context::shutdown`] stops every started unit, then shuts every unit
//!   down, both phases concurrently.  A failing unit never prevents its
//!   siblings from shutting down.
//!
//! # Aggregate state
//!
//! | Context state | Meaning |
//! |---|---|
//! | `Uninitialized` | built, `start` not called yet |
//! | `Starting` | `start` running, or some live unit not yet `Started` |
//! | `Started` | every non-failed unit reported `Started` |
//! | `Failed` | every unit failed during start |
//! | `Stopping` / `Stopped` | `shutdown` running |
//! | `ShutDown` | `shutdown` finished |

use std::any::{Any, type_name};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use futures_util::future::join_all;
use robokit_types::{ContextError, LifecycleState};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::reference::Reference;
use crate::scheduler::Scheduler;
use crate::unit::{HostedUnit, StateCell};
use crate::worker::{Command, Controller};

// ─────────────────────────────────────────────────────────────────────────────
// Registry entries
// ─────────────────────────────────────────────────────────────────────────────

enum Slot {
    /// Registered, worker not launched yet.
    Pending(Box<dyn HostedUnit>),
    Running {
        controller: Controller,
        handle: Option<tokio::task::JoinHandle<()>>,
    },
    /// Only observed under the slot lock, while a worker is being launched.
    Launching,
}

struct Entry {
    state: StateCell,
    reference: Arc<dyn Any + Send + Sync>,
    message_type: &'static str,
    slot: Mutex<Slot>,
}

impl Entry {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct ContextInner {
    state: StateCell,
    units: OnceLock<BTreeMap<String, Entry>>,
    closing: watch::Sender<bool>,
    shutting_down: AtomicBool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Context
// ─────────────────────────────────────────────────────────────────────────────

/// The system-wide unit directory and orchestration entry point.
///
/// Clone it cheaply – all clones share the same units.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    pub(crate) fn new() -> Self {
        let (closing, _) = watch::channel(false);
        Self {
            inner: Arc::new(ContextInner {
                state: StateCell::new(LifecycleState::Uninitialized),
                units: OnceLock::new(),
                closing,
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    /// Register the final unit set.  Called once, by the builder.
    pub(crate) fn register(&self, units: Vec<Box<dyn HostedUnit>>) {
        let entries: BTreeMap<String, Entry> = units
            .into_iter()
            .map(|unit| {
                let id = unit.id().to_string();
                let entry = Entry {
                    state: unit.state_cell(),
                    reference: unit.reference_any(),
                    message_type: unit.message_type(),
                    slot: Mutex::new(Slot::Pending(unit)),
                };
                (id, entry)
            })
            .collect();
        let count = entries.len();
        if self.inner.units.set(entries).is_err() {
            warn!("context units were already registered; ignoring second registration");
            return;
        }
        info!(units = count, "context built");
    }

    fn units(&self) -> impl Iterator<Item = (&String, &Entry)> {
        self.inner.units.get().into_iter().flatten()
    }

    fn entry(&self, id: &str) -> Result<&Entry, ContextError> {
        self.inner
            .units
            .get()
            .and_then(|units| units.get(id))
            .ok_or_else(|| ContextError::NotFound { id: id.to_string() })
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    /// Resolve the reference of the unit registered under `id`.
    ///
    /// # Errors
    ///
    /// [`ContextError::NotFound`] for unknown identifiers and
    /// [`ContextError::MessageTypeMismatch`] when the unit does not accept
    /// `M`.  Never returns a reference to a different unit.
    pub fn reference<M: Send + 'static>(&self, id: &str) -> Result<Reference<M>, ContextError> {
        let entry = self.entry(id)?;
        entry
            .reference
            .downcast_ref::<Reference<M>>()
            .cloned()
            .ok_or_else(|| ContextError::MessageTypeMismatch {
                id: id.to_string(),
                expected: type_name::<M>(),
            })
    }

    /// References of every unit accepting `M`, ordered by identifier.
    pub fn references_of<M: Send + 'static>(&self) -> Vec<Reference<M>> {
        self.units()
            .filter_map(|(_, entry)| entry.reference.downcast_ref::<Reference<M>>().cloned())
            .collect()
    }

    /// Registered identifiers in ascending order.
    pub fn ids(&self) -> Vec<String> {
        self.units().map(|(id, _)| id.clone()).collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entry(id).is_ok()
    }

    /// Name of the message type accepted by unit `id`.
    pub fn message_type(&self, id: &str) -> Result<&'static str, ContextError> {
        Ok(self.entry(id)?.message_type)
    }

    pub fn unit_state(&self, id: &str) -> Result<LifecycleState, ContextError> {
        Ok(self.entry(id)?.state.get())
    }

    /// Snapshot of every unit's state.
    pub fn states(&self) -> BTreeMap<String, LifecycleState> {
        self.units()
            .map(|(id, entry)| (id.clone(), entry.state.get()))
            .collect()
    }

    /// The context's own state; see the module documentation.
    pub fn state(&self) -> LifecycleState {
        let state = self.inner.state.get();
        if state == LifecycleState::Started {
            self.aggregate()
        } else {
            state
        }
    }

    fn aggregate(&self) -> LifecycleState {
        let mut any = false;
        let mut live = 0usize;
        let mut started = 0usize;
        for (_, entry) in self.units() {
            any = true;
            match entry.state.get() {
                LifecycleState::Failed => {}
                LifecycleState::Started => {
                    live += 1;
                    started += 1;
                }
                _ => live += 1,
            }
        }
        if any && live == 0 {
            LifecycleState::Failed
        } else if started == live {
            LifecycleState::Started
        } else {
            LifecycleState::Starting
        }
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(self.clone())
    }

    /// Flips to `true` when shutdown begins.
    pub(crate) fn closing(&self) -> watch::Receiver<bool> {
        self.inner.closing.subscribe()
    }

    // -----------------------------------------------------------------------
    // Orchestration
    // -----------------------------------------------------------------------

    /// Start every unit concurrently and wait until each has left
    /// `Starting`.  Only the first call has an effect.
    ///
    /// Must be awaited on a Tokio runtime.  A unit whose start hook hangs
    /// blocks this call.
    pub async fn start(&self) {
        if !self
            .inner
            .state
            .transition(LifecycleState::Uninitialized, LifecycleState::Starting)
        {
            warn!(state = %self.inner.state.get(), "context start ignored");
            return;
        }
        let controllers: Vec<Controller> = self
            .units()
            .filter_map(|(_, entry)| self.launch(entry))
            .collect();
        join_all(controllers.iter().map(|c| c.request(Command::Start))).await;

        // Shutdown may have begun while units were starting.
        if self
            .inner
            .state
            .transition(LifecycleState::Starting, LifecycleState::Started)
        {
            info!(state = %self.state(), "context started");
        }
    }

    /// Stop and shut down every unit.  Equivalent to
    /// [`Context::shutdown_with_grace`] with a zero grace period.
    pub async fn shutdown(&self) {
        self.shutdown_with_grace(Duration::ZERO).await;
    }

    /// Stop every started unit, wait `grace`, then shut every unit down.
    ///
    /// Safe to call in any state; only the first call has an effect.  Scheduled
    /// series are cancelled as soon as shutdown begins.
    pub async fn shutdown_with_grace(&self, grace: Duration) {
        if self.inner.shutting_down.swap(true, Ordering::AcqRel) {
            debug!("context shutdown already in progress");
            return;
        }
        self.inner.closing.send_replace(true);
        self.inner.state.set(LifecycleState::Stopping);

        let running: Vec<Controller> = self
            .units()
            .filter_map(|(_, entry)| match &*entry.slot() {
                Slot::Running { controller, .. } => Some(controller.clone()),
                Slot::Pending(_) | Slot::Launching => None,
            })
            .collect();
        join_all(running.iter().map(|c| c.request(Command::Stop))).await;

        if !grace.is_zero() {
            tokio::time::sleep(grace).await;
        }
        self.inner.state.set(LifecycleState::Stopped);

        let all: Vec<Controller> = self
            .units()
            .filter_map(|(_, entry)| self.launch(entry))
            .collect();
        join_all(all.iter().map(|c| c.request(Command::Shutdown))).await;

        let handles: Vec<_> = self
            .units()
            .filter_map(|(_, entry)| match &mut *entry.slot() {
                Slot::Running { handle, .. } => handle.take(),
                Slot::Pending(_) | Slot::Launching => None,
            })
            .collect();
        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "unit worker ended abnormally");
            }
        }

        self.inner.state.set(LifecycleState::ShutDown);
        info!(states = ?self.states(), "context shut down");
    }

    /// Launch the worker of `entry` if needed and return its controller.
    fn launch(&self, entry: &Entry) -> Option<Controller> {
        let mut slot = entry.slot();
        if let Slot::Running { controller, .. } = &*slot {
            return Some(controller.clone());
        }
        let Slot::Pending(unit) = std::mem::replace(&mut *slot, Slot::Launching) else {
            return None;
        };
        let worker = unit.launch(self.clone());
        let controller = worker.controller.clone();
        *slot = Slot::Running {
            controller: worker.controller,
            handle: Some(worker.handle),
        };
        Some(controller)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("state", &self.state())
            .field("units", &self.states())
            .finish()
    }
}
