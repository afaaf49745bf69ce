//! In-process button panel for running systems without physical hardware.
//!
//! [`SimButtonPanel`] implements [`ButtonPanel`] and counts every resource
//! operation so tests can assert that units acquire and release the panel
//! exactly once.  Clones share the same panel.
//!
//! # Example
//!
//! ```rust,ignore
//! let panel = SimButtonPanel::new();
//! let unit = ButtonUnit::new("buttons", Arc::new(panel.clone()));
//! // ... build and start a context ...
//! panel.press(Button::Select);
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use robokit_types::UnitError;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::bus::BusAccess;
use crate::button::{Button, ButtonPanel};

/// Presses buffered per listener before new ones are dropped.
pub const DEFAULT_CAPACITY: usize = 16;

/// Resource counters of a [`SimButtonPanel`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PanelStats {
    pub opens: usize,
    pub closes: usize,
    pub subscribes: usize,
    pub unsubscribes: usize,
    pub dropped: usize,
}

#[derive(Default)]
struct Counters {
    opens: AtomicUsize,
    closes: AtomicUsize,
    subscribes: AtomicUsize,
    unsubscribes: AtomicUsize,
    dropped: AtomicUsize,
}

struct Inner {
    capacity: usize,
    fail_open: AtomicBool,
    bus: Mutex<Option<BusAccess>>,
    listener: Mutex<Option<mpsc::Sender<Button>>>,
    counters: Counters,
}

#[derive(Clone)]
pub struct SimButtonPanel {
    inner: Arc<Inner>,
}

impl Default for SimButtonPanel {
    fn default() -> Self {
        Self::new()
    }
}

impl SimButtonPanel {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// A panel buffering at most `capacity` undelivered presses.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                capacity: capacity.max(1),
                fail_open: AtomicBool::new(false),
                bus: Mutex::new(None),
                listener: Mutex::new(None),
                counters: Counters::default(),
            }),
        }
    }

    /// Make the next [`ButtonPanel::open`] calls fail, as an unplugged
    /// device would.
    pub fn fail_open(&self, fail: bool) {
        self.inner.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Simulate a press.  Returns `false` when nobody listens or the
    /// listener's buffer is full.
    pub fn press(&self, button: Button) -> bool {
        let listener = lock(&self.inner.listener);
        let Some(sender) = listener.as_ref() else {
            debug!(%button, "press without listener");
            return false;
        };
        match sender.try_send(button) {
            Ok(()) => true,
            Err(e) => {
                self.inner.counters.dropped.fetch_add(1, Ordering::SeqCst);
                warn!(%button, error = %e, "press dropped");
                false
            }
        }
    }

    /// The bus the panel is currently opened on.
    pub fn bus(&self) -> Option<BusAccess> {
        *lock(&self.inner.bus)
    }

    pub fn stats(&self) -> PanelStats {
        let c = &self.inner.counters;
        PanelStats {
            opens: c.opens.load(Ordering::SeqCst),
            closes: c.closes.load(Ordering::SeqCst),
            subscribes: c.subscribes.load(Ordering::SeqCst),
            unsubscribes: c.unsubscribes.load(Ordering::SeqCst),
            dropped: c.dropped.load(Ordering::SeqCst),
        }
    }
}

impl ButtonPanel for SimButtonPanel {
    fn open(&self, bus: BusAccess) -> Result<(), UnitError> {
        if self.inner.fail_open.load(Ordering::SeqCst) {
            return Err(UnitError::Hardware {
                component: format!("button panel {bus}"),
                details: "no acknowledge from device".to_string(),
            });
        }
        *lock(&self.inner.bus) = Some(bus);
        self.inner.counters.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe(&self) -> Result<mpsc::Receiver<Button>, UnitError> {
        let (sender, receiver) = mpsc::channel(self.inner.capacity);
        if lock(&self.inner.listener).replace(sender).is_some() {
            warn!("button listener replaced");
        }
        self.inner.counters.subscribes.fetch_add(1, Ordering::SeqCst);
        Ok(receiver)
    }

    fn unsubscribe(&self) {
        if lock(&self.inner.listener).take().is_some() {
            self.inner.counters.unsubscribes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn close(&self) -> Result<(), UnitError> {
        lock(&self.inner.bus).take();
        self.inner.counters.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
