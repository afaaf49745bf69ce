//! [`Scheduler`] – delayed and periodic message delivery.
//!
//! Every schedule call spawns one Tokio task that sleeps, invokes, and repeats
//! according to its [`Repeat`] policy.  A series ends when
//!
//! - its repeat count is exhausted (the final-invocation listener runs),
//! - it is cancelled through its [`ScheduledSeries`] handle, or
//! - the owning [`Context`] begins shutting down.
//!
//! Only natural exhaustion notifies the listener.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use crate::context::Context;
use crate::reference::Reference;

/// How often a scheduled action runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    /// Once, after the initial delay.
    Once,
    /// `count` times, `interval` apart.  A count of zero finishes at once.
    Times { count: u32, interval: Duration },
    /// Until cancelled or the context shuts down.
    Forever { interval: Duration },
}

impl Repeat {
    fn total(self) -> Option<u64> {
        match self {
            Repeat::Once => Some(1),
            Repeat::Times { count, .. } => Some(u64::from(count)),
            Repeat::Forever { .. } => None,
        }
    }

    fn interval(self) -> Duration {
        match self {
            Repeat::Once => Duration::ZERO,
            Repeat::Times { interval, .. } | Repeat::Forever { interval } => interval,
        }
    }
}

/// Called once after the last invocation of a finite series.
pub trait FinalInvocationListener: Send + 'static {
    fn on_final_invocation(self: Box<Self>, context: &Context);
}

impl<F> FinalInvocationListener for F
where
    F: FnOnce(&Context) + Send + 'static,
{
    fn on_final_invocation(self: Box<Self>, context: &Context) {
        (*self)(context)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Series handle
// ─────────────────────────────────────────────────────────────────────────────

struct SeriesState {
    id: Uuid,
    cancelled: AtomicBool,
    finished: AtomicBool,
    invocations: AtomicU64,
    wake: Notify,
}

/// Handle to one scheduled series.  Dropping it does not cancel the series.
#[derive(Clone)]
pub struct ScheduledSeries {
    state: Arc<SeriesState>,
}

impl ScheduledSeries {
    fn new() -> Self {
        Self {
            state: Arc::new(SeriesState {
                id: Uuid::new_v4(),
                cancelled: AtomicBool::new(false),
                finished: AtomicBool::new(false),
                invocations: AtomicU64::new(0),
                wake: Notify::new(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.state.id
    }

    /// Stop the series.  An invocation already running completes; no further
    /// invocation starts and the listener is not called.
    pub fn cancel(&self) {
        if !self.state.cancelled.swap(true, Ordering::AcqRel) {
            self.state.wake.notify_one();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Invocations completed so far.
    pub fn invocations(&self) -> u64 {
        self.state.invocations.load(Ordering::Acquire)
    }

    /// `true` once the series' task has ended, for whatever reason.
    pub fn is_finished(&self) -> bool {
        self.state.finished.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for ScheduledSeries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledSeries")
            .field("id", &self.state.id)
            .field("invocations", &self.invocations())
            .field("cancelled", &self.is_cancelled())
            .field("finished", &self.is_finished())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scheduler
// ─────────────────────────────────────────────────────────────────────────────

/// Schedules work on behalf of one context.  Obtain it from
/// [`Context::scheduler`].  All methods must be called on a Tokio runtime.
#[derive(Clone, Debug)]
pub struct Scheduler {
    context: Context,
}

impl Scheduler {
    pub(crate) fn new(context: Context) -> Self {
        Self { context }
    }

    /// Send `message` to `target` after `delay`, repeating per `repeat`.
    pub fn schedule<M>(
        &self,
        target: &Reference<M>,
        message: M,
        delay: Duration,
        repeat: Repeat,
    ) -> ScheduledSeries
    where
        M: Clone + Send + 'static,
    {
        self.spawn(delay, repeat, deliver(target, message), None)
    }

    /// As [`Scheduler::schedule`], calling `listener` after the last
    /// invocation of a finite series.
    pub fn schedule_with_listener<M, L>(
        &self,
        target: &Reference<M>,
        message: M,
        delay: Duration,
        repeat: Repeat,
        listener: L,
    ) -> ScheduledSeries
    where
        M: Clone + Send + 'static,
        L: FinalInvocationListener,
    {
        self.spawn(delay, repeat, deliver(target, message), Some(Box::new(listener)))
    }

    /// Run `action` after `delay`, repeating per `repeat`.
    pub fn schedule_fn<F>(
        &self,
        delay: Duration,
        repeat: Repeat,
        action: F,
        listener: Option<Box<dyn FinalInvocationListener>>,
    ) -> ScheduledSeries
    where
        F: FnMut() + Send + 'static,
    {
        self.spawn(delay, repeat, action, listener)
    }

    fn spawn<F>(
        &self,
        delay: Duration,
        repeat: Repeat,
        action: F,
        listener: Option<Box<dyn FinalInvocationListener>>,
    ) -> ScheduledSeries
    where
        F: FnMut() + Send + 'static,
    {
        let series = ScheduledSeries::new();
        debug!(series = %series.id(), ?delay, ?repeat, "series scheduled");
        tokio::spawn(drive(
            self.context.clone(),
            series.clone(),
            delay,
            repeat,
            action,
            listener,
        ));
        series
    }
}

fn deliver<M>(target: &Reference<M>, message: M) -> impl FnMut() + Send + 'static
where
    M: Clone + Send + 'static,
{
    let target = target.clone();
    move || target.send(message.clone())
}

async fn drive<F>(
    context: Context,
    series: ScheduledSeries,
    delay: Duration,
    repeat: Repeat,
    mut action: F,
    listener: Option<Box<dyn FinalInvocationListener>>,
) where
    F: FnMut() + Send + 'static,
{
    let mut closing = context.closing();
    let state = &series.state;
    let mut wait = delay;

    let exhausted = loop {
        if repeat.total().is_some_and(|total| series.invocations() >= total) {
            break true;
        }
        if series.is_cancelled() || *closing.borrow() {
            break false;
        }
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = state.wake.notified() => {}
            _ = closing.changed() => {}
        }
        if series.is_cancelled() || *closing.borrow() {
            break false;
        }
        action();
        state.invocations.fetch_add(1, Ordering::AcqRel);
        wait = repeat.interval();
    };

    state.finished.store(true, Ordering::Release);
    debug!(
        series = %series.id(),
        invocations = series.invocations(),
        exhausted,
        "series ended"
    );
    if exhausted && let Some(listener) = listener {
        listener.on_final_invocation(&context);
    }
}
