//! Per-unit worker task.
//!
//! Each launched unit runs on its own Tokio task that owns the unit and
//! drains two queues: the unit's message mailbox and a control queue carrying
//! lifecycle commands.  When a command arrives, the messages already queued
//! at that moment are handled first and then the command is applied, so
//! nothing sent before a stop is lost and a unit feeding its own mailbox
//! cannot delay the command indefinitely.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use robokit_types::{LifecycleState, UnitError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::unit::{Unit, UnitContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    Start,
    Stop,
    Shutdown,
}

struct Control {
    command: Command,
    reply: oneshot::Sender<LifecycleState>,
}

/// Sends lifecycle commands to one worker.
#[derive(Clone)]
pub(crate) struct Controller(mpsc::UnboundedSender<Control>);

impl Controller {
    /// Apply `command` and wait for the resulting state.  `None` when the
    /// worker is gone.
    pub(crate) async fn request(&self, command: Command) -> Option<LifecycleState> {
        let (reply, response) = oneshot::channel();
        self.0.send(Control { command, reply }).ok()?;
        response.await.ok()
    }
}

pub(crate) struct Worker {
    pub(crate) controller: Controller,
    pub(crate) handle: JoinHandle<()>,
}

impl Worker {
    pub(crate) fn spawn<U: Unit>(
        unit: U,
        cx: UnitContext,
        mailbox: mpsc::UnboundedReceiver<U::Message>,
    ) -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run(unit, cx, mailbox, control_rx));
        Worker {
            controller: Controller(control_tx),
            handle,
        }
    }
}

/// Which hooks have already run.  Each releasing hook runs at most once.
#[derive(Default)]
struct Hooks {
    start_entered: bool,
    stopped: bool,
    shut_down: bool,
}

async fn run<U: Unit>(
    mut unit: U,
    cx: UnitContext,
    mut mailbox: mpsc::UnboundedReceiver<U::Message>,
    mut control: mpsc::UnboundedReceiver<Control>,
) {
    let mut hooks = Hooks::default();
    loop {
        tokio::select! {
            biased;
            Some(Control { command, reply }) = control.recv() => {
                // Only what is queued now is drained first; messages the unit
                // keeps sending itself cannot hold the command back.
                let queued = mailbox.len();
                for _ in 0..queued {
                    let Ok(message) = mailbox.try_recv() else {
                        break;
                    };
                    handle(&mut unit, &cx, message).await;
                }
                let state = match command {
                    Command::Start => start(&mut unit, &cx, &mut hooks).await,
                    Command::Stop => stop(&mut unit, &cx, &mut hooks).await,
                    Command::Shutdown => shutdown(&mut unit, &cx, &mut hooks).await,
                };
                let _ = reply.send(state);
                if command == Command::Shutdown {
                    break;
                }
            }
            Some(message) = mailbox.recv() => handle(&mut unit, &cx, message).await,
            else => break,
        }
    }
    debug!(unit = %cx.id(), state = %cx.state(), "worker exited");
}

async fn handle<U: Unit>(unit: &mut U, cx: &UnitContext, message: U::Message) {
    if cx.state() == LifecycleState::Failed {
        debug!(unit = %cx.id(), "dropping message for failed unit");
        return;
    }
    if let Err(e) = guard(unit.on_message(cx, message)).await {
        fail(cx, "on_message", &e);
    }
}

async fn start<U: Unit>(unit: &mut U, cx: &UnitContext, hooks: &mut Hooks) -> LifecycleState {
    match cx.state() {
        LifecycleState::Uninitialized | LifecycleState::Initialized => {
            cx.set_state(LifecycleState::Starting);
            hooks.start_entered = true;
            match guard(unit.start(cx)).await {
                Ok(()) => {
                    cx.set_state(LifecycleState::Started);
                    info!(unit = %cx.id(), "unit started");
                }
                Err(e) => fail(cx, "start", &e),
            }
        }
        other => debug!(unit = %cx.id(), state = %other, "start ignored"),
    }
    cx.state()
}

async fn stop<U: Unit>(unit: &mut U, cx: &UnitContext, hooks: &mut Hooks) -> LifecycleState {
    if cx.state() == LifecycleState::Started {
        cx.set_state(LifecycleState::Stopping);
        hooks.stopped = true;
        match guard(unit.stop(cx)).await {
            Ok(()) => {
                cx.set_state(LifecycleState::Stopped);
                debug!(unit = %cx.id(), "unit stopped");
            }
            Err(e) => fail(cx, "stop", &e),
        }
    }
    cx.state()
}

async fn shutdown<U: Unit>(unit: &mut U, cx: &UnitContext, hooks: &mut Hooks) -> LifecycleState {
    if cx.state() == LifecycleState::Started {
        stop(unit, cx, hooks).await;
    }
    match cx.state() {
        LifecycleState::ShutDown => {}
        LifecycleState::Failed => {
            // Release whatever the failed unit still holds; the state stays Failed.
            if hooks.start_entered && !hooks.stopped {
                hooks.stopped = true;
                if let Err(e) = guard(unit.stop(cx)).await {
                    warn!(unit = %cx.id(), error = %e, "stop of failed unit reported an error");
                }
            }
            if !hooks.shut_down {
                hooks.shut_down = true;
                if let Err(e) = guard(unit.shutdown(cx)).await {
                    warn!(unit = %cx.id(), error = %e, "shutdown of failed unit reported an error");
                }
            }
        }
        _ => {
            cx.set_state(LifecycleState::Stopped);
            hooks.shut_down = true;
            match guard(unit.shutdown(cx)).await {
                Ok(()) => {
                    cx.set_state(LifecycleState::ShutDown);
                    info!(unit = %cx.id(), "unit shut down");
                }
                Err(e) => fail(cx, "shutdown", &e),
            }
        }
    }
    cx.state()
}

fn fail(cx: &UnitContext, hook: &'static str, e: &UnitError) {
    cx.set_state(LifecycleState::Failed);
    error!(unit = %cx.id(), hook, error = %e, "unit failed");
}

/// Await a hook, turning a panic into a [`UnitError`].
async fn guard<F>(hook: F) -> Result<(), UnitError>
where
    F: Future<Output = Result<(), UnitError>>,
{
    match AssertUnwindSafe(hook).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(UnitError::Failed(format!(
            "panicked: {}",
            panic_message(panic.as_ref())
        ))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic payload"
    }
}
