//! [`ButtonUnit`] – forwards presses of a five-button panel to another unit.
//!
//! The panel driver pushes [`Button`] events into a bounded channel.  While
//! started, the unit drains that channel into its own mailbox, so presses are
//! handled one at a time like any other message, and forwards the name of
//! each press (`"up"`, `"select"`, ...) to its configured `target`, a unit
//! accepting `String` messages.
//!
//! | Key | Type | Default |
//! |---|---|---|
//! | `target` | string | required |
//! | `mirror` | boolean | `true` (panel mounted upside down: left and right swap) |
//! | `bus`, `address` | integer | see [`BusAccess`] |
//!
//! Resources are released exactly once: the panel listener in `stop`, the
//! panel itself in `shutdown`.

use std::fmt;
use std::sync::Arc;

use robokit_core::{Reference, Unit, UnitContext, async_trait};
use robokit_types::{ConfigError, Configuration, LifecycleState, UnitError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::BusAccess;

/// Buttons of the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
    Select,
    Up,
    Down,
    Left,
    Right,
}

impl Button {
    pub const ALL: [Button; 5] = [
        Button::Select,
        Button::Up,
        Button::Down,
        Button::Left,
        Button::Right,
    ];

    /// The button as seen by a user facing a panel mounted upside down.
    pub fn mirrored(self) -> Self {
        match self {
            Button::Left => Button::Right,
            Button::Right => Button::Left,
            other => other,
        }
    }
}

impl fmt::Display for Button {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Button::Select => "select",
            Button::Up => "up",
            Button::Down => "down",
            Button::Left => "left",
            Button::Right => "right",
        };
        f.write_str(name)
    }
}

/// Driver side of a button panel.
pub trait ButtonPanel: Send + Sync + 'static {
    /// Acquire the panel on `bus`.
    ///
    /// # Errors
    ///
    /// [`UnitError::Hardware`] when the device does not respond.
    fn open(&self, bus: BusAccess) -> Result<(), UnitError>;

    /// Register the single listener; presses are delivered into the returned
    /// receiver.  A previous listener is replaced.
    fn subscribe(&self) -> Result<mpsc::Receiver<Button>, UnitError>;

    /// Remove the listener.  Its receiver yields `None` once drained.
    fn unsubscribe(&self);

    /// Release the panel.
    fn close(&self) -> Result<(), UnitError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// ButtonUnit
// ─────────────────────────────────────────────────────────────────────────────

pub struct ButtonUnit {
    id: String,
    panel: Arc<dyn ButtonPanel>,
    target: String,
    mirror: bool,
    bus: BusAccess,
    opened: bool,
    forward: Option<Forwarding>,
}

struct Forwarding {
    target: Reference<String>,
    task: JoinHandle<()>,
}

impl ButtonUnit {
    pub fn new(id: impl Into<String>, panel: Arc<dyn ButtonPanel>) -> Self {
        Self {
            id: id.into(),
            panel,
            target: String::new(),
            mirror: true,
            bus: BusAccess::default(),
            opened: false,
            forward: None,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn bus(&self) -> BusAccess {
        self.bus
    }

    fn map(&self, button: Button) -> Button {
        if self.mirror { button.mirrored() } else { button }
    }

    async fn release_listener(&mut self) {
        if let Some(forward) = self.forward.take() {
            self.panel.unsubscribe();
            if let Err(e) = forward.task.await {
                warn!(unit = %self.id, error = %e, "button forwarding task ended abnormally");
            }
            debug!(unit = %self.id, "button listener removed");
        }
    }
}

#[async_trait]
impl Unit for ButtonUnit {
    type Message = Button;

    fn id(&self) -> &str {
        &self.id
    }

    fn on_initialization(&mut self, config: &Configuration) -> Result<(), ConfigError> {
        self.target = config.require_string("target")?.to_string();
        self.mirror = config.get_bool("mirror", true);
        self.bus = BusAccess::from_config(config)?;
        self.panel.open(self.bus).map_err(|e| ConfigError::Invalid {
            key: "address".to_string(),
            reason: format!("could not open button panel on {}: {e}", self.bus),
        })?;
        self.opened = true;
        Ok(())
    }

    async fn start(&mut self, cx: &UnitContext) -> Result<(), UnitError> {
        if self.target.is_empty() {
            return Err(ConfigError::missing("target").into());
        }
        let target = cx
            .reference::<String>(&self.target)
            .map_err(|e| UnitError::Failed(e.to_string()))?;
        let own = cx
            .reference::<Button>(cx.id())
            .map_err(|e| UnitError::Failed(e.to_string()))?;
        let mut presses = self.panel.subscribe()?;
        let task = tokio::spawn(async move {
            while let Some(button) = presses.recv().await {
                own.send(button);
            }
        });
        self.forward = Some(Forwarding { target, task });
        info!(unit = %self.id, target = %self.target, bus = %self.bus, "button panel listening");
        Ok(())
    }

    async fn on_message(&mut self, cx: &UnitContext, button: Button) -> Result<(), UnitError> {
        if cx.state() != LifecycleState::Started {
            debug!(unit = %self.id, %button, state = %cx.state(), "press ignored");
            return Ok(());
        }
        let Some(forward) = &self.forward else {
            return Ok(());
        };
        let mapped = self.map(button);
        debug!(unit = %self.id, %button, %mapped, "button pressed");
        forward.target.send(mapped.to_string());
        Ok(())
    }

    async fn stop(&mut self, _cx: &UnitContext) -> Result<(), UnitError> {
        self.release_listener().await;
        Ok(())
    }

    async fn shutdown(&mut self, _cx: &UnitContext) -> Result<(), UnitError> {
        self.release_listener().await;
        if std::mem::take(&mut self.opened) {
            self.panel.close()?;
            debug!(unit = %self.id, "button panel released");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use robokit_core::{Builder, Context, Managed};

    use super::*;
    use crate::consumer::{ReceivedMessages, StringConsumer};
    use crate::sim::SimButtonPanel;

    fn config(mirror: bool) -> Configuration {
        Configuration::builder()
            .with_string("target", "display")
            .with_bool("mirror", mirror)
            .build()
    }

    fn system(panel: &SimButtonPanel, mirror: bool) -> (Context, ReceivedMessages) {
        let display = StringConsumer::new("display");
        let seen = display.received();
        let mut buttons = Managed::new(ButtonUnit::new("buttons", Arc::new(panel.clone())));
        buttons.initialize(&config(mirror)).unwrap();
        let context = Builder::new()
            .add_managed(buttons)
            .unwrap()
            .add(display)
            .unwrap()
            .build();
        (context, seen)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    #[test]
    fn mirroring_swaps_only_left_and_right() {
        assert_eq!(Button::Left.mirrored(), Button::Right);
        assert_eq!(Button::Right.mirrored(), Button::Left);
        assert_eq!(Button::Up.mirrored(), Button::Up);
        assert_eq!(Button::Select.mirrored(), Button::Select);
    }

    #[test]
    fn missing_target_is_a_config_error() {
        let mut unit = ButtonUnit::new("buttons", Arc::new(SimButtonPanel::new()));
        let err = unit.on_initialization(&Configuration::empty()).unwrap_err();
        assert_eq!(err, ConfigError::missing("target"));
    }

    #[test]
    fn panel_fault_fails_initialization() {
        let panel = SimButtonPanel::new();
        panel.fail_open(true);
        let mut unit = ButtonUnit::new("buttons", Arc::new(panel));
        assert!(matches!(
            unit.on_initialization(&config(true)),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[tokio::test]
    async fn presses_are_forwarded_while_started() {
        let panel = SimButtonPanel::new();
        let (context, seen) = system(&panel, true);
        context.start().await;

        assert!(panel.press(Button::Left));
        assert!(panel.press(Button::Up));
        settle().await;
        assert_eq!(seen.snapshot(), vec!["right", "up"]);

        context.shutdown().await;
        assert!(!panel.press(Button::Select));
    }

    #[tokio::test]
    async fn unmirrored_panel_forwards_as_pressed() {
        let panel = SimButtonPanel::new();
        let (context, seen) = system(&panel, false);
        context.start().await;
        panel.press(Button::Left);
        settle().await;
        context.shutdown().await;
        assert_eq!(seen.snapshot(), vec!["left"]);
    }

    #[tokio::test]
    async fn resources_are_released_exactly_once() {
        let panel = SimButtonPanel::new();
        let (context, _seen) = system(&panel, true);
        context.start().await;
        context.shutdown().await;
        context.shutdown().await;

        let stats = panel.stats();
        assert_eq!(stats.opens, 1);
        assert_eq!(stats.subscribes, 1);
        assert_eq!(stats.unsubscribes, 1);
        assert_eq!(stats.closes, 1);
    }

    #[tokio::test]
    async fn unknown_target_fails_start_but_still_releases_panel() {
        let panel = SimButtonPanel::new();
        let mut buttons = Managed::new(ButtonUnit::new("buttons", Arc::new(panel.clone())));
        buttons
            .initialize(&Configuration::builder().with_string("target", "nowhere").build())
            .unwrap();
        let context = Builder::new().add_managed(buttons).unwrap().build();
        context.start().await;
        assert_eq!(context.unit_state("buttons"), Ok(LifecycleState::Failed));

        context.shutdown().await;
        let stats = panel.stats();
        assert_eq!(stats.subscribes, 0);
        assert_eq!(stats.closes, 1);
    }
}
