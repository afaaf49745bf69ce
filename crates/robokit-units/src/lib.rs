//! `robokit-units` – ready-made units for the robokit runtime.
//!
//! # Modules
//!
//! - [`producer`] – [`StringProducer`]: sends text messages to a configured
//!   target.
//! - [`consumer`] – [`StringConsumer`]: records received text messages.
//! - [`button`] – [`ButtonUnit`]: forwards presses of a five-button panel to
//!   a target unit; the panel driver sits behind the [`ButtonPanel`] trait.
//! - [`bus`] – [`BusAccess`]: bus/address capability embedded by hardware
//!   units.
//! - [`sim`] – [`SimButtonPanel`]: in-process panel for headless runs and
//!   tests.
//!
//! [`register_standard_units`] adds every type to a
//! [`TypeRegistry`] so they can be declared in definition documents.

pub mod bus;
pub mod button;
pub mod consumer;
pub mod producer;
pub mod sim;

#[cfg(test)]
mod scenarios;

use std::sync::Arc;

use robokit_core::TypeRegistry;

pub use bus::BusAccess;
pub use button::{Button, ButtonPanel, ButtonUnit};
pub use consumer::{ReceivedMessages, StringConsumer};
pub use producer::{ProducerMessage, StringProducer};
pub use sim::{PanelStats, SimButtonPanel};

/// Type name of [`StringProducer`] in definition documents.
pub const STRING_PRODUCER: &str = "string-producer";
/// Type name of [`StringConsumer`].
pub const STRING_CONSUMER: &str = "string-consumer";
/// Type name of [`ButtonUnit`].
pub const BUTTON: &str = "button";

/// Shared collaborators handed to the standard unit factories.
#[derive(Clone, Default)]
pub struct SimBench {
    /// Panel every [`ButtonUnit`] created by the registry reads from.
    pub panel: SimButtonPanel,
    /// Log every [`StringConsumer`] created by the registry appends to.
    pub received: ReceivedMessages,
}

impl SimBench {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Register the standard unit types under their definition-document names.
pub fn register_standard_units(registry: &mut TypeRegistry, bench: &SimBench) {
    registry.register(STRING_PRODUCER, |_cx, id| StringProducer::new(id));

    let received = bench.received.clone();
    registry.register(STRING_CONSUMER, move |_cx, id| {
        StringConsumer::with_log(id, received.clone())
    });

    let panel = bench.panel.clone();
    registry.register(BUTTON, move |_cx, id| {
        ButtonUnit::new(id, Arc::new(panel.clone()))
    });
}

/// A registry holding every standard unit type.
pub fn standard_registry(bench: &SimBench) -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    register_standard_units(&mut registry, bench);
    registry
}
