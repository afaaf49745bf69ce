//! [`StringProducer`] – sends text messages to a configured target unit.
//!
//! | Key | Type | Default |
//! |---|---|---|
//! | `target` | string | required |
//! | `prefix` | string | `"msg"` |
//!
//! Messages arriving while the producer is not `Started` are ignored.

use robokit_core::{Reference, Unit, UnitContext, async_trait};
use robokit_types::{ConfigError, Configuration, LifecycleState, UnitError};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProducerMessage {
    /// Send one randomly generated message to the target.
    Tick,
    /// Send the given text to the target.
    Send(String),
}

pub struct StringProducer {
    id: String,
    target: Option<String>,
    prefix: String,
    target_ref: Option<Reference<String>>,
    sent: u64,
}

impl StringProducer {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            target: None,
            prefix: "msg".to_string(),
            target_ref: None,
            sent: 0,
        }
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    fn random_message(&self) -> String {
        format!("{}-{}-{}", self.prefix, self.sent, Uuid::new_v4().simple())
    }
}

#[async_trait]
impl Unit for StringProducer {
    type Message = ProducerMessage;

    fn id(&self) -> &str {
        &self.id
    }

    fn on_initialization(&mut self, config: &Configuration) -> Result<(), ConfigError> {
        self.target = Some(config.require_string("target")?.to_string());
        self.prefix = config.get_string("prefix", "msg").to_string();
        Ok(())
    }

    async fn start(&mut self, cx: &UnitContext) -> Result<(), UnitError> {
        let target = self.target.as_deref().ok_or_else(|| ConfigError::missing("target"))?;
        let reference = cx
            .reference::<String>(target)
            .map_err(|e| UnitError::Failed(e.to_string()))?;
        self.target_ref = Some(reference);
        Ok(())
    }

    async fn on_message(&mut self, cx: &UnitContext, message: ProducerMessage) -> Result<(), UnitError> {
        if cx.state() != LifecycleState::Started {
            debug!(unit = %self.id, state = %cx.state(), ?message, "producer not running; ignored");
            return Ok(());
        }
        let Some(target) = &self.target_ref else {
            return Ok(());
        };
        let text = match message {
            ProducerMessage::Tick => self.random_message(),
            ProducerMessage::Send(text) => text,
        };
        target.send(text);
        self.sent += 1;
        Ok(())
    }

    async fn stop(&mut self, _cx: &UnitContext) -> Result<(), UnitError> {
        info!(unit = %self.id, sent = self.sent, "producer stopping");
        self.target_ref = None;
        Ok(())
    }
}
