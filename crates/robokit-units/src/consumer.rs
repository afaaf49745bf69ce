//! [`StringConsumer`] – records every text message it receives.

use std::sync::{Arc, Mutex, MutexGuard};

use robokit_core::{Unit, UnitContext, async_trait};
use robokit_types::UnitError;
use tracing::{debug, info};

/// Shared log of received messages.  Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct ReceivedMessages {
    messages: Arc<Mutex<Vec<String>>>,
}

impl ReceivedMessages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lock().clone()
    }

    fn push(&self, message: String) {
        self.lock().push(message);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.messages.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct StringConsumer {
    id: String,
    received: ReceivedMessages,
}

impl StringConsumer {
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_log(id, ReceivedMessages::new())
    }

    /// A consumer appending to an existing log.
    pub fn with_log(id: impl Into<String>, received: ReceivedMessages) -> Self {
        Self {
            id: id.into(),
            received,
        }
    }

    pub fn received(&self) -> ReceivedMessages {
        self.received.clone()
    }
}

#[async_trait]
impl Unit for StringConsumer {
    type Message = String;

    fn id(&self) -> &str {
        &self.id
    }

    async fn on_message(&mut self, _cx: &UnitContext, message: String) -> Result<(), UnitError> {
        debug!(unit = %self.id, %message, "message received");
        self.received.push(message);
        Ok(())
    }

    async fn stop(&mut self, _cx: &UnitContext) -> Result<(), UnitError> {
        info!(unit = %self.id, total = self.received.count(), "consumer stopping");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use robokit_core::Builder;

    use super::*;

    #[tokio::test]
    async fn records_messages_in_arrival_order() {
        let consumer = StringConsumer::new("consumer");
        let received = consumer.received();
        let context = Builder::new().add(consumer).unwrap().build();
        context.start().await;
        let reference = context.reference::<String>("consumer").unwrap();
        for text in ["a", "b", "c"] {
            reference.send(text.to_string());
        }
        context.shutdown().await;
        assert_eq!(received.snapshot(), vec!["a", "b", "c"]);
    }

    #[test]
    fn shared_log_sees_every_consumer() {
        let log = ReceivedMessages::new();
        let a = StringConsumer::with_log("a", log.clone());
        let b = StringConsumer::with_log("b", log.clone());
        a.received.push("x".to_string());
        b.received.push("y".to_string());
        assert_eq!(log.count(), 2);
    }
}
