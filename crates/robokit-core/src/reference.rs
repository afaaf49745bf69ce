//! [`Reference`] – typed, location-transparent handle to one unit.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

/// Handle used to send messages of type `M` to exactly one unit.
///
/// Cheap to clone; all clones feed the same mailbox.  Sending never blocks
/// and returns nothing: messages sent through one reference are delivered in
/// send order, and a unit that has shut down silently drops new messages.
pub struct Reference<M> {
    id: Arc<str>,
    sender: mpsc::UnboundedSender<M>,
}

impl<M> Reference<M> {
    pub(crate) fn new(id: Arc<str>, sender: mpsc::UnboundedSender<M>) -> Self {
        Self { id, sender }
    }

    /// Identifier of the target unit.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Enqueue `message` for the target unit (fire-and-forget).
    pub fn send(&self, message: M) {
        if self.sender.send(message).is_err() {
            debug!(unit = %self.id, "mailbox closed; message dropped");
        }
    }

    /// `true` once the target unit has shut down.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl<M> Clone for Reference<M> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            sender: self.sender.clone(),
        }
    }
}

impl<M> PartialEq for Reference<M> {
    fn eq(&self, other: &Self) -> bool {
        self.sender.same_channel(&other.sender)
    }
}

impl<M> Eq for Reference<M> {}

impl<M> fmt::Debug for Reference<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reference")
            .field("id", &self.id)
            .field("message_type", &std::any::type_name::<M>())
            .finish()
    }
}
