//! Action plugins (external collaborators in principle): the output
//! operations a [`Rule`](crate::ruleset::Rule) applies to each message it
//! receives.

use std::sync::Arc;

use crate::error::Error;
use crate::message::MessageRecord;
use crate::queue::Queue;

/// What a rule chain should do with a batch element after an action has run
/// against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The element remains READY for the next action in the chain, and for
    /// subsequent rules in the ruleset.
    Continue,
    /// The element is fully handled; mark it DISCARDED so no later action or
    /// rule sees it again.
    Discard,
}

/// A single output operation applied to a message.
///
/// `Send + Sync` because a ruleset's rule chain is shared across listener
/// threads behind an `Arc` once activation hands it out to every listener.
pub trait Action: std::fmt::Debug + Send + Sync {
    /// Executes this action against `msg`, returning the element's
    /// disposition afterward.
    fn invoke(&self, msg: &MessageRecord) -> Result<Disposition, Error>;
}

/// Hands the message's payload to a [`Queue`] for asynchronous completion,
/// then lets the chain continue.
#[derive(Debug)]
pub struct QueueAction {
    queue: Arc<dyn Queue>,
}

impl QueueAction {
    /// Creates an action that enqueues onto `queue`.
    pub fn new(queue: Arc<dyn Queue>) -> Self {
        QueueAction { queue }
    }
}

impl Action for QueueAction {
    fn invoke(&self, msg: &MessageRecord) -> Result<Disposition, Error> {
        self.queue.enqueue(msg.payload.clone())?;
        Ok(Disposition::Continue)
    }
}

/// Unconditionally discards the element without performing any I/O. Mirrors
/// the legacy `~` "discard" action.
#[derive(Debug, Default)]
pub struct DiscardAction;

impl Action for DiscardAction {
    fn invoke(&self, _msg: &MessageRecord) -> Result<Disposition, Error> {
        Ok(Disposition::Discard)
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;

    use super::*;
    use crate::queue::InMemoryQueue;

    fn sample_message() -> MessageRecord {
        MessageRecord {
            payload: b"hello".to_vec(),
            peer_addr: "127.0.0.1".parse::<IpAddr>().unwrap(),
            peer_fqdn: None,
            peer_tls_name: None,
            input_name: None,
            ruleset: std::sync::Weak::new(),
        }
    }

    #[test]
    fn queue_action_enqueues_and_continues() {
        let queue = Arc::new(InMemoryQueue::new(4));
        let action = QueueAction::new(queue.clone());

        let disposition = action.invoke(&sample_message()).unwrap();

        assert_eq!(disposition, Disposition::Continue);
        assert_eq!(queue.dequeue().unwrap(), b"hello");
    }

    #[test]
    fn discard_action_always_discards() {
        let action = DiscardAction;
        assert_eq!(
            action.invoke(&sample_message()).unwrap(),
            Disposition::Discard
        );
    }
}
