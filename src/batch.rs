//! Batch router (L7): dispatches a batch of messages to rulesets, either via
//! the single-ruleset fast path or the multi-ruleset partitioning fallback.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::action::Disposition;
use crate::error::Error;
use crate::message::MessageRecord;
use crate::ruleset::Ruleset;

/// Whether a batch element is still awaiting dispatch or has already been
/// fully handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementState {
    /// Still awaiting dispatch.
    Ready,
    /// Already dispatched; not reconsidered by any further pass.
    Discarded,
}

/// A single message together with its dispatch state within a [`Batch`].
#[derive(Debug, Clone)]
pub struct BatchElement {
    /// The message itself.
    pub message: MessageRecord,
    /// Dispatch state.
    pub state: ElementState,
}

/// A bounded set of messages dispatched together to amortize per-message
/// overhead.
#[derive(Debug)]
pub struct Batch {
    elements: Vec<BatchElement>,
    /// `true` if every element is known to share one ruleset (the fast
    /// path); `false` if the batch may span several (the partitioning
    /// fallback is required).
    pub single_ruleset: bool,
    /// Polled between rule invocations and between sub-batches; once set,
    /// dispatch stops promptly, leaving remaining elements un-discarded.
    shutdown: Arc<AtomicBool>,
}

impl Batch {
    /// Builds a batch from `messages`, all initially READY.
    pub fn new(messages: Vec<MessageRecord>, single_ruleset: bool, shutdown: Arc<AtomicBool>) -> Self {
        let elements = messages
            .into_iter()
            .map(|message| BatchElement {
                message,
                state: ElementState::Ready,
            })
            .collect();

        Batch {
            elements,
            single_ruleset,
            shutdown,
        }
    }

    /// Number of elements in the batch, regardless of state.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Whether the batch holds no elements.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// The batch's elements and their current dispatch state.
    pub fn elements(&self) -> &[BatchElement] {
        &self.elements
    }
}

/// Dispatches `batch` to rulesets.
///
/// `bound_ruleset` is the batch's own ruleset pointer if it has one (e.g. a
/// session-bound batch); `default` is the registry's default ruleset, used
/// both as the single-ruleset fast path's fallback and as the fallback when
/// an individual message's weak ruleset reference has gone stale.
pub fn dispatch(batch: &mut Batch, bound_ruleset: Option<Arc<Ruleset>>, default: &Arc<Ruleset>) -> Result<(), Error> {
    if batch.single_ruleset {
        let ruleset = bound_ruleset.unwrap_or_else(|| Arc::clone(default));
        dispatch_fast_path(batch, &ruleset)
    } else {
        dispatch_partitioned(batch, default)
    }
}

/// Single-ruleset fast path: hands the whole batch to each of `ruleset`'s
/// rules in insertion order; each rule processes every READY element before
/// the next rule runs.
fn dispatch_fast_path(batch: &mut Batch, ruleset: &Arc<Ruleset>) -> Result<(), Error> {
    let rule_count = ruleset.rule_count();

    for rule_idx in 0..rule_count {
        if batch.shutdown.load(Ordering::Acquire) {
            return Err(Error::Shutdown);
        }

        for element in &mut batch.elements {
            if element.state != ElementState::Ready {
                continue;
            }

            let disposition = ruleset.apply_rule(rule_idx, &element.message)?;
            if disposition == Disposition::Discard {
                element.state = ElementState::Discarded;
            }
        }
    }

    Ok(())
}

/// Multi-ruleset partitioning fallback. Carves per-ruleset sub-batches out
/// of `batch` in place using a state flag, so each element is dispatched to
/// exactly one ruleset, in the order its ruleset is first encountered.
fn dispatch_partitioned(batch: &mut Batch, default: &Arc<Ruleset>) -> Result<(), Error> {
    loop {
        if batch.shutdown.load(Ordering::Acquire) {
            return Err(Error::Shutdown);
        }

        let Some(first_ready) = batch
            .elements
            .iter()
            .position(|e| e.state == ElementState::Ready)
        else {
            return Ok(());
        };

        let current = batch.elements[first_ready]
            .message
            .resolve_ruleset(default);

        let mut sub_messages = Vec::with_capacity(batch.len());

        for element in &mut batch.elements {
            if element.state != ElementState::Ready {
                continue;
            }

            let element_ruleset = element.message.resolve_ruleset(default);
            if Arc::ptr_eq(&element_ruleset, &current) {
                sub_messages.push(element.message.clone());
                element.state = ElementState::Discarded;
            }
        }

        let mut sub_batch = Batch::new(sub_messages, true, Arc::clone(&batch.shutdown));
        dispatch_fast_path(&mut sub_batch, &current)?;
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;
    use std::sync::atomic::AtomicBool;

    use super::*;
    use crate::action::QueueAction;
    use crate::queue::InMemoryQueue;
    use crate::ruleset::{Rule, RulesetRegistry};

    fn message_for(ruleset: &Arc<Ruleset>) -> MessageRecord {
        MessageRecord {
            payload: b"x".to_vec(),
            peer_addr: "127.0.0.1".parse::<IpAddr>().unwrap(),
            peer_fqdn: None,
            peer_tls_name: None,
            input_name: None,
            ruleset: Arc::downgrade(ruleset),
        }
    }

    #[test]
    fn single_ruleset_fast_path_runs_every_rule() {
        let mut reg = RulesetRegistry::new();
        let rs = reg.construct("main").unwrap();
        let queue = Arc::new(InMemoryQueue::new(8));
        reg.add_rule(&rs, Rule::new(vec![Box::new(QueueAction::new(queue.clone()))]));

        let messages = vec![message_for(&rs), message_for(&rs)];
        let mut batch = Batch::new(messages, true, Arc::new(AtomicBool::new(false)));

        dispatch(&mut batch, Some(Arc::clone(&rs)), &rs).unwrap();

        assert_eq!(queue.dequeue().unwrap(), b"x");
        assert_eq!(queue.dequeue().unwrap(), b"x");
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn partition_completeness_splits_by_ruleset_preserving_order() {
        let mut reg = RulesetRegistry::new();
        let a = reg.construct("a").unwrap();
        let b = reg.construct("b").unwrap();

        let queue = Arc::new(InMemoryQueue::new(16));
        reg.add_rule(&a, Rule::new(vec![Box::new(QueueAction::new(queue.clone()))]));
        reg.add_rule(&b, Rule::new(vec![Box::new(QueueAction::new(queue.clone()))]));

        // rulesets [A, B, A, B, A]
        let messages = vec![
            message_for(&a),
            message_for(&b),
            message_for(&a),
            message_for(&b),
            message_for(&a),
        ];
        let mut batch = Batch::new(messages, false, Arc::new(AtomicBool::new(false)));

        dispatch(&mut batch, None, &a).unwrap();

        // every element dispatched exactly once
        assert!(
            batch
                .elements()
                .iter()
                .all(|e| e.state == ElementState::Discarded)
        );
        // 5 total enqueues, one per original element
        let mut drained = Vec::new();
        while let Some(item) = queue.dequeue() {
            drained.push(item);
        }
        assert_eq!(drained.len(), 5);
    }

    #[test]
    fn cancellation_stops_fast_path_promptly() {
        let mut reg = RulesetRegistry::new();
        let rs = reg.construct("main").unwrap();
        let queue = Arc::new(InMemoryQueue::new(8));
        reg.add_rule(&rs, Rule::new(vec![Box::new(QueueAction::new(queue))]));
        reg.add_rule(&rs, Rule::new(vec![Box::new(crate::action::DiscardAction)]));

        let shutdown = Arc::new(AtomicBool::new(true));
        let mut batch = Batch::new(vec![message_for(&rs)], true, shutdown);

        // `bound_ruleset` is `Some`, so `default` is never consulted; it is
        // still required by `dispatch`'s signature.
        let err = dispatch(&mut batch, Some(Arc::clone(&rs)), &rs).unwrap_err();
        assert!(matches!(err, Error::Shutdown));
    }
}
