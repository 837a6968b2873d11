//! Queue bookkeeping behind the processor's single lock
//!
//! Holds every topic's FIFO, the drain and halt flags, the in-flight id set and the
//! bounded window of processed ids. Nothing here awaits; callers hold the
//! processor's mutex for the duration of each call.

use std::collections::{HashMap, HashSet, VecDeque};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::messages::{IdentityId, IncomingMessage, MessageId, TopicId};

/// A message waiting for its turn
#[derive(Clone, Debug, PartialEq, Eq)]
pub(super) struct QueuedMessage {
    pub(super) id: MessageId,
    pub(super) text: String,
    pub(super) sender: IdentityId,
    /// Arrival sequence number
    pub(super) seq: u64,
}

/// Bounded memory of processed message ids
///
/// Older ids fall out of the window; the store is the authority for those.
#[derive(Debug)]
pub(super) struct SeenIds {
    ids: HashSet<MessageId>,
    order: VecDeque<MessageId>,
    capacity: usize,
}

impl SeenIds {
    pub(super) fn new(capacity: usize) -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub(super) fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    pub(super) fn insert(&mut self, id: MessageId) {
        if !self.ids.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.ids.remove(&old);
            }
        }
    }
}

/// Per-topic queue and drain bookkeeping
#[derive(Debug)]
pub(super) struct TopicQueue {
    pub(super) queue: VecDeque<QueuedMessage>,
    pub(super) draining: bool,
    pub(super) halted: bool,
    pub(super) cancel: Option<CancellationToken>,
    pub(super) active: watch::Sender<bool>,
    pub(super) persisting: watch::Sender<bool>,
}

impl TopicQueue {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            draining: false,
            halted: false,
            cancel: None,
            active: watch::channel(false).0,
            persisting: watch::channel(false).0,
        }
    }

    fn set_draining(&mut self, draining: bool) {
        self.draining = draining;
        self.active.send_replace(draining);
    }
}

/// What a drain loop should do once its queue looked empty
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum DrainExit {
    /// Queue is empty; draining stopped
    Idle,
    /// Topic was halted; draining stopped with this many messages left
    Halted(usize),
    /// A message arrived in the meantime
    Continue,
}

#[derive(Debug)]
pub(super) struct ProcessorState {
    pub(super) topics: HashMap<TopicId, TopicQueue>,
    in_flight: HashSet<MessageId>,
    seen: SeenIds,
    next_seq: u64,
}

impl ProcessorState {
    pub(super) fn new(dedup_capacity: usize) -> Self {
        Self {
            topics: HashMap::new(),
            in_flight: HashSet::new(),
            seen: SeenIds::new(dedup_capacity),
            next_seq: 0,
        }
    }

    pub(super) fn topic(&mut self, topic_id: &str) -> &mut TopicQueue {
        self.topics
            .entry(topic_id.to_string())
            .or_insert_with(TopicQueue::new)
    }

    /// Mark an id in flight; `false` if it is already in flight or recently seen
    pub(super) fn reserve(&mut self, id: &MessageId) -> bool {
        if self.in_flight.contains(id) || self.seen.contains(id) {
            return false;
        }
        self.in_flight.insert(id.clone());
        true
    }

    /// Drop a reservation without remembering the id
    pub(super) fn release(&mut self, id: &MessageId) {
        self.in_flight.remove(id);
    }

    /// Move an id from in flight to the processed window
    pub(super) fn finish(&mut self, id: &MessageId) {
        self.in_flight.remove(id);
        self.seen.insert(id.clone());
    }

    /// Append a message; `true` if the caller must start draining
    pub(super) fn enqueue(&mut self, topic_id: &str, message: IncomingMessage) -> bool {
        let seq = self.next_seq;
        self.next_seq += 1;

        let topic = self.topic(topic_id);
        topic.queue.push_back(QueuedMessage {
            id: message.id,
            text: message.text,
            sender: message.sender,
            seq,
        });

        if topic.draining || topic.halted {
            false
        } else {
            topic.set_draining(true);
            true
        }
    }

    /// Pop the next message and arm its cancellation token
    pub(super) fn next_message(
        &mut self,
        topic_id: &str,
    ) -> Option<(QueuedMessage, CancellationToken)> {
        let topic = self.topic(topic_id);
        if topic.halted {
            return None;
        }
        let message = topic.queue.pop_front()?;
        let token = CancellationToken::new();
        topic.cancel = Some(token.clone());
        Some((message, token))
    }

    /// Close out a processed message
    pub(super) fn complete(&mut self, topic_id: &str, id: &MessageId) {
        self.finish(id);
        self.topic(topic_id).cancel = None;
    }

    /// Stop draining unless work arrived since the queue was found empty
    pub(super) fn exit_drain(&mut self, topic_id: &str) -> DrainExit {
        let topic = self.topic(topic_id);
        if topic.halted {
            topic.set_draining(false);
            DrainExit::Halted(topic.queue.len())
        } else if topic.queue.is_empty() {
            topic.set_draining(false);
            DrainExit::Idle
        } else {
            DrainExit::Continue
        }
    }

    /// Halt a topic; returns the token of its running generation
    pub(super) fn halt(&mut self, topic_id: &str) -> Option<CancellationToken> {
        let topic = self.topic(topic_id);
        topic.halted = true;
        topic.cancel.clone()
    }

    /// Lift every halt; returns topics whose queue must be drained again
    pub(super) fn resume_all(&mut self) -> Vec<TopicId> {
        self.topics
            .iter_mut()
            .filter_map(|(topic_id, topic)| {
                topic.halted = false;
                (!topic.draining && !topic.queue.is_empty()).then(|| {
                    topic.set_draining(true);
                    topic_id.clone()
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, text: &str) -> IncomingMessage {
        IncomingMessage::new(MessageId::from_string(id), IdentityId::new("alice"), text)
    }

    #[test]
    fn test_seen_ids_evicts_oldest() {
        let mut seen = SeenIds::new(2);
        seen.insert(MessageId::from_string("a"));
        seen.insert(MessageId::from_string("b"));
        seen.insert(MessageId::from_string("a"));
        seen.insert(MessageId::from_string("c"));

        assert!(!seen.contains(&MessageId::from_string("a")));
        assert!(seen.contains(&MessageId::from_string("b")));
        assert!(seen.contains(&MessageId::from_string("c")));
    }

    #[test]
    fn test_reserve_until_finished() {
        let mut state = ProcessorState::new(8);
        let id = MessageId::from_string("a");

        assert!(state.reserve(&id));
        assert!(!state.reserve(&id));
        state.release(&id);
        assert!(state.reserve(&id));
        state.finish(&id);
        assert!(!state.reserve(&id));
    }

    #[test]
    fn test_only_first_enqueue_starts_drain() {
        let mut state = ProcessorState::new(8);
        assert!(state.enqueue("t", message("1", "one")));
        assert!(!state.enqueue("t", message("2", "two")));
        assert!(state.enqueue("u", message("3", "three")));

        let (first, _) = state.next_message("t").unwrap();
        let (second, _) = state.next_message("t").unwrap();
        assert_eq!(first.text, "one");
        assert!(first.seq < second.seq);
        assert_eq!(state.exit_drain("t"), DrainExit::Idle);
        assert!(state.enqueue("t", message("4", "four")));
    }

    #[test]
    fn test_halt_keeps_queue_until_resume() {
        let mut state = ProcessorState::new(8);
        state.enqueue("t", message("1", "one"));
        state.enqueue("t", message("2", "two"));
        let (_, token) = state.next_message("t").unwrap();

        let running = state.halt("t").unwrap();
        running.cancel();
        assert!(token.is_cancelled());
        assert!(state.next_message("t").is_none());
        assert_eq!(state.exit_drain("t"), DrainExit::Halted(1));

        assert_eq!(state.resume_all(), vec!["t".to_string()]);
        assert!(state.next_message("t").is_some());
    }
}
