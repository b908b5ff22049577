//! The event queue interface and in-memory FIFO.
//!
//! Backends may deliver plain events or full envelopes with ack/nack
//! callbacks. The in-memory implementation is an append-only buffer with a
//! head index; the consumed prefix is dropped periodically so dequeue stays
//! amortized O(1) with bounded memory.

use crate::error::QueueError;
use crate::event::Event;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Acknowledgement callback invoked when a message was processed.
pub type AckFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Negative-acknowledgement callback invoked with a failure reason.
pub type NackFn = Arc<dyn Fn(String) -> BoxFuture<'static, ()> + Send + Sync>;

/// A queued event envelope.
///
/// Plain events are accepted too; [`From<Event>`] wraps them with zero
/// attempts and no callbacks.
#[derive(Clone)]
pub struct QueueMessage {
    /// The event being delivered.
    pub event: Event,
    /// Number of prior delivery attempts.
    pub attempts: u32,
    /// Called when the consumer finished processing successfully (or, under
    /// the `always` ack policy, regardless of outcome).
    pub ack: Option<AckFn>,
    /// Called with a reason when processing failed and the message should be
    /// considered retryable by the backend.
    pub nack: Option<NackFn>,
}

impl QueueMessage {
    /// Wraps an event in a bare envelope.
    #[must_use]
    pub fn new(event: Event) -> Self {
        Self {
            event,
            attempts: 0,
            ack: None,
            nack: None,
        }
    }

    /// Attaches an acknowledgement callback.
    #[must_use]
    pub fn with_ack(mut self, ack: AckFn) -> Self {
        self.ack = Some(ack);
        self
    }

    /// Attaches a negative-acknowledgement callback.
    #[must_use]
    pub fn with_nack(mut self, nack: NackFn) -> Self {
        self.nack = Some(nack);
        self
    }

    /// Invokes the ack callback, if present.
    pub async fn acknowledge(&self) {
        if let Some(ack) = &self.ack {
            ack().await;
        }
    }

    /// Invokes the nack callback with the given reason, if present.
    pub async fn reject(&self, reason: impl Into<String>) {
        if let Some(nack) = &self.nack {
            nack(reason.into()).await;
        }
    }
}

impl From<Event> for QueueMessage {
    fn from(event: Event) -> Self {
        Self::new(event)
    }
}

// Callbacks are opaque; show the envelope fields that carry information.
impl fmt::Debug for QueueMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueMessage")
            .field("event", &self.event)
            .field("attempts", &self.attempts)
            .field("ack", &self.ack.is_some())
            .field("nack", &self.nack.is_some())
            .finish()
    }
}

/// Interface consumed by the orchestrator's queue loop.
///
/// `enqueue`, `dequeue`, and `size` are required; the remaining operations
/// have defaults in terms of `dequeue` or report nothing, and backends that
/// can do better should override them.
#[async_trait]
pub trait EventQueue: Send + Sync {
    /// Appends a message to the tail of the queue.
    async fn enqueue(&self, message: QueueMessage) -> Result<(), QueueError>;

    /// Removes and returns the head message, if any.
    async fn dequeue(&self) -> Result<Option<QueueMessage>, QueueError>;

    /// Number of messages currently queued.
    async fn size(&self) -> usize;

    /// Returns the head message without removing it.
    async fn peek(&self) -> Option<QueueMessage> {
        None
    }

    /// Returns a snapshot of all queued messages in order.
    async fn list(&self) -> Vec<QueueMessage> {
        Vec::new()
    }

    /// Removes and returns all queued messages in order.
    async fn drain(&self) -> Vec<QueueMessage> {
        let mut drained = Vec::new();
        while let Ok(Some(message)) = self.dequeue().await {
            drained.push(message);
        }
        drained
    }

    /// Discards all queued messages.
    async fn clear(&self) {
        let _ = self.drain().await;
    }
}

/// Dequeues ahead of this head position never trigger compaction.
const COMPACT_MIN_HEAD: usize = 50;

/// In-memory FIFO queue.
///
/// Messages live in a single `Vec`; `dequeue` advances a head index instead
/// of shifting, and once the consumed prefix both exceeds
/// [`COMPACT_MIN_HEAD`] and makes up more than half the buffer it is dropped
/// in one pass.
#[derive(Default)]
pub struct InMemoryEventQueue {
    state: Mutex<RingState>,
}

#[derive(Default)]
struct RingState {
    items: Vec<Option<QueueMessage>>,
    head: usize,
}

impl InMemoryEventQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventQueue for InMemoryEventQueue {
    async fn enqueue(&self, message: QueueMessage) -> Result<(), QueueError> {
        let mut state = self.state.lock().expect("queue lock poisoned");
        state.items.push(Some(message));
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<QueueMessage>, QueueError> {
        let mut state = self.state.lock().expect("queue lock poisoned");
        if state.head >= state.items.len() {
            return Ok(None);
        }
        let head = state.head;
        let message = state.items[head].take();
        state.head += 1;
        if state.head > COMPACT_MIN_HEAD && state.head * 2 > state.items.len() {
            let head = state.head;
            state.items.drain(..head);
            state.head = 0;
        }
        Ok(message)
    }

    async fn size(&self) -> usize {
        let state = self.state.lock().expect("queue lock poisoned");
        state.items.len() - state.head
    }

    async fn peek(&self) -> Option<QueueMessage> {
        let state = self.state.lock().expect("queue lock poisoned");
        state.items.get(state.head).and_then(Clone::clone)
    }

    async fn list(&self) -> Vec<QueueMessage> {
        let state = self.state.lock().expect("queue lock poisoned");
        state.items[state.head..]
            .iter()
            .filter_map(Clone::clone)
            .collect()
    }

    async fn drain(&self) -> Vec<QueueMessage> {
        let mut state = self.state.lock().expect("queue lock poisoned");
        let head = state.head;
        state.head = 0;
        state
            .items
            .drain(..)
            .skip(head)
            .flatten()
            .collect()
    }

    async fn clear(&self) {
        let mut state = self.state.lock().expect("queue lock poisoned");
        state.items.clear();
        state.head = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(n: u64) -> Event {
        Event::new("test.event", json!({ "n": n })).unwrap()
    }

    #[tokio::test]
    async fn fifo_order_preserved() {
        let queue = InMemoryEventQueue::new();
        for n in 0..10 {
            queue.enqueue(event(n).into()).await.unwrap();
        }
        assert_eq!(queue.size().await, 10);

        for n in 0..10 {
            let message = queue.dequeue().await.unwrap().expect("message");
            assert_eq!(message.event.payload["n"], n);
        }
        assert_eq!(queue.size().await, 0);
        assert!(queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn compaction_keeps_order_under_churn() {
        let queue = InMemoryEventQueue::new();
        let mut next_in = 0u64;
        let mut next_out = 0u64;

        // Interleave enqueues and dequeues well past the compaction threshold.
        for _ in 0..40 {
            for _ in 0..7 {
                queue.enqueue(event(next_in).into()).await.unwrap();
                next_in += 1;
            }
            for _ in 0..5 {
                let message = queue.dequeue().await.unwrap().expect("message");
                assert_eq!(message.event.payload["n"], next_out);
                next_out += 1;
            }
        }

        while let Some(message) = queue.dequeue().await.unwrap() {
            assert_eq!(message.event.payload["n"], next_out);
            next_out += 1;
        }
        assert_eq!(next_out, next_in);
        assert_eq!(queue.size().await, 0);
    }

    #[tokio::test]
    async fn peek_does_not_consume() {
        let queue = InMemoryEventQueue::new();
        queue.enqueue(event(1).into()).await.unwrap();

        let peeked = queue.peek().await.expect("head");
        assert_eq!(peeked.event.payload["n"], 1);
        assert_eq!(queue.size().await, 1);
    }

    #[tokio::test]
    async fn drain_returns_live_suffix_and_clears() {
        let queue = InMemoryEventQueue::new();
        for n in 0..5 {
            queue.enqueue(event(n).into()).await.unwrap();
        }
        queue.dequeue().await.unwrap();
        queue.dequeue().await.unwrap();

        let drained = queue.drain().await;
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[0].event.payload["n"], 2);
        assert_eq!(queue.size().await, 0);
    }

    #[tokio::test]
    async fn envelope_callbacks_invoked() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let acked = Arc::new(AtomicUsize::new(0));
        let acked_clone = Arc::clone(&acked);
        let message = QueueMessage::new(event(1)).with_ack(Arc::new(move || {
            let acked = Arc::clone(&acked_clone);
            Box::pin(async move {
                acked.fetch_add(1, Ordering::SeqCst);
            })
        }));

        message.acknowledge().await;
        assert_eq!(acked.load(Ordering::SeqCst), 1);

        // A bare envelope has no callbacks; both are no-ops.
        let bare = QueueMessage::from(event(2));
        bare.acknowledge().await;
        bare.reject("unused").await;
    }
}
