//! Event model, queue, and dispatcher for the switchyard orchestration suite.
//!
//! This crate provides:
//!
//! - **Event**: Immutable event values with correlation metadata
//! - **Queue**: The [`EventQueue`] interface, ack/nack message envelopes, and
//!   an in-memory FIFO with amortized compaction
//! - **Dispatcher**: Typed and wildcard subscriptions with per-subscriber
//!   filters, one-shot delivery, and collected (never thrown) handler errors

pub mod dispatcher;
pub mod error;
pub mod event;
pub mod queue;

pub use dispatcher::{
    DispatchContext, DispatchError, DispatchResult, DispatchStage, EventDispatcher,
    SubscribeOptions, Subscriber, SubscriberFilter, SubscriberHandler,
};
pub use error::{EventError, QueueError};
pub use event::{Event, EventMetadata};
pub use queue::{AckFn, EventQueue, InMemoryEventQueue, NackFn, QueueMessage};
