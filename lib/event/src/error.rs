//! Error types for the event crate.

use std::fmt;

/// Errors from event construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// The event type was empty or whitespace-only.
    EmptyType,
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyType => write!(f, "event type must be a non-empty string"),
        }
    }
}

impl std::error::Error for EventError {}

/// Errors from queue backends.
///
/// The in-memory queue never fails; these variants exist for pluggable
/// shared backends behind the [`crate::EventQueue`] interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The backend rejected or lost the operation.
    Backend { message: String },
    /// A message could not be encoded or decoded.
    Serialization { message: String },
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend { message } => write!(f, "queue backend error: {message}"),
            Self::Serialization { message } => {
                write!(f, "queue message serialization failed: {message}")
            }
        }
    }
}

impl std::error::Error for QueueError {}
