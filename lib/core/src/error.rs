//! Serializable error reports.
//!
//! Handler failures cross two persistence boundaries: dispatch results keep
//! them for the caller, and run records write them to stores as JSON. Both
//! use [`ErrorInfo`], a flattened view of a `std::error::Error` with its
//! `source()` chain preserved as nested causes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Boxed error type returned by event, node, and job handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A serializable snapshot of an error and its cause chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Short classifier for the error (defaults to `"Error"`).
    pub name: String,
    /// Human-readable error message.
    pub message: String,
    /// The underlying cause, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<ErrorInfo>>,
}

impl ErrorInfo {
    /// Creates an error report with the default `"Error"` name.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            name: "Error".to_string(),
            message: message.into(),
            cause: None,
        }
    }

    /// Creates an error report with an explicit name.
    #[must_use]
    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            cause: None,
        }
    }

    /// Captures an error and its full `source()` chain.
    #[must_use]
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        Self {
            name: "Error".to_string(),
            message: error.to_string(),
            cause: error.source().map(|s| Box::new(Self::from_error(s))),
        }
    }

    /// Attaches a cause to this report.
    #[must_use]
    pub fn with_cause(mut self, cause: ErrorInfo) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Returns the depth of the cause chain, counting this report.
    #[must_use]
    pub fn chain_len(&self) -> usize {
        1 + self.cause.as_ref().map_or(0, |c| c.chain_len())
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

impl From<&BoxError> for ErrorInfo {
    fn from(error: &BoxError) -> Self {
        Self::from_error(error.as_ref())
    }
}
