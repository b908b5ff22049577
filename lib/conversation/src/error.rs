//! Error types for conversation persistence.

use std::fmt;

/// Errors from conversation store backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationError {
    /// The backend failed to read or write.
    Storage { message: String },
    /// Memory could not be encoded or decoded.
    Serialization { message: String },
}

impl fmt::Display for ConversationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage { message } => write!(f, "conversation storage failed: {message}"),
            Self::Serialization { message } => {
                write!(f, "conversation memory serialization failed: {message}")
            }
        }
    }
}

impl std::error::Error for ConversationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ConversationError::Storage {
            message: "disk full".to_string(),
        };
        assert!(err.to_string().contains("disk full"));
    }
}
