//! Error types for the chat state machines.
//!
//! Only [`SendError`] is ever shown to the user. Everything the transport or
//! the poller produces is recoverable and ends up in logs and in the passive
//! connection indicator instead.

use thiserror::Error;

/// A push payload that could not be turned into a [`crate::Message`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    /// Payload is not a message-shaped JSON object.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// Required field absent.
    #[error("missing field: {0}")]
    MissingField(&'static str),
}

/// User-visible send failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// Content is empty after trimming. Rejected before any network call.
    #[error("message is empty")]
    EmptyContent,

    /// Neither a joined conversation nor a recipient is known.
    #[error("no recipient for message")]
    NoRecipient,

    /// Push and REST paths both failed.
    #[error("message could not be sent: {reason}")]
    Rejected {
        /// Last failure reason.
        reason: String,
    },
}

impl SendError {
    /// Returns true if retrying the same content may succeed.
    ///
    /// Validation failures never succeed on retry; delivery failures might.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_delivery_failures_are_retryable() {
        assert!(!SendError::EmptyContent.is_retryable());
        assert!(!SendError::NoRecipient.is_retryable());
        assert!(SendError::Rejected { reason: "timeout".into() }.is_retryable());
    }

    #[test]
    fn display_includes_reason() {
        let err = SendError::Rejected { reason: "503".into() };
        assert_eq!(err.to_string(), "message could not be sent: 503");
    }
}
