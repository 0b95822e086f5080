//! Collaborator error types.
//!
//! None of these reach the user directly. The runtime turns them into
//! results for the state machines, which decide between retrying, degrading
//! to polling and surfacing a [`courier_core::SendError`].

use courier_core::ConversationId;
use thiserror::Error;

/// REST backend errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Request never got a response.
    #[error("network error: {0}")]
    Network(String),

    /// Backend answered with a non-success status.
    #[error("http {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// Response body did not decode.
    #[error("decode error: {0}")]
    Decode(String),
}

impl ApiError {
    /// Returns true if the same request may succeed later.
    ///
    /// Network failures, timeouts, throttling and server errors are
    /// transient. Client errors and undecodable bodies are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Status { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            Self::Decode(_) => false,
        }
    }
}

/// Push transport errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection could not be established.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Operation needs a started transport.
    #[error("transport not connected")]
    NotConnected,

    /// Server rejected or failed an invocation.
    #[error("invocation {method} failed: {reason}")]
    Invocation {
        /// Invoked method.
        method: String,
        /// Failure reason.
        reason: String,
    },

    /// Membership moved to another conversation before this call ran.
    #[error("membership of conversation {0} was taken over")]
    Superseded(ConversationId),

    /// Envelope could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Returns true if a reconnect may fix the failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::NotConnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient() {
        assert!(ApiError::Network("reset".into()).is_transient());
        assert!(ApiError::Status { status: 503, body: String::new() }.is_transient());
        assert!(ApiError::Status { status: 429, body: String::new() }.is_transient());
        assert!(!ApiError::Status { status: 400, body: String::new() }.is_transient());
        assert!(!ApiError::Decode("eof".into()).is_transient());
    }

    #[test]
    fn protocol_errors_are_fatal() {
        assert!(TransportError::NotConnected.is_transient());
        assert!(!TransportError::Protocol("bad frame".into()).is_transient());
        assert!(!TransportError::Superseded(42).is_transient());
    }
}
