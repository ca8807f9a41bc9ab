//! Operation Errors
//!
//! Errors surfaced to callers of the session's public operations, either
//! inline (precondition failures) or through a resolved correlation future.

use std::time::Duration;

use crate::domain::session::{RequestId, SessionState};

use super::ports::TransportError;

/// Error returned by session operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// The operation needs a connected session.
    #[error("not connected to gateway")]
    NotConnected,

    /// Connect was called while the session was not disconnected.
    #[error("session is {0}")]
    InvalidState(SessionState),

    /// The gateway reported an error for this correlation id.
    #[error("gateway error {code}: {message}")]
    Protocol {
        /// Gateway error code.
        code: i32,
        /// Gateway message text.
        message: String,
    },

    /// A contract-details request finished without any match.
    #[error("no contract found for request {0}")]
    NoContractFound(RequestId),

    /// A correlation slot is already registered under this id.
    #[error("correlation id {0} is already pending")]
    DuplicateCorrelation(i32),

    /// The id range for requests or tickers is used up.
    #[error("{0} ids exhausted")]
    IdsExhausted(&'static str),

    /// The awaited stream was cancelled.
    #[error("cancelled")]
    Cancelled,

    /// The session went away before the correlation resolved.
    #[error("connection lost")]
    ConnectionLost,

    /// The caller's wait expired.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// An outbound write failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl GatewayError {
    /// Whether the error came from the gateway itself.
    #[must_use]
    pub const fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let err = GatewayError::Protocol {
            code: 200,
            message: "No security definition has been found".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "gateway error 200: No security definition has been found"
        );
        assert!(err.is_protocol());

        assert_eq!(
            GatewayError::InvalidState(SessionState::Connected).to_string(),
            "session is connected"
        );
        assert_eq!(
            GatewayError::from(TransportError::Closed).to_string(),
            "link closed"
        );
    }
}
