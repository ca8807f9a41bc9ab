//! Listener Protocol
//!
//! Messages exchanged with broadcast listeners over their duplex connection.
//!
//! Listeners may acknowledge interest in symbols, but delivery is not
//! filtered: every listener receives every market data envelope.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::market_data::MarketDataSubscription;

/// Identifier of a connected listener.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListenerId(String);

impl ListenerId {
    /// Create a listener id from any string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random listener id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Requests
// =============================================================================

/// Message sent by a listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerRequest {
    /// Acknowledge interest in a symbol.
    Subscribe {
        /// Symbol of interest.
        symbol: String,
    },
    /// Withdraw interest in a symbol.
    Unsubscribe {
        /// Symbol no longer of interest.
        symbol: String,
    },
    /// Liveness probe.
    Ping,
    /// Well-formed message with an unrecognised `type`.
    Unknown(String),
}

/// Reasons a listener message could not be understood.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ListenerProtocolError {
    /// Not a JSON object.
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    /// No string `type` field.
    #[error("missing message type")]
    MissingType,
    /// A subscription message without a symbol.
    #[error("missing symbol for {0}")]
    MissingSymbol(String),
}

impl ListenerRequest {
    /// Parse a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed JSON, a missing `type`, or a
    /// subscription message without a `symbol`.
    pub fn parse(text: &str) -> Result<Self, ListenerProtocolError> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| ListenerProtocolError::InvalidJson(e.to_string()))?;

        let kind = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or(ListenerProtocolError::MissingType)?;

        let symbol = || {
            value
                .get("symbol")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| ListenerProtocolError::MissingSymbol(kind.to_string()))
        };

        match kind {
            "subscribe" => Ok(Self::Subscribe { symbol: symbol()? }),
            "unsubscribe" => Ok(Self::Unsubscribe { symbol: symbol()? }),
            "ping" => Ok(Self::Ping),
            other => Ok(Self::Unknown(other.to_string())),
        }
    }
}

// =============================================================================
// Replies
// =============================================================================

/// Subscription acknowledgement status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    /// Interest recorded.
    Subscribed,
    /// Interest withdrawn.
    Unsubscribed,
}

/// Message sent to a listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ListenerMessage {
    /// Sent once after the connection is registered.
    Connection {
        /// Always `connected`.
        status: String,
        /// Listener id.
        session_id: ListenerId,
        /// Human-readable text.
        message: String,
    },
    /// Reply to subscribe/unsubscribe.
    Subscription {
        /// Acknowledged action.
        status: AckStatus,
        /// Symbol from the request.
        symbol: String,
        /// Human-readable text.
        message: String,
    },
    /// Reply to ping (epoch milliseconds).
    Pong {
        /// Server time.
        timestamp: i64,
    },
    /// Reply to a message that could not be handled.
    Error {
        /// Failure description.
        message: String,
    },
    /// Snapshot broadcast.
    MarketData {
        /// Subscription symbol.
        symbol: String,
        /// Snapshot after the update.
        data: MarketDataSubscription,
        /// Publish time (epoch milliseconds).
        timestamp: i64,
    },
}

impl ListenerMessage {
    /// Welcome message for a new listener.
    #[must_use]
    pub fn connected(id: &ListenerId) -> Self {
        Self::Connection {
            status: "connected".to_string(),
            session_id: id.clone(),
            message: "listener connection established".to_string(),
        }
    }

    /// Acknowledgement for a subscription request.
    #[must_use]
    pub fn ack(status: AckStatus, symbol: &str) -> Self {
        let message = match status {
            AckStatus::Subscribed => format!("subscribed to {symbol} market data"),
            AckStatus::Unsubscribed => format!("unsubscribed from {symbol} market data"),
        };
        Self::Subscription {
            status,
            symbol: symbol.to_string(),
            message,
        }
    }

    /// Pong stamped now.
    #[must_use]
    pub fn pong() -> Self {
        Self::Pong {
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Error reply.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Market data envelope stamped now.
    #[must_use]
    pub fn market_data(symbol: &str, data: MarketDataSubscription) -> Self {
        Self::MarketData {
            symbol: symbol.to_string(),
            data,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Encode as a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
