//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `GatewayTransport`: Opens a link to the gateway and hands back the
//!   decoded inbound event stream
//! - `GatewayLink`: Fire-and-forget outbound writes on an open link
//! - `BroadcastPort`: Fan-out of subscription snapshots to listeners
//!
//! ## Listener Side
//!
//! - `BroadcastSink`: One addressable listener connection

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::gateway::{InboundEvent, OutboundCommand};
use crate::domain::listener::{ListenerId, ListenerMessage};
use crate::domain::market_data::MarketDataSubscription;
use crate::domain::session::GatewayEndpoint;

// =============================================================================
// Gateway Transport
// =============================================================================

/// Transport failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The gateway refused or could not be reached.
    #[error("connection refused: {0}")]
    Refused(String),

    /// The link is closed.
    #[error("link closed")]
    Closed,

    /// An outbound write failed.
    #[error("send failed: {0}")]
    Send(String),

    /// An inbound frame could not be decoded.
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Item delivered on the inbound event channel.
pub type InboundItem = Result<InboundEvent, TransportError>;

/// A freshly opened gateway link.
pub struct GatewayConnection {
    /// Outbound half.
    pub link: Arc<dyn GatewayLink>,
    /// Inbound events in arrival order. The channel ends when the link closes.
    pub events: mpsc::Receiver<InboundItem>,
}

impl std::fmt::Debug for GatewayConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConnection")
            .field("live", &self.link.is_live())
            .finish_non_exhaustive()
    }
}

/// Opens links to the gateway.
#[async_trait]
pub trait GatewayTransport: Send + Sync {
    /// Connect to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Refused`] if the gateway cannot be reached.
    async fn connect(&self, endpoint: &GatewayEndpoint)
    -> Result<GatewayConnection, TransportError>;
}

/// Outbound half of an open link.
pub trait GatewayLink: Send + Sync {
    /// Queue a command for the gateway.
    ///
    /// # Errors
    ///
    /// Returns an error if the link is closed.
    fn send(&self, command: OutboundCommand) -> Result<(), TransportError>;

    /// Whether the link is still usable.
    fn is_live(&self) -> bool;

    /// Close the link. Idempotent.
    fn close(&self);
}

// =============================================================================
// Broadcast
// =============================================================================

/// Listener delivery failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The listener is gone.
    #[error("listener closed")]
    Closed,
    /// The listener is not keeping up; this message was dropped.
    #[error("listener buffer full")]
    Full,
}

/// One listener connection.
pub trait BroadcastSink: Send + Sync {
    /// Deliver a message without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Closed`] when the listener is gone and
    /// [`SinkError::Full`] when its buffer is full.
    fn deliver(&self, message: Arc<ListenerMessage>) -> Result<(), SinkError>;
}

impl BroadcastSink for mpsc::Sender<Arc<ListenerMessage>> {
    fn deliver(&self, message: Arc<ListenerMessage>) -> Result<(), SinkError> {
        self.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

/// Fan-out of snapshots to the listener set.
pub trait BroadcastPort: Send + Sync {
    /// Register a listener, replacing any listener with the same id.
    fn add_listener(&self, id: ListenerId, sink: Arc<dyn BroadcastSink>);

    /// Unregister a listener. Returns whether it was registered.
    fn remove_listener(&self, id: &ListenerId) -> bool;

    /// Send a market data envelope to every listener. Returns the number of
    /// listeners that accepted it.
    fn publish(&self, symbol: &str, snapshot: &MarketDataSubscription) -> usize;

    /// Number of registered listeners.
    fn listener_count(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_sink_maps_errors() {
        let (tx, rx) = mpsc::channel::<Arc<ListenerMessage>>(1);
        let message = Arc::new(ListenerMessage::pong());

        assert!(tx.deliver(Arc::clone(&message)).is_ok());
        assert_eq!(tx.deliver(Arc::clone(&message)), Err(SinkError::Full));

        drop(rx);
        assert_eq!(tx.deliver(message), Err(SinkError::Closed));
    }
}
