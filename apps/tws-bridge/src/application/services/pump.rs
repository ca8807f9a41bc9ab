//! Message Pump
//!
//! The single consumer of the inbound event stream for one connected
//! session. Events are dispatched strictly in arrival order:
//!
//! ```text
//! connectAck / connectionClosed ──► handshake slot (id 0)
//! contractDetails / …End        ──► request table
//! tickPrice / tickSize          ──► registry ──► first-tick slot ──► broadcast
//! error                         ──► request table + first-tick slot
//! everything else               ──► logged
//! ```
//!
//! A decode failure terminates the pump; it never resynchronizes mid-stream.
//! On exit every correlation still pending on this connection is resolved
//! with [`GatewayError::ConnectionLost`].

use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::pending::PendingRequests;
use super::registry::SubscriptionRegistry;
use crate::application::error::GatewayError;
use crate::application::ports::{BroadcastPort, InboundItem, TransportError};
use crate::domain::contract::ContractDetails;
use crate::domain::gateway::{InboundEvent, is_informational_error};
use crate::domain::market_data::MarketDataSubscription;
use crate::domain::session::{BOOTSTRAP_REQUEST_ID, TickerId};
use crate::infrastructure::metrics;

// =============================================================================
// Correlation Tables
// =============================================================================

/// Correlation slots owned by one connection.
#[derive(Debug)]
pub struct CorrelationTables {
    /// Bootstrap slot completed by the connect acknowledgement.
    pub handshake: PendingRequests<()>,
    /// Contract-details requests keyed by request id.
    pub requests: PendingRequests<ContractDetails>,
    /// Subscribe calls awaiting their first tick, keyed by ticker id.
    pub first_ticks: PendingRequests<MarketDataSubscription>,
}

impl Default for CorrelationTables {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationTables {
    /// Create empty tables.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handshake: PendingRequests::new("handshake"),
            requests: PendingRequests::new("requests"),
            first_ticks: PendingRequests::new("first_ticks"),
        }
    }

    /// Resolve every pending slot in every table with `error`.
    pub fn fail_all(&self, error: &GatewayError) -> usize {
        self.handshake.fail_all(error) + self.requests.fail_all(error) + self.first_ticks.fail_all(error)
    }

    /// Total pending slots.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.handshake.len() + self.requests.len() + self.first_ticks.len()
    }
}

// =============================================================================
// Pump
// =============================================================================

/// Pump failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PumpError {
    /// The transport delivered an undecodable frame.
    #[error("inbound stream failed: {0}")]
    Stream(#[from] TransportError),
}

/// Why the pump stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpExit {
    /// Cancelled by the session.
    Stopped,
    /// The inbound channel ended.
    StreamEnded,
    /// The gateway closed the session.
    Closed,
    /// A decode failure.
    Failed(PumpError),
}

/// Routes inbound events for one connection.
pub struct MessagePump {
    tables: Arc<CorrelationTables>,
    registry: Arc<SubscriptionRegistry>,
    broadcast: Arc<dyn BroadcastPort>,
    alive: Arc<AtomicBool>,
}

impl std::fmt::Debug for MessagePump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagePump")
            .field("pending", &self.tables.pending())
            .field("alive", &self.alive.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl MessagePump {
    /// Create a pump. `alive` is cleared when the pump exits.
    #[must_use]
    pub fn new(
        tables: Arc<CorrelationTables>,
        registry: Arc<SubscriptionRegistry>,
        broadcast: Arc<dyn BroadcastPort>,
        alive: Arc<AtomicBool>,
    ) -> Self {
        Self {
            tables,
            registry,
            broadcast,
            alive,
        }
    }

    /// Consume `events` until cancellation, stream end, gateway close or a
    /// decode failure.
    pub async fn run(
        self,
        mut events: mpsc::Receiver<InboundItem>,
        cancel: CancellationToken,
    ) -> PumpExit {
        self.alive.store(true, Ordering::SeqCst);
        tracing::info!("Message pump started");

        let exit = loop {
            let item = tokio::select! {
                biased;
                () = cancel.cancelled() => break PumpExit::Stopped,
                item = events.recv() => item,
            };

            match item {
                None => break PumpExit::StreamEnded,
                Some(Err(e)) => {
                    tracing::error!(error = %e, "Inbound event could not be decoded, stopping pump");
                    metrics::record_pump_failure();
                    break PumpExit::Failed(e.into());
                }
                Some(Ok(event)) => {
                    if let ControlFlow::Break(exit) = self.dispatch(event) {
                        break exit;
                    }
                }
            }
        };

        self.alive.store(false, Ordering::SeqCst);
        let resolved = self.tables.fail_all(&GatewayError::ConnectionLost);
        tracing::info!(?exit, resolved, "Message pump stopped");
        exit
    }

    /// Route one event.
    pub fn dispatch(&self, event: InboundEvent) -> ControlFlow<PumpExit> {
        metrics::record_event_received(event.kind());

        match event {
            InboundEvent::ConnectAck => {
                if !self.tables.handshake.complete(BOOTSTRAP_REQUEST_ID, ()) {
                    tracing::debug!("Connect acknowledgement with no handshake pending");
                }
            }
            InboundEvent::ConnectionClosed => {
                tracing::warn!("Gateway closed the session");
                self.tables
                    .handshake
                    .fail(BOOTSTRAP_REQUEST_ID, GatewayError::ConnectionLost);
                return ControlFlow::Break(PumpExit::Closed);
            }
            InboundEvent::ContractDetails { req_id, details } => {
                let con_id = details.con_id();
                if self.tables.requests.complete(req_id, details) {
                    tracing::debug!(req_id, con_id, "Contract details resolved");
                } else {
                    tracing::debug!(req_id, con_id, "Contract details for unknown request");
                    metrics::record_unknown_correlation("contract_details");
                }
            }
            InboundEvent::ContractDetailsEnd { req_id } => {
                if self
                    .tables
                    .requests
                    .fail(req_id, GatewayError::NoContractFound(req_id))
                {
                    tracing::info!(req_id, "Contract details ended without a match");
                }
            }
            InboundEvent::TickPrice {
                ticker_id,
                field,
                price,
            } => {
                let updated = self.registry.apply_price_tick(ticker_id, field, price);
                self.on_tick(ticker_id, updated);
            }
            InboundEvent::TickSize {
                ticker_id,
                field,
                size,
            } => {
                let updated = self.registry.apply_size_tick(ticker_id, field, size);
                self.on_tick(ticker_id, updated);
            }
            InboundEvent::Error { id, code, message } => self.on_error(id, code, message),
            other => {
                tracing::debug!(kind = other.kind(), event = ?other, "Inbound event observed");
            }
        }

        ControlFlow::Continue(())
    }

    fn on_tick(&self, ticker_id: TickerId, updated: Option<MarketDataSubscription>) {
        let Some(snapshot) = updated else {
            tracing::debug!(ticker_id, "Tick for unknown ticker dropped");
            metrics::record_tick_dropped();
            return;
        };

        self.tables.first_ticks.complete(ticker_id, snapshot.clone());
        self.broadcast.publish(&snapshot.symbol, &snapshot);
    }

    fn on_error(&self, id: i32, code: i32, message: String) {
        if is_informational_error(id, code) {
            tracing::info!(id, code, %message, "Gateway notice");
            return;
        }

        let error = GatewayError::Protocol { code, message };
        let mut matched = self.tables.requests.fail(id, error.clone());
        matched |= self.tables.first_ticks.fail(id, error.clone());
        if id == BOOTSTRAP_REQUEST_ID {
            matched |= self.tables.handshake.fail(id, error.clone());
        }

        if matched {
            tracing::warn!(id, error = %error, "Gateway error resolved pending request");
        } else if self.registry.contains(id) {
            tracing::warn!(ticker_id = id, error = %error, "Gateway error for active subscription");
        } else {
            tracing::warn!(id, error = %error, "Gateway error for unknown correlation");
            metrics::record_unknown_correlation("error");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
