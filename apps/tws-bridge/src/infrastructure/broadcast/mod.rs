//! Broadcast Hub
//!
//! Fans market data snapshots out to every registered listener.
//!
//! # Delivery
//!
//! Each publish builds one `marketData` envelope and hands the same
//! `Arc` to every listener sink without waiting. A listener whose buffer is
//! full misses that message; a listener whose sink is closed is evicted
//! after the pass. Listeners are not filtered by symbol.
//!
//! Registration and removal may race with a publish: a listener added
//! mid-publish may or may not see that message, and a listener marked
//! removed is skipped even if the publish already snapshotted it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;

use crate::application::ports::{BroadcastPort, BroadcastSink, SinkError};
use crate::domain::listener::{ListenerId, ListenerMessage};
use crate::domain::market_data::MarketDataSubscription;
use crate::infrastructure::config::BroadcastSettings;
use crate::infrastructure::metrics;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for listener delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastConfig {
    /// Messages buffered per listener before drops begin.
    pub listener_buffer: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            listener_buffer: 1024,
        }
    }
}

impl From<BroadcastSettings> for BroadcastConfig {
    fn from(settings: BroadcastSettings) -> Self {
        Self {
            listener_buffer: settings.listener_buffer,
        }
    }
}

// =============================================================================
// Broadcast Hub
// =============================================================================

struct ListenerEntry {
    sink: Arc<dyn BroadcastSink>,
    active: AtomicBool,
}

/// Listener set with non-blocking fan-out.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
///
/// use tws_bridge::application::ports::BroadcastPort;
/// use tws_bridge::domain::listener::ListenerId;
/// use tws_bridge::infrastructure::broadcast::BroadcastHub;
///
/// let hub = BroadcastHub::with_defaults();
/// let (tx, _rx) = tokio::sync::mpsc::channel(hub.config().listener_buffer);
///
/// hub.add_listener(ListenerId::generate(), Arc::new(tx));
/// assert_eq!(hub.listener_count(), 1);
/// ```
pub struct BroadcastHub {
    config: BroadcastConfig,
    listeners: DashMap<ListenerId, Arc<ListenerEntry>>,
}

impl std::fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("config", &self.config)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl BroadcastHub {
    /// Create a new broadcast hub with the given configuration.
    #[must_use]
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            config,
            listeners: DashMap::new(),
        }
    }

    /// Create a new broadcast hub with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(BroadcastConfig::default())
    }

    /// Delivery configuration.
    #[must_use]
    pub const fn config(&self) -> BroadcastConfig {
        self.config
    }

    /// Send an already-built message to every active listener.
    ///
    /// Returns the number of listeners that accepted it.
    pub fn send(&self, message: &Arc<ListenerMessage>) -> usize {
        let targets: Vec<(ListenerId, Arc<ListenerEntry>)> = self
            .listeners
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut delivered = 0;
        let mut dropped = 0;
        let mut closed = Vec::new();

        for (id, entry) in targets {
            if !entry.active.load(Ordering::SeqCst) {
                continue;
            }
            match entry.sink.deliver(Arc::clone(message)) {
                Ok(()) => delivered += 1,
                Err(SinkError::Full) => {
                    dropped += 1;
                    tracing::debug!(listener = %id, "Listener buffer full, message dropped");
                }
                Err(SinkError::Closed) => closed.push((id, entry)),
            }
        }

        let mut evicted = 0_u64;
        for (id, entry) in closed {
            entry.active.store(false, Ordering::SeqCst);
            if self
                .listeners
                .remove_if(&id, |_, current| Arc::ptr_eq(current, &entry))
                .is_some()
            {
                evicted += 1;
                tracing::info!(listener = %id, "Evicted closed listener");
            }
        }

        metrics::record_broadcasts_sent(delivered as u64);
        if dropped > 0 {
            metrics::record_broadcasts_dropped(dropped);
        }
        if evicted > 0 {
            metrics::record_listeners_evicted(evicted);
            metrics::set_listeners(self.listeners.len());
        }
        delivered
    }

    /// Current listener statistics.
    #[must_use]
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            listeners: self.listeners.len(),
            listener_buffer: self.config.listener_buffer,
        }
    }
}

impl BroadcastPort for BroadcastHub {
    fn add_listener(&self, id: ListenerId, sink: Arc<dyn BroadcastSink>) {
        let entry = Arc::new(ListenerEntry {
            sink,
            active: AtomicBool::new(true),
        });
        if let Some(previous) = self.listeners.insert(id.clone(), entry) {
            previous.active.store(false, Ordering::SeqCst);
        }
        metrics::set_listeners(self.listeners.len());
        tracing::info!(listener = %id, total = self.listeners.len(), "Listener registered");
    }

    fn remove_listener(&self, id: &ListenerId) -> bool {
        let removed = self.listeners.remove(id).map(|(_, entry)| {
            entry.active.store(false, Ordering::SeqCst);
        });
        metrics::set_listeners(self.listeners.len());
        if removed.is_some() {
            tracing::info!(listener = %id, total = self.listeners.len(), "Listener removed");
        }
        removed.is_some()
    }

    fn publish(&self, symbol: &str, snapshot: &MarketDataSubscription) -> usize {
        if self.listeners.is_empty() {
            return 0;
        }
        let message = Arc::new(ListenerMessage::market_data(symbol, snapshot.clone()));
        self.send(&message)
    }

    fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

/// Statistics about the listener set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    /// Registered listeners.
    pub listeners: usize,
    /// Per-listener buffer size.
    pub listener_buffer: usize,
}

// =============================================================================
// Tests
// =============================================================================
