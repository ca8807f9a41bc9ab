//! In-Memory Gateway Transport
//!
//! A gateway stand-in driven from the test side. Events are injected onto the
//! most recently opened connection that is still live, and every command
//! written by the session is recorded.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::application::ports::{
    GatewayConnection, GatewayLink, GatewayTransport, InboundItem, TransportError,
};
use crate::domain::gateway::{InboundEvent, OutboundCommand};
use crate::domain::session::GatewayEndpoint;

const EVENT_BUFFER: usize = 1024;

#[derive(Debug)]
struct ActiveLink {
    events: mpsc::Sender<InboundItem>,
    live: Arc<AtomicBool>,
}

#[derive(Debug)]
struct Shared {
    refuse: AtomicBool,
    auto_ack: AtomicBool,
    connects: AtomicUsize,
    endpoints: Mutex<Vec<GatewayEndpoint>>,
    sent: Mutex<Vec<OutboundCommand>>,
    next_delay: Mutex<Option<Duration>>,
    links: Mutex<Vec<ActiveLink>>,
}

/// Scriptable [`GatewayTransport`].
///
/// Clones share state, so a test keeps one handle while the session owns
/// another.
#[derive(Debug, Clone)]
pub struct InMemoryTransport {
    shared: Arc<Shared>,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTransport {
    /// Transport that accepts connections and acknowledges them at once.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                refuse: AtomicBool::new(false),
                auto_ack: AtomicBool::new(true),
                connects: AtomicUsize::new(0),
                endpoints: Mutex::new(Vec::new()),
                sent: Mutex::new(Vec::new()),
                next_delay: Mutex::new(None),
                links: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Refuse further connects.
    pub fn set_refuse(&self, refuse: bool) {
        self.shared.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Queue a `ConnectAck` on every new connection.
    pub fn set_auto_ack(&self, auto_ack: bool) {
        self.shared.auto_ack.store(auto_ack, Ordering::SeqCst);
    }

    /// Hold the next connect call for `delay` before it resolves.
    pub fn delay_next_connect(&self, delay: Duration) {
        *self.shared.next_delay.lock() = Some(delay);
    }

    /// Number of connect calls, refused ones included.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    /// Endpoints passed to connect, in order.
    #[must_use]
    pub fn endpoints(&self) -> Vec<GatewayEndpoint> {
        self.shared.endpoints.lock().clone()
    }

    /// Commands written on any link so far.
    #[must_use]
    pub fn sent(&self) -> Vec<OutboundCommand> {
        self.shared.sent.lock().clone()
    }

    /// Whether a connection is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open_links() > 0
    }

    /// Number of connections neither closed nor severed.
    #[must_use]
    pub fn open_links(&self) -> usize {
        self.shared.links.lock().len()
    }

    /// Deliver an event on the newest open connection. Returns false if none
    /// is open or its buffer is full.
    pub fn inject(&self, event: InboundEvent) -> bool {
        self.push(Ok(event))
    }

    /// Deliver a transport failure on the newest open connection.
    pub fn inject_failure(&self, error: TransportError) -> bool {
        self.push(Err(error))
    }

    /// Drop the newest connection as a dead gateway would.
    pub fn sever(&self) {
        if let Some(active) = self.shared.links.lock().pop() {
            active.live.store(false, Ordering::SeqCst);
        }
    }

    fn push(&self, item: InboundItem) -> bool {
        self.shared
            .links
            .lock()
            .last()
            .is_some_and(|active| active.events.try_send(item).is_ok())
    }
}

#[async_trait]
impl GatewayTransport for InMemoryTransport {
    async fn connect(
        &self,
        endpoint: &GatewayEndpoint,
    ) -> Result<GatewayConnection, TransportError> {
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        self.shared.endpoints.lock().push(endpoint.clone());

        let delay = self.shared.next_delay.lock().take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.shared.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Refused(format!("{endpoint} refused")));
        }

        let (tx, events) = mpsc::channel(EVENT_BUFFER);
        if self.shared.auto_ack.load(Ordering::SeqCst) {
            let _ = tx.try_send(Ok(InboundEvent::ConnectAck));
        }

        let live = Arc::new(AtomicBool::new(true));
        self.shared.links.lock().push(ActiveLink {
            events: tx,
            live: Arc::clone(&live),
        });

        Ok(GatewayConnection {
            link: Arc::new(InMemoryLink {
                shared: Arc::clone(&self.shared),
                live,
            }),
            events,
        })
    }
}

#[derive(Debug)]
struct InMemoryLink {
    shared: Arc<Shared>,
    live: Arc<AtomicBool>,
}

impl GatewayLink for InMemoryLink {
    fn send(&self, command: OutboundCommand) -> Result<(), TransportError> {
        if !self.is_live() {
            return Err(TransportError::Closed);
        }
        self.shared.sent.lock().push(command);
        Ok(())
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.live.store(false, Ordering::SeqCst);
        self.shared
            .links
            .lock()
            .retain(|active| !Arc::ptr_eq(&active.live, &self.live));
    }
}
