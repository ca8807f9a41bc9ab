//! WebSocket Gateway Transport
//!
//! Talks to the gateway through a sidecar that exposes the vendor API as JSON
//! over a WebSocket. Each connect opens one socket and spawns two tasks: a
//! reader that decodes frames onto the event channel and a writer that drains
//! the outbound command queue.
//!
//! # Endpoint URL
//!
//! `ws://{host}:{port}/?clientId={client_id}` unless an explicit bridge URL is
//! configured, in which case the client id is appended to its query.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::codec::JsonCodec;
use crate::application::ports::{
    GatewayConnection, GatewayLink, GatewayTransport, InboundItem, TransportError,
};
use crate::domain::gateway::OutboundCommand;
use crate::domain::session::GatewayEndpoint;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Transport configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketTransportConfig {
    /// Explicit sidecar URL; derived from the endpoint when absent.
    pub bridge_url: Option<String>,
    /// Capacity of the inbound event channel.
    pub event_buffer: usize,
}

impl Default for WebSocketTransportConfig {
    fn default() -> Self {
        Self {
            bridge_url: None,
            event_buffer: 4096,
        }
    }
}

/// [`GatewayTransport`] over a JSON WebSocket sidecar.
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport {
    config: WebSocketTransportConfig,
    codec: JsonCodec,
}

impl WebSocketTransport {
    /// Create a transport.
    #[must_use]
    pub const fn new(config: WebSocketTransportConfig) -> Self {
        Self {
            config,
            codec: JsonCodec::new(),
        }
    }

    /// URL used to reach `endpoint`.
    #[must_use]
    pub fn url_for(&self, endpoint: &GatewayEndpoint) -> String {
        match &self.config.bridge_url {
            Some(base) => {
                let separator = if base.contains('?') { '&' } else { '?' };
                format!("{base}{separator}clientId={}", endpoint.client_id)
            }
            None => format!(
                "ws://{}:{}/?clientId={}",
                endpoint.host, endpoint.port, endpoint.client_id
            ),
        }
    }
}

#[async_trait]
impl GatewayTransport for WebSocketTransport {
    async fn connect(
        &self,
        endpoint: &GatewayEndpoint,
    ) -> Result<GatewayConnection, TransportError> {
        let url = self.url_for(endpoint);
        tracing::debug!(%url, "Opening gateway bridge socket");

        let (socket, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Refused(e.to_string()))?;
        let (write, read) = socket.split();

        let (event_tx, events) = mpsc::channel(self.config.event_buffer.max(1));
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let live = Arc::new(AtomicBool::new(true));
        let closed = CancellationToken::new();

        tokio::spawn(read_frames(
            read,
            event_tx,
            self.codec,
            Arc::clone(&live),
            closed.clone(),
        ));
        tokio::spawn(write_commands(
            write,
            command_rx,
            self.codec,
            Arc::clone(&live),
            closed.clone(),
        ));

        Ok(GatewayConnection {
            link: Arc::new(WebSocketLink {
                commands: command_tx,
                live,
                closed,
            }),
            events,
        })
    }
}

/// Outbound half of a sidecar socket.
#[derive(Debug)]
struct WebSocketLink {
    commands: mpsc::UnboundedSender<OutboundCommand>,
    live: Arc<AtomicBool>,
    closed: CancellationToken,
}

impl GatewayLink for WebSocketLink {
    fn send(&self, command: OutboundCommand) -> Result<(), TransportError> {
        if !self.is_live() {
            return Err(TransportError::Closed);
        }
        self.commands
            .send(command)
            .map_err(|_| TransportError::Closed)
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn close(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            tracing::debug!("Closing gateway bridge socket");
        }
        self.closed.cancel();
    }
}

async fn read_frames(
    mut read: SplitStream<Socket>,
    events: mpsc::Sender<InboundItem>,
    codec: JsonCodec,
    live: Arc<AtomicBool>,
    closed: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            () = closed.cancelled() => break,
            frame = read.next() => frame,
        };

        let items: Vec<InboundItem> = match frame {
            Some(Ok(Message::Text(text))) => match codec.decode(&text) {
                Ok(decoded) => decoded.into_iter().map(Ok).collect(),
                Err(e) => vec![Err(TransportError::Decode(e.to_string()))],
            },
            Some(Ok(Message::Close(_))) => {
                tracing::info!("Gateway bridge sent close frame");
                break;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Gateway bridge socket error");
                break;
            }
            None => break,
        };

        for item in items {
            if events.send(item).await.is_err() {
                tracing::debug!("Event receiver dropped");
                live.store(false, Ordering::SeqCst);
                closed.cancel();
                return;
            }
        }
    }

    live.store(false, Ordering::SeqCst);
    closed.cancel();
}

async fn write_commands(
    mut write: SplitSink<Socket, Message>,
    mut commands: mpsc::UnboundedReceiver<OutboundCommand>,
    codec: JsonCodec,
    live: Arc<AtomicBool>,
    closed: CancellationToken,
) {
    loop {
        let command = tokio::select! {
            () = closed.cancelled() => break,
            command = commands.recv() => match command {
                Some(command) => command,
                None => break,
            },
        };

        let kind = command.kind();
        let frame = match codec.encode(&command) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(kind, error = %e, "Failed to encode gateway command");
                continue;
            }
        };
        if let Err(e) = write.send(Message::Text(frame.into())).await {
            tracing::warn!(kind, error = %e, "Failed to write gateway command");
            break;
        }
        tracing::debug!(kind, "Gateway command sent");
    }

    live.store(false, Ordering::SeqCst);
    closed.cancel();
    let _ = write.close().await;
}
