//! Gateway Session
//!
//! Owns the single gateway link and every public operation built on it.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected ──connect──► Connecting ──ack──► Connected
//!      ▲                        │                   │
//!      └──── refused/timeout ───┘                   │
//!      └──────────── Disconnecting ◄──disconnect────┘
//! ```
//!
//! Each successful transport connect creates a fresh session context: the
//! link, its correlation tables, the pump's cancellation token and liveness
//! flag. Tearing a context down resolves everything still pending on it with
//! [`GatewayError::ConnectionLost`].
//!
//! Request and ticker id counters belong to the session, not the context, so
//! ids are never reused across reconnects. They draw from the disjoint ranges
//! of the session's [`IdLayout`].
//!
//! Every connect attempt and every disconnect bumps the session generation.
//! A connect attempt only installs its context or reaches `Connected` while
//! its generation is still current, so a disconnect that lands mid-connect
//! makes the attempt close its own link and report `false`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::pending::{PendingRequests, PendingResponse};
use super::pump::{CorrelationTables, MessagePump};
use super::registry::SubscriptionRegistry;
use crate::application::error::GatewayError;
use crate::application::ports::{BroadcastPort, BroadcastSink, GatewayLink, GatewayTransport};
use crate::domain::contract::{ConId, ContractDetails, ContractQuery};
use crate::domain::gateway::OutboundCommand;
use crate::domain::listener::ListenerId;
use crate::domain::market_data::MarketDataSubscription;
use crate::domain::session::{
    AtomicSessionState, BOOTSTRAP_REQUEST_ID, GatewayEndpoint, IdAllocator, IdLayout, RequestId,
    SessionState, TickerId,
};
use crate::infrastructure::metrics;

// =============================================================================
// Options
// =============================================================================

/// Session tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Limit on awaiting a correlated response.
    pub request_timeout: Duration,
    /// Limit on awaiting the connect acknowledgement.
    pub handshake_timeout: Duration,
    /// Request and ticker id ranges.
    pub ids: IdLayout,
    /// Security type used for market data requests.
    pub default_sec_type: String,
    /// Exchange used for market data requests.
    pub default_exchange: String,
    /// Currency used for market data requests.
    pub default_currency: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(10),
            ids: IdLayout::default(),
            default_sec_type: "FUT".to_string(),
            default_exchange: "CME".to_string(),
            default_currency: "USD".to_string(),
        }
    }
}

// =============================================================================
// Status Types
// =============================================================================

/// Endpoint and state of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    /// Endpoint of the current or most recent connection.
    pub endpoint: Option<GatewayEndpoint>,
    /// Lifecycle state.
    pub state: SessionState,
    /// Result of [`GatewaySession::is_connected`].
    pub connected: bool,
}

/// Point-in-time view of the session for health reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    /// Lifecycle state.
    pub state: SessionState,
    /// Endpoint of the current or most recent connection.
    pub endpoint: Option<GatewayEndpoint>,
    /// Whether the link and pump are both alive.
    pub connected: bool,
    /// Whether the pump of the current connection is running.
    pub pump_alive: bool,
    /// Correlation slots awaiting resolution.
    pub pending_requests: usize,
    /// Market data subscriptions in the registry.
    pub active_subscriptions: usize,
    /// Registered broadcast listeners.
    pub listeners: usize,
}

// =============================================================================
// Market Data Stream
// =============================================================================

/// Result of a market data subscribe call.
#[derive(Debug)]
pub struct MarketDataStream {
    /// Zero-valued snapshot created at subscribe time.
    pub snapshot: MarketDataSubscription,
    first: PendingResponse<MarketDataSubscription>,
    tables: Arc<CorrelationTables>,
    timeout: Duration,
}

impl MarketDataStream {
    /// Ticker id allocated for the stream.
    #[must_use]
    pub const fn ticker_id(&self) -> TickerId {
        self.snapshot.ticker_id
    }

    /// Wait for the snapshot after the first applied tick.
    ///
    /// # Errors
    ///
    /// Returns the gateway error for the ticker, [`GatewayError::Cancelled`]
    /// if the stream was cancelled, [`GatewayError::ConnectionLost`] if the
    /// session went away, or [`GatewayError::Timeout`].
    pub async fn first_update(self) -> Result<MarketDataSubscription, GatewayError> {
        await_response(&self.tables.first_ticks, self.first, self.timeout).await
    }
}

async fn await_response<T>(
    table: &PendingRequests<T>,
    response: PendingResponse<T>,
    limit: Duration,
) -> Result<T, GatewayError> {
    let id = response.id();
    if let Ok(result) = tokio::time::timeout(limit, response).await {
        result
    } else {
        table.discard(id);
        tracing::warn!(id, table = table.name(), ?limit, "Request timed out");
        Err(GatewayError::Timeout(limit))
    }
}

// =============================================================================
// Session Context
// =============================================================================

/// State owned by one transport connection.
struct SessionContext {
    generation: u64,
    endpoint: GatewayEndpoint,
    link: Arc<dyn GatewayLink>,
    tables: Arc<CorrelationTables>,
    cancel: CancellationToken,
    pump_alive: Arc<AtomicBool>,
}

impl SessionContext {
    fn is_live(&self) -> bool {
        self.link.is_live() && self.pump_alive.load(Ordering::SeqCst)
    }

    fn shutdown(&self) -> usize {
        self.cancel.cancel();
        self.link.close();
        self.tables.fail_all(&GatewayError::ConnectionLost)
    }
}

// =============================================================================
// Gateway Session
// =============================================================================

/// Connection manager and public operation surface.
pub struct GatewaySession {
    transport: Arc<dyn GatewayTransport>,
    broadcast: Arc<dyn BroadcastPort>,
    options: SessionOptions,
    state: AtomicSessionState,
    request_ids: IdAllocator,
    ticker_ids: IdAllocator,
    generations: AtomicU64,
    registry: Arc<SubscriptionRegistry>,
    context: Mutex<Option<SessionContext>>,
    last_endpoint: RwLock<Option<GatewayEndpoint>>,
    configured: DashMap<String, ConId>,
}

impl std::fmt::Debug for GatewaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewaySession")
            .field("state", &self.state.load())
            .field("options", &self.options)
            .field("subscriptions", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl GatewaySession {
    /// Create a disconnected session.
    #[must_use]
    pub fn new(
        transport: Arc<dyn GatewayTransport>,
        broadcast: Arc<dyn BroadcastPort>,
        options: SessionOptions,
    ) -> Self {
        if let Err(e) = options.ids.validate() {
            tracing::warn!(error = %e, ids = ?options.ids, "Id layout is out of order");
        }
        Self {
            transport,
            broadcast,
            request_ids: options.ids.request_ids(),
            ticker_ids: options.ids.ticker_ids(),
            options,
            state: AtomicSessionState::default(),
            generations: AtomicU64::new(0),
            registry: Arc::new(SubscriptionRegistry::new()),
            context: Mutex::new(None),
            last_endpoint: RwLock::new(None),
            configured: DashMap::new(),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Connect to the gateway and wait for its acknowledgement.
    ///
    /// Returns `Ok(false)` if the transport refuses, the gateway closes the
    /// session, or no acknowledgement arrives within the handshake timeout.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidState`] if the session is not
    /// disconnected.
    pub async fn connect(&self, endpoint: GatewayEndpoint) -> Result<bool, GatewayError> {
        self.state
            .transition(SessionState::Disconnected, SessionState::Connecting)
            .map_err(GatewayError::InvalidState)?;
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_session_state(SessionState::Connecting);
        *self.last_endpoint.write() = Some(endpoint.clone());
        tracing::info!(%endpoint, generation, "Connecting to gateway");

        let connection = match self.transport.connect(&endpoint).await {
            Ok(connection) => connection,
            Err(e) => {
                tracing::warn!(%endpoint, error = %e, "Gateway connection refused");
                self.abandon_connect(generation);
                return Ok(false);
            }
        };

        let tables = Arc::new(CorrelationTables::new());
        let handshake = match tables.handshake.register(BOOTSTRAP_REQUEST_ID) {
            Ok(handshake) => handshake,
            Err(e) => {
                connection.link.close();
                self.abandon_connect(generation);
                return Err(e);
            }
        };
        let cancel = CancellationToken::new();
        let pump_alive = Arc::new(AtomicBool::new(true));

        let context = SessionContext {
            generation,
            endpoint: endpoint.clone(),
            link: connection.link,
            tables: Arc::clone(&tables),
            cancel: cancel.clone(),
            pump_alive: Arc::clone(&pump_alive),
        };
        if let Err(superseded) = self.install(context) {
            superseded.shutdown();
            tracing::info!(%endpoint, generation, "Connect superseded by disconnect");
            self.abandon_connect(generation);
            return Ok(false);
        }

        let pump = MessagePump::new(
            tables,
            Arc::clone(&self.registry),
            Arc::clone(&self.broadcast),
            pump_alive,
        );
        tokio::spawn(pump.run(connection.events, cancel));

        let acknowledged = matches!(
            tokio::time::timeout(self.options.handshake_timeout, handshake).await,
            Ok(Ok(()))
        );

        if acknowledged && self.promote(generation) {
            metrics::set_session_state(SessionState::Connected);
            metrics::record_connect_attempt(true);
            tracing::info!(%endpoint, generation, "Connected to gateway");
            return Ok(true);
        }

        tracing::warn!(%endpoint, acknowledged, "Gateway handshake failed");
        self.abandon_connect(generation);
        Ok(false)
    }

    /// Store the context of a connect attempt that is still current.
    ///
    /// Hands the context back if a disconnect has moved the generation on.
    #[allow(clippy::result_large_err)]
    fn install(&self, context: SessionContext) -> Result<(), SessionContext> {
        let replaced = {
            let mut slot = self.context.lock();
            if self.generations.load(Ordering::SeqCst) != context.generation {
                return Err(context);
            }
            slot.replace(context)
        };
        if let Some(replaced) = replaced {
            tracing::warn!(
                generation = replaced.generation,
                "Replacing a context that was never torn down"
            );
            replaced.shutdown();
        }
        Ok(())
    }

    /// Move a current connect attempt to `Connected`.
    fn promote(&self, generation: u64) -> bool {
        let slot = self.context.lock();
        self.generations.load(Ordering::SeqCst) == generation
            && slot.as_ref().is_some_and(|c| c.generation == generation)
            && self
                .state
                .transition(SessionState::Connecting, SessionState::Connected)
                .is_ok()
    }

    fn abandon_connect(&self, generation: u64) {
        let stale = {
            let mut slot = self.context.lock();
            // A superseded attempt no longer owns the state
            if self.generations.load(Ordering::SeqCst) == generation {
                let _ = self
                    .state
                    .transition(SessionState::Connecting, SessionState::Disconnected);
            }
            if slot.as_ref().is_some_and(|c| c.generation == generation) {
                slot.take()
            } else {
                None
            }
        };
        if let Some(context) = stale {
            context.shutdown();
        }

        metrics::set_session_state(self.state.load());
        metrics::record_connect_attempt(false);
    }

    /// Tear down the current connection. Idempotent.
    ///
    /// Every correlation still pending on the connection resolves with
    /// [`GatewayError::ConnectionLost`]. A connect attempt still in flight is
    /// superseded and reports `false`.
    pub fn disconnect(&self) {
        let context = {
            let mut slot = self.context.lock();
            if self.state.load() == SessionState::Disconnected && slot.is_none() {
                tracing::debug!("Disconnect requested while already disconnected");
                return;
            }
            self.generations.fetch_add(1, Ordering::SeqCst);
            self.state.store(SessionState::Disconnecting);
            slot.take()
        };
        metrics::set_session_state(SessionState::Disconnecting);

        if let Some(context) = context {
            let resolved = context.shutdown();
            tracing::info!(
                endpoint = %context.endpoint,
                generation = context.generation,
                resolved,
                "Disconnected from gateway"
            );
        }

        self.state.store(SessionState::Disconnected);
        metrics::set_session_state(SessionState::Disconnected);
    }

    /// Whether the session is connected with a live link and pump.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.load() == SessionState::Connected
            && self.context.lock().as_ref().is_some_and(SessionContext::is_live)
    }

    /// Lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.load()
    }

    /// Endpoint of the current or most recent connect attempt.
    #[must_use]
    pub fn last_endpoint(&self) -> Option<GatewayEndpoint> {
        self.last_endpoint.read().clone()
    }

    /// Allocate a request id.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::IdsExhausted`] once the request range is used
    /// up.
    pub fn allocate_request_id(&self) -> Result<RequestId, GatewayError> {
        self.request_ids
            .allocate()
            .ok_or(GatewayError::IdsExhausted("request"))
    }

    /// Allocate a ticker id.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::IdsExhausted`] once the ticker range is used
    /// up.
    pub fn allocate_ticker_id(&self) -> Result<TickerId, GatewayError> {
        self.ticker_ids
            .allocate()
            .ok_or(GatewayError::IdsExhausted("ticker"))
    }

    fn live(&self) -> Result<(Arc<dyn GatewayLink>, Arc<CorrelationTables>), GatewayError> {
        if self.state.load() != SessionState::Connected {
            return Err(GatewayError::NotConnected);
        }
        self.context
            .lock()
            .as_ref()
            .filter(|c| c.is_live())
            .map(|c| (Arc::clone(&c.link), Arc::clone(&c.tables)))
            .ok_or(GatewayError::NotConnected)
    }

    // =========================================================================
    // Contract Lookup
    // =========================================================================

    /// Find the first contract matching symbol, security type, exchange and
    /// currency.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotConnected`] immediately when disconnected;
    /// otherwise the gateway error, [`GatewayError::NoContractFound`],
    /// [`GatewayError::ConnectionLost`] or [`GatewayError::Timeout`].
    pub async fn search_contracts(
        &self,
        symbol: &str,
        sec_type: &str,
        exchange: &str,
        currency: &str,
    ) -> Result<ContractDetails, GatewayError> {
        self.request_contract_details(ContractQuery::search(symbol, sec_type, exchange, currency))
            .await
    }

    /// Look up a contract by id.
    ///
    /// # Errors
    ///
    /// Same as [`search_contracts`](Self::search_contracts).
    pub async fn get_contract_details(&self, con_id: ConId) -> Result<ContractDetails, GatewayError> {
        self.request_contract_details(ContractQuery::by_con_id(con_id))
            .await
    }

    async fn request_contract_details(
        &self,
        query: ContractQuery,
    ) -> Result<ContractDetails, GatewayError> {
        let (link, tables) = self.live()?;
        let req_id = self.allocate_request_id()?;
        let response = tables.requests.register(req_id)?;

        tracing::debug!(req_id, ?query, "Requesting contract details");
        if let Err(e) = link.send(OutboundCommand::RequestContractDetails {
            req_id,
            contract: query,
        }) {
            tables.requests.discard(req_id);
            return Err(e.into());
        }

        await_response(&tables.requests, response, self.options.request_timeout).await
    }

    // =========================================================================
    // Market Data
    // =========================================================================

    /// Start streaming market data for a contract.
    ///
    /// Returns immediately with the zero-valued snapshot; the stream's
    /// [`first_update`](MarketDataStream::first_update) resolves on the first
    /// tick.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotConnected`] when disconnected or the
    /// transport error if the request cannot be written.
    pub fn subscribe_market_data(
        &self,
        con_id: ConId,
        symbol: &str,
        contract_month: Option<&str>,
        expiration: Option<&str>,
    ) -> Result<MarketDataStream, GatewayError> {
        let (link, tables) = self.live()?;
        let ticker_id = self.allocate_ticker_id()?;
        let first = tables.first_ticks.register(ticker_id)?;
        let snapshot = self.registry.subscribe(
            ticker_id,
            symbol,
            con_id,
            contract_month,
            expiration,
            &self.options.default_exchange,
        );

        let mut contract = ContractQuery::search(
            symbol,
            &self.options.default_sec_type,
            &self.options.default_exchange,
            &self.options.default_currency,
        )
        .with_contract_month(contract_month)
        .with_expiration(expiration);
        contract.con_id = Some(con_id);

        if let Err(e) = link.send(OutboundCommand::RequestMarketData {
            ticker_id,
            contract,
        }) {
            self.registry.cancel(ticker_id);
            tables.first_ticks.discard(ticker_id);
            return Err(e.into());
        }

        Ok(MarketDataStream {
            snapshot,
            first,
            tables,
            timeout: self.options.request_timeout,
        })
    }

    /// Stop a market data stream. Returns whether it was active.
    ///
    /// A caller still waiting for the stream's first update receives
    /// [`GatewayError::Cancelled`]; later ticks for the id are ignored.
    pub fn cancel_market_data(&self, ticker_id: TickerId) -> bool {
        let removed = self.registry.cancel(ticker_id);

        if let Ok((link, tables)) = self.live() {
            tables.first_ticks.fail(ticker_id, GatewayError::Cancelled);
            if removed.is_some() {
                if let Err(e) = link.send(OutboundCommand::CancelMarketData { ticker_id }) {
                    tracing::warn!(ticker_id, error = %e, "Failed to send market data cancel");
                }
            }
        }

        match removed {
            Some(snapshot) => {
                tracing::info!(ticker_id, symbol = %snapshot.symbol, "Market data cancelled");
                true
            }
            None => false,
        }
    }

    /// Snapshot of every active subscription.
    #[must_use]
    pub fn list_active_subscriptions(&self) -> BTreeMap<TickerId, MarketDataSubscription> {
        self.registry.all_active()
    }

    /// Current snapshot for one subscription.
    #[must_use]
    pub fn market_data_snapshot(&self, ticker_id: TickerId) -> Option<MarketDataSubscription> {
        self.registry.snapshot(ticker_id)
    }

    // =========================================================================
    // Broadcast Listeners
    // =========================================================================

    /// Register a broadcast listener.
    pub fn add_broadcast_listener(&self, id: ListenerId, sink: Arc<dyn BroadcastSink>) {
        self.broadcast.add_listener(id, sink);
    }

    /// Unregister a broadcast listener. Returns whether it was registered.
    pub fn remove_broadcast_listener(&self, id: &ListenerId) -> bool {
        self.broadcast.remove_listener(id)
    }

    // =========================================================================
    // Configured Contracts
    // =========================================================================

    /// Remember the contract id to use for `symbol`.
    pub fn configure_contract(&self, symbol: &str, con_id: ConId) {
        self.configured.insert(symbol.to_string(), con_id);
        tracing::info!(symbol, con_id, "Contract configured");
    }

    /// Configured symbol to contract id map.
    #[must_use]
    pub fn configured_contracts(&self) -> BTreeMap<String, ConId> {
        self.configured
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Endpoint and state.
    #[must_use]
    pub fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            endpoint: self.last_endpoint(),
            state: self.state(),
            connected: self.is_connected(),
        }
    }

    /// Health view of the session.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        let (pump_alive, pending_requests) = self
            .context
            .lock()
            .as_ref()
            .map_or((false, 0), |c| {
                (c.pump_alive.load(Ordering::SeqCst), c.tables.pending())
            });

        SessionStatus {
            state: self.state(),
            endpoint: self.last_endpoint(),
            connected: self.is_connected(),
            pump_alive,
            pending_requests,
            active_subscriptions: self.registry.len(),
            listeners: self.broadcast.listener_count(),
        }
    }
}
