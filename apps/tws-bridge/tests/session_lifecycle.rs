//! Session Lifecycle Integration Tests
//!
//! Drives a `GatewaySession` end to end over the in-memory transport:
//! handshake, correlated requests, tick aggregation and fan-out, teardown
//! and supervision.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use tws_bridge::application::ports::{BroadcastPort, TransportError};
use tws_bridge::infrastructure::gateway::{ReconnectConfig, ReconnectError};
use tws_bridge::{
    BroadcastHub, Contract, ContractDetails, GatewayEndpoint, GatewayError, GatewaySession,
    IdLayout, InMemoryTransport, InboundEvent, ListenerId, ListenerMessage, OutboundCommand,
    SessionOptions, SessionState, SessionSupervisor,
};

// =============================================================================
// Helpers
// =============================================================================

struct Harness {
    transport: InMemoryTransport,
    hub: Arc<BroadcastHub>,
    session: Arc<GatewaySession>,
}

fn harness_with(options: SessionOptions) -> Harness {
    let transport = InMemoryTransport::new();
    let hub = Arc::new(BroadcastHub::with_defaults());
    let session = Arc::new(GatewaySession::new(
        Arc::new(transport.clone()),
        Arc::clone(&hub) as Arc<dyn BroadcastPort>,
        options,
    ));
    Harness {
        transport,
        hub,
        session,
    }
}

fn harness() -> Harness {
    harness_with(SessionOptions::default())
}

fn endpoint() -> GatewayEndpoint {
    GatewayEndpoint::new("localhost", 4002, 1)
}

async fn connected() -> Harness {
    let h = harness();
    assert!(h.session.connect(endpoint()).await.unwrap());
    h
}

/// Poll `condition` until it holds, failing the test after two seconds.
async fn wait_for(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Wait for the next contract-details request and return its id.
async fn next_details_request(transport: &InMemoryTransport, seen: usize) -> i32 {
    wait_for(|| transport.sent().len() > seen).await;
    match &transport.sent()[seen] {
        OutboundCommand::RequestContractDetails { req_id, .. } => *req_id,
        other => panic!("unexpected command {other:?}"),
    }
}

fn details(con_id: i32, symbol: &str) -> ContractDetails {
    ContractDetails {
        contract: Contract {
            con_id,
            symbol: symbol.to_string(),
            sec_type: "FUT".to_string(),
            exchange: "CME".to_string(),
            currency: "USD".to_string(),
            ..Contract::default()
        },
        contract_month: "202512".to_string(),
        ..ContractDetails::default()
    }
}

// =============================================================================
// Connection Lifecycle
// =============================================================================

#[tokio::test]
async fn connect_completes_handshake() {
    let h = harness();
    assert_eq!(h.session.state(), SessionState::Disconnected);

    assert!(h.session.connect(endpoint()).await.unwrap());

    assert_eq!(h.session.state(), SessionState::Connected);
    assert!(h.session.is_connected());
    let info = h.session.connection_info();
    assert_eq!(info.endpoint, Some(endpoint()));
    assert!(info.connected);
    assert_eq!(h.transport.endpoints(), vec![endpoint()]);
}

#[tokio::test]
async fn refused_connect_returns_false() {
    let h = harness();
    h.transport.set_refuse(true);

    assert!(!h.session.connect(endpoint()).await.unwrap());
    assert_eq!(h.session.state(), SessionState::Disconnected);
    assert!(!h.session.is_connected());
}

#[tokio::test]
async fn missing_ack_times_out() {
    let h = harness_with(SessionOptions {
        handshake_timeout: Duration::from_millis(50),
        ..SessionOptions::default()
    });
    h.transport.set_auto_ack(false);

    assert!(!h.session.connect(endpoint()).await.unwrap());
    assert_eq!(h.session.state(), SessionState::Disconnected);
    assert!(!h.transport.is_open());
}

#[tokio::test]
async fn gateway_close_during_handshake_fails_connect() {
    let h = harness();
    h.transport.set_auto_ack(false);

    let session = Arc::clone(&h.session);
    let connect = tokio::spawn(async move { session.connect(endpoint()).await });

    wait_for(|| h.transport.is_open()).await;
    assert!(h.transport.inject(InboundEvent::ConnectionClosed));

    assert!(!connect.await.unwrap().unwrap());
    assert_eq!(h.session.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn second_connect_is_rejected() {
    let h = connected().await;

    let result = h.session.connect(endpoint()).await;

    assert_eq!(result, Err(GatewayError::InvalidState(SessionState::Connected)));
    assert_eq!(h.transport.connect_count(), 1);
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let h = connected().await;

    h.session.disconnect();
    assert_eq!(h.session.state(), SessionState::Disconnected);
    assert!(!h.transport.is_open());

    h.session.disconnect();
    assert_eq!(h.session.state(), SessionState::Disconnected);

    assert!(h.session.connect(endpoint()).await.unwrap());
}

#[tokio::test]
async fn disconnect_during_connect_supersedes_the_attempt() {
    let h = harness();
    h.transport.delay_next_connect(Duration::from_millis(200));

    let session = Arc::clone(&h.session);
    let slow = tokio::spawn(async move { session.connect(endpoint()).await });
    wait_for(|| h.transport.connect_count() == 1).await;

    h.session.disconnect();
    assert_eq!(h.session.state(), SessionState::Disconnected);

    assert!(h.session.connect(endpoint()).await.unwrap());
    assert!(!slow.await.unwrap().unwrap());

    assert_eq!(h.session.state(), SessionState::Connected);
    assert!(h.session.is_connected());
    assert_eq!(h.transport.connect_count(), 2);
    assert_eq!(h.transport.open_links(), 1, "superseded link is closed");

    let stream = h
        .session
        .subscribe_market_data(12345, "MES", None, None)
        .unwrap();
    h.transport.inject(InboundEvent::TickPrice {
        ticker_id: stream.ticker_id(),
        field: 1,
        price: 4499.75,
    });
    assert_eq!(stream.first_update().await.unwrap().bid, 4499.75);
}

#[tokio::test]
async fn operations_fail_fast_when_disconnected() {
    let h = harness();

    assert_eq!(
        h.session.search_contracts("MES", "FUT", "CME", "USD").await,
        Err(GatewayError::NotConnected)
    );
    assert_eq!(
        h.session.get_contract_details(12345).await,
        Err(GatewayError::NotConnected)
    );
    assert!(matches!(
        h.session.subscribe_market_data(12345, "MES", None, None),
        Err(GatewayError::NotConnected)
    ));
    assert!(h.transport.sent().is_empty());
}

// =============================================================================
// Contract Lookup
// =============================================================================

#[tokio::test]
async fn search_resolves_with_first_match() {
    let h = connected().await;

    let session = Arc::clone(&h.session);
    let search =
        tokio::spawn(async move { session.search_contracts("MES", "FUT", "CME", "USD").await });

    let req_id = next_details_request(&h.transport, 0).await;
    assert_eq!(req_id, 1);
    h.transport.inject(InboundEvent::ContractDetails {
        req_id,
        details: details(12345, "MES"),
    });
    h.transport.inject(InboundEvent::ContractDetails {
        req_id,
        details: details(67890, "MES"),
    });
    h.transport.inject(InboundEvent::ContractDetailsEnd { req_id });

    let found = search.await.unwrap().unwrap();
    assert_eq!(found.con_id(), 12345);
    assert_eq!(found.contract_month, "202512");
}

#[tokio::test]
async fn details_end_without_match_is_no_contract_found() {
    let h = connected().await;

    let session = Arc::clone(&h.session);
    let lookup = tokio::spawn(async move { session.get_contract_details(99).await });

    let req_id = next_details_request(&h.transport, 0).await;
    h.transport.inject(InboundEvent::ContractDetailsEnd { req_id });

    assert_eq!(
        lookup.await.unwrap(),
        Err(GatewayError::NoContractFound(req_id))
    );
}

#[tokio::test]
async fn gateway_error_fails_the_matching_request() {
    let h = connected().await;

    let session = Arc::clone(&h.session);
    let lookup = tokio::spawn(async move { session.get_contract_details(99).await });

    let req_id = next_details_request(&h.transport, 0).await;
    h.transport.inject(InboundEvent::Error {
        id: -1,
        code: 2104,
        message: "Market data farm connection is OK".to_string(),
    });
    h.transport.inject(InboundEvent::Error {
        id: req_id,
        code: 200,
        message: "No security definition has been found".to_string(),
    });

    assert_eq!(
        lookup.await.unwrap(),
        Err(GatewayError::Protocol {
            code: 200,
            message: "No security definition has been found".to_string(),
        })
    );
    assert!(h.session.is_connected());
}

#[tokio::test]
async fn unanswered_request_times_out() {
    let h = harness_with(SessionOptions {
        request_timeout: Duration::from_millis(50),
        ..SessionOptions::default()
    });
    assert!(h.session.connect(endpoint()).await.unwrap());

    let result = h.session.get_contract_details(12345).await;

    assert_eq!(result, Err(GatewayError::Timeout(Duration::from_millis(50))));
    assert_eq!(h.session.status().pending_requests, 0);
}

#[tokio::test]
async fn request_ids_are_unique_across_concurrent_callers() {
    let h = connected().await;

    let mut lookups = Vec::new();
    for con_id in 0..8 {
        let session = Arc::clone(&h.session);
        lookups.push(tokio::spawn(async move { session.get_contract_details(con_id).await }));
    }
    wait_for(|| h.transport.sent().len() == 8).await;

    let mut ids: Vec<i32> = h
        .transport
        .sent()
        .iter()
        .map(|command| match command {
            OutboundCommand::RequestContractDetails { req_id, .. } => *req_id,
            other => panic!("unexpected command {other:?}"),
        })
        .collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 8);

    for req_id in ids {
        h.transport.inject(InboundEvent::ContractDetails {
            req_id,
            details: details(req_id, "MES"),
        });
    }
    for lookup in lookups {
        assert!(lookup.await.unwrap().is_ok());
    }
}

#[tokio::test]
async fn request_ids_skip_the_ticker_range() {
    let h = connected().await;
    for _ in 0..999 {
        h.session.allocate_request_id().unwrap();
    }

    let session = Arc::clone(&h.session);
    let lookup = tokio::spawn(async move { session.get_contract_details(42).await });
    let req_id = next_details_request(&h.transport, 0).await;
    let stream = h
        .session
        .subscribe_market_data(12345, "MES", None, None)
        .unwrap();

    assert_eq!(stream.ticker_id(), 1000);
    assert_eq!(req_id, 1_000_000);

    h.transport.inject(InboundEvent::Error {
        id: req_id,
        code: 200,
        message: "No security definition has been found".to_string(),
    });
    assert!(matches!(
        lookup.await.unwrap(),
        Err(GatewayError::Protocol { code: 200, .. })
    ));

    // The lookup failure leaves the market data stream untouched
    h.transport.inject(InboundEvent::TickPrice {
        ticker_id: 1000,
        field: 4,
        price: 4500.25,
    });
    assert_eq!(stream.first_update().await.unwrap().last_price, 4500.25);
}

#[tokio::test]
async fn exhausted_ticker_range_is_reported() {
    let h = harness_with(SessionOptions {
        ids: IdLayout {
            request_base: 1,
            ticker_base: 1000,
            ticker_ceiling: 1001,
        },
        ..SessionOptions::default()
    });
    assert!(h.session.connect(endpoint()).await.unwrap());

    assert!(h.session.subscribe_market_data(12345, "MES", None, None).is_ok());
    assert!(matches!(
        h.session.subscribe_market_data(67890, "ES", None, None),
        Err(GatewayError::IdsExhausted("ticker"))
    ));
    assert_eq!(h.transport.sent().len(), 1);
}

// =============================================================================
// Market Data
// =============================================================================

#[tokio::test]
async fn tick_flows_from_gateway_to_listener() {
    let h = connected().await;
    let (tx, mut rx) = mpsc::channel(16);
    h.session
        .add_broadcast_listener(ListenerId::new("listener-1"), Arc::new(tx));

    let stream = h
        .session
        .subscribe_market_data(12345, "MES", None, None)
        .unwrap();
    assert_eq!(stream.ticker_id(), 1000);
    assert_eq!(stream.snapshot.last_price, 0.0);

    match &h.transport.sent()[0] {
        OutboundCommand::RequestMarketData {
            ticker_id,
            contract,
        } => {
            assert_eq!(*ticker_id, 1000);
            assert_eq!(contract.con_id, Some(12345));
            assert_eq!(contract.symbol, "MES");
        }
        other => panic!("unexpected command {other:?}"),
    }

    h.transport.inject(InboundEvent::TickPrice {
        ticker_id: 1000,
        field: 4,
        price: 4500.25,
    });

    let first = stream.first_update().await.unwrap();
    assert_eq!(first.last_price, 4500.25);

    let message = timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    match message.as_ref() {
        ListenerMessage::MarketData { symbol, data, .. } => {
            assert_eq!(symbol, "MES");
            assert_eq!(data.ticker_id, 1000);
            assert_eq!(data.last_price, 4500.25);
        }
        other => panic!("unexpected message {other:?}"),
    }

    assert!(h.session.cancel_market_data(1000));
    assert!(
        h.transport
            .sent()
            .contains(&OutboundCommand::CancelMarketData { ticker_id: 1000 })
    );

    h.transport.inject(InboundEvent::TickPrice {
        ticker_id: 1000,
        field: 4,
        price: 4501.00,
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
    assert!(h.session.market_data_snapshot(1000).is_none());
}

#[tokio::test]
async fn ticks_aggregate_into_one_snapshot() {
    let h = connected().await;
    let stream = h
        .session
        .subscribe_market_data(12345, "MES", Some("202512"), Some("20251219"))
        .unwrap();
    let ticker_id = stream.ticker_id();

    h.transport.inject(InboundEvent::TickPrice {
        ticker_id,
        field: 1,
        price: 4500.00,
    });
    h.transport.inject(InboundEvent::TickPrice {
        ticker_id,
        field: 2,
        price: 4500.50,
    });
    h.transport.inject(InboundEvent::TickSize {
        ticker_id,
        field: 8,
        size: Decimal::from(125_000),
    });
    h.transport.inject(InboundEvent::TickPrice {
        ticker_id,
        field: 9,
        price: 4480.00,
    });

    wait_for(|| {
        h.session
            .market_data_snapshot(ticker_id)
            .is_some_and(|s| s.volume == Decimal::from(125_000))
    })
    .await;

    let snapshot = h.session.market_data_snapshot(ticker_id).unwrap();
    assert_eq!(snapshot.bid, 4500.00);
    assert_eq!(snapshot.ask, 4500.50);
    assert_eq!(snapshot.last_price, 0.0);
    assert_eq!(snapshot.contract_month, "202512");
    assert_eq!(snapshot.expiration, "20251219");
}

#[tokio::test]
async fn cancel_resolves_first_update_with_cancelled() {
    let h = connected().await;
    let stream = h
        .session
        .subscribe_market_data(12345, "MES", None, None)
        .unwrap();

    assert!(h.session.cancel_market_data(stream.ticker_id()));
    assert!(!h.session.cancel_market_data(stream.ticker_id()));

    assert_eq!(stream.first_update().await, Err(GatewayError::Cancelled));
}

#[tokio::test]
async fn gateway_error_for_ticker_fails_first_update() {
    let h = connected().await;
    let stream = h
        .session
        .subscribe_market_data(12345, "MES", None, None)
        .unwrap();

    h.transport.inject(InboundEvent::Error {
        id: stream.ticker_id(),
        code: 354,
        message: "Requested market data is not subscribed".to_string(),
    });

    assert!(matches!(
        stream.first_update().await,
        Err(GatewayError::Protocol { code: 354, .. })
    ));
}

#[tokio::test]
async fn ticker_ids_are_never_reused_across_reconnects() {
    let h = connected().await;
    let first = h
        .session
        .subscribe_market_data(12345, "MES", None, None)
        .unwrap();

    h.session.disconnect();
    assert!(h.session.connect(endpoint()).await.unwrap());

    let second = h
        .session
        .subscribe_market_data(67890, "ES", None, None)
        .unwrap();

    assert_eq!(first.ticker_id(), 1000);
    assert_eq!(second.ticker_id(), 1001);
    let active = h.session.list_active_subscriptions();
    assert_eq!(active.keys().copied().collect::<Vec<_>>(), vec![1000, 1001]);
}

// =============================================================================
// Teardown
// =============================================================================

#[tokio::test]
async fn disconnect_resolves_pending_with_connection_lost() {
    let h = connected().await;

    let session = Arc::clone(&h.session);
    let lookup = tokio::spawn(async move { session.get_contract_details(12345).await });
    next_details_request(&h.transport, 0).await;

    let stream = h
        .session
        .subscribe_market_data(12345, "MES", None, None)
        .unwrap();

    h.session.disconnect();

    assert_eq!(lookup.await.unwrap(), Err(GatewayError::ConnectionLost));
    assert_eq!(stream.first_update().await, Err(GatewayError::ConnectionLost));
}

#[tokio::test]
async fn decode_failure_stops_the_pump() {
    let h = connected().await;

    let session = Arc::clone(&h.session);
    let lookup = tokio::spawn(async move { session.get_contract_details(12345).await });
    next_details_request(&h.transport, 0).await;

    h.transport
        .inject_failure(TransportError::Decode("truncated frame".to_string()));

    assert_eq!(lookup.await.unwrap(), Err(GatewayError::ConnectionLost));
    wait_for(|| !h.session.is_connected()).await;
    assert_eq!(h.session.state(), SessionState::Connected);
    assert!(!h.session.status().pump_alive);
}

// =============================================================================
// Status and Configuration
// =============================================================================

#[tokio::test]
async fn status_reports_counts() {
    let h = connected().await;
    let (tx, _rx) = mpsc::channel(4);
    let listener = ListenerId::new("listener-1");
    h.session.add_broadcast_listener(listener.clone(), Arc::new(tx));
    let _stream = h
        .session
        .subscribe_market_data(12345, "MES", None, None)
        .unwrap();

    let status = h.session.status();
    assert_eq!(status.state, SessionState::Connected);
    assert!(status.connected);
    assert!(status.pump_alive);
    assert_eq!(status.pending_requests, 1);
    assert_eq!(status.active_subscriptions, 1);
    assert_eq!(status.listeners, 1);

    assert!(h.session.remove_broadcast_listener(&listener));
    assert_eq!(h.hub.stats().listeners, 0);
}

#[tokio::test]
async fn configured_contracts_are_remembered() {
    let h = harness();
    h.session.configure_contract("MES", 12345);
    h.session.configure_contract("ES", 67890);
    h.session.configure_contract("MES", 11111);

    let configured = h.session.configured_contracts();
    assert_eq!(configured.len(), 2);
    assert_eq!(configured["MES"], 11111);
    assert_eq!(configured["ES"], 67890);
}

// =============================================================================
// Supervision
// =============================================================================

fn fast_reconnect(max_attempts: u32) -> ReconnectConfig {
    ReconnectConfig {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(20),
        multiplier: 2.0,
        jitter_factor: 0.0,
        max_attempts,
    }
}

#[tokio::test]
async fn supervisor_reconnects_a_dead_session() {
    let h = connected().await;
    let supervisor =
        SessionSupervisor::new(Arc::clone(&h.session), fast_reconnect(0), Duration::from_millis(20));
    let cancel = CancellationToken::new();
    let run = tokio::spawn({
        let cancel = cancel.clone();
        async move { supervisor.run(endpoint(), cancel).await }
    });

    h.transport.sever();
    wait_for(|| h.transport.connect_count() == 2 && h.session.is_connected()).await;

    cancel.cancel();
    assert_eq!(run.await.unwrap(), Ok(()));
}

#[tokio::test]
async fn supervisor_leaves_a_deliberate_disconnect_alone() {
    let h = connected().await;
    let supervisor =
        SessionSupervisor::new(Arc::clone(&h.session), fast_reconnect(0), Duration::from_millis(10));
    let cancel = CancellationToken::new();
    let run = tokio::spawn({
        let cancel = cancel.clone();
        async move { supervisor.run(endpoint(), cancel).await }
    });

    h.session.disconnect();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(h.transport.connect_count(), 1);

    cancel.cancel();
    assert_eq!(run.await.unwrap(), Ok(()));
}

#[tokio::test]
async fn supervisor_gives_up_after_max_attempts() {
    let h = harness();
    h.transport.set_refuse(true);
    let supervisor =
        SessionSupervisor::new(Arc::clone(&h.session), fast_reconnect(2), Duration::from_millis(10))
            .with_initial_connect(true);

    let result = timeout(
        Duration::from_secs(2),
        supervisor.run(endpoint(), CancellationToken::new()),
    )
    .await
    .unwrap();

    assert_eq!(result, Err(ReconnectError::MaxAttemptsExceeded(2)));
    assert_eq!(h.transport.connect_count(), 3);
}
