#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::panic
    )
)]

//! TWS Bridge - Gateway Session Multiplexer
//!
//! Holds one long-lived session to a trading gateway, correlates outbound
//! requests with the inbound events that answer them, aggregates market
//! data ticks per subscription and fans snapshots out to WebSocket
//! listeners.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure data
//!   - `session`: Ids, endpoint and lifecycle state
//!   - `contract`: Contract queries and details
//!   - `market_data`: Subscription snapshot and tick-field routing
//!   - `gateway`: Inbound events and outbound commands
//!   - `listener`: Listener wire protocol
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Gateway transport and broadcast interfaces
//!   - `services`: Session, pending requests, registry, pump, supervisor
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `gateway`: WebSocket and in-memory transports, reconnect policy
//!   - `broadcast`: Listener fan-out hub
//!   - `config`: Environment configuration
//!   - `health`: Health, metrics and listener HTTP server
//!
//! # Data Flow
//!
//! ```text
//!                   ┌──────────────┐  requests  ┌──────────────┐
//!  callers ────────►│   Gateway    │───────────►│   Gateway    │
//!     ▲             │   Session    │            │  (sidecar)   │
//!     │ responses   └──────────────┘            └──────┬───────┘
//!     │                                                │ events
//!  ┌──┴────────────┐   ┌──────────────┐         ┌──────▼───────┐
//!  │ Pending Table │◄──│ Message Pump │◄────────│  Transport   │
//!  └───────────────┘   └──────┬───────┘         └──────────────┘
//!                             │ ticks
//!                      ┌──────▼───────┐   ┌──────────────┐
//!                      │   Registry   │──►│ Broadcast Hub│──► listeners
//!                      └──────────────┘   └──────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::contract::{ConId, Contract, ContractDetails, ContractQuery};
pub use domain::gateway::{InboundEvent, OutboundCommand};
pub use domain::listener::{ListenerId, ListenerMessage};
pub use domain::market_data::MarketDataSubscription;
pub use domain::session::{GatewayEndpoint, IdLayout, RequestId, SessionState, TickerId};

// Session services
pub use application::error::GatewayError;
pub use application::services::{
    ConnectionInfo, GatewaySession, MarketDataStream, SessionOptions, SessionStatus,
    SessionSupervisor,
};

// Infrastructure config
pub use infrastructure::config::{
    BridgeConfig, BroadcastSettings, ConfigError, GatewaySettings, ReconnectSettings,
    ServerSettings, SessionSettings,
};

// HTTP server
pub use infrastructure::health::{HttpServer, HttpServerError, HttpServerState};

// Broadcast hub
pub use infrastructure::broadcast::{BroadcastConfig, BroadcastHub};

// Transports
pub use infrastructure::gateway::{InMemoryTransport, WebSocketTransport, WebSocketTransportConfig};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
