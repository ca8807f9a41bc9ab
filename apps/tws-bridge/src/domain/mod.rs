//! Domain Layer - Core gateway session types.
//!
//! This layer contains the data model shared by every component of the
//! bridge: identifiers, session state, contracts, market data snapshots and
//! the decoded gateway messages. Nothing here performs I/O.

/// Contract descriptions and lookup queries.
pub mod contract;

/// Decoded inbound events and outbound commands exchanged with the gateway.
pub mod gateway;

/// Broadcast listener control protocol.
pub mod listener;

/// Market data snapshots and tick field routing.
pub mod market_data;

/// Session identifiers, endpoint and connection state.
pub mod session;
