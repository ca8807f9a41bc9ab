//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the gateway session services and the port
//! interfaces through which they reach the transport and listeners.

/// Errors surfaced by session operations.
pub mod error;

/// Port interfaces for external systems (gateway transport, broadcast).
pub mod ports;

/// Session, correlation, registry and pump services.
pub mod services;
