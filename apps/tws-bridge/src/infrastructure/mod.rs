//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Listener fan-out hub.
pub mod broadcast;

/// Configuration loaded from the environment.
pub mod config;

/// Gateway transports and reconnect policy.
pub mod gateway;

/// Health, metrics and listener HTTP server.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
