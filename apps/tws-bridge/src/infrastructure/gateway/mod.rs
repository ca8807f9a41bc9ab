//! Gateway Transports
//!
//! Adapters implementing the gateway ports.
//!
//! - [`WebSocketTransport`]: JSON over a WebSocket to the gateway sidecar
//! - [`InMemoryTransport`]: Scriptable stand-in for tests and local runs
//! - [`reconnect`]: Backoff policy used by the session supervisor

pub mod codec;
pub mod memory;
pub mod reconnect;
pub mod websocket;

pub use codec::{CodecError, JsonCodec};
pub use memory::InMemoryTransport;
pub use reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy};
pub use websocket::{WebSocketTransport, WebSocketTransportConfig};
