//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `GatewaySession`: Connection lifecycle and the public operation surface
//! - `PendingRequests`: Correlation of request ids with their responses
//! - `SubscriptionRegistry`: Per-ticker market data aggregation
//! - `MessagePump`: Dispatch of inbound gateway events
//! - `SessionSupervisor`: Liveness checks and reconnection

mod pending;
mod pump;
mod registry;
mod session;
mod supervisor;

pub use pending::{PendingRequests, PendingResponse};
pub use pump::{CorrelationTables, MessagePump, PumpError, PumpExit};
pub use registry::SubscriptionRegistry;
pub use session::{ConnectionInfo, GatewaySession, MarketDataStream, SessionOptions, SessionStatus};
pub use supervisor::SessionSupervisor;
