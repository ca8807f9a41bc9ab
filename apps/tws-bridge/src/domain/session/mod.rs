//! Session Types
//!
//! Identifiers, endpoint description and the connection state machine for the
//! single gateway session.
//!
//! # Identifier spaces
//!
//! Request ids and ticker ids share the gateway's integer wire space, so an
//! [`IdLayout`] splits it into disjoint ranges:
//!
//! ```text
//!  0        request_base    ticker_base      ticker_ceiling        i32::MAX
//!  │ bootstrap │  requests   │    tickers     │      requests         │
//! ```
//!
//! Request ids skip the ticker range instead of running into it, and both
//! allocators stop at the end of their range rather than wrapping.

use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

// =============================================================================
// Identifiers
// =============================================================================

/// Correlation key for a one-shot outbound request.
pub type RequestId = i32;

/// Correlation key for a long-lived market data stream.
pub type TickerId = i32;

/// Well-known correlation id completed by connect acknowledgements.
pub const BOOTSTRAP_REQUEST_ID: RequestId = 0;

/// Default first request id.
pub const DEFAULT_REQUEST_ID_BASE: RequestId = 1;

/// Default first ticker id.
pub const DEFAULT_TICKER_ID_BASE: TickerId = 1000;

/// Default end of the ticker id range (exclusive).
pub const DEFAULT_TICKER_ID_CEILING: TickerId = 1_000_000;

/// Monotonic id allocator over a bounded range, safe for concurrent callers.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicI64,
    end: i64,
    gap: Range<i64>,
}

impl IdAllocator {
    /// Ids from `base` through `i32::MAX`.
    #[must_use]
    pub fn new(base: i32) -> Self {
        Self::with_gap(base, 0..0)
    }

    /// Ids in `range` only.
    #[must_use]
    pub fn bounded(range: Range<i32>) -> Self {
        Self {
            next: AtomicI64::new(i64::from(range.start)),
            end: i64::from(range.end),
            gap: 0..0,
        }
    }

    /// Ids from `base` through `i32::MAX`, never handing out one in `gap`.
    #[must_use]
    pub fn with_gap(base: i32, gap: Range<i32>) -> Self {
        let gap = i64::from(gap.start)..i64::from(gap.end);
        let base = i64::from(base);
        let first = if gap.contains(&base) { gap.end } else { base };
        Self {
            next: AtomicI64::new(first),
            end: i64::from(i32::MAX) + 1,
            gap,
        }
    }

    /// Allocate the next id, or `None` once the range is used up.
    pub fn allocate(&self) -> Option<i32> {
        self.next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                if current >= self.end {
                    return None;
                }
                let next = current.checked_add(1)?;
                Some(if self.gap.contains(&next) {
                    self.gap.end
                } else {
                    next
                })
            })
            .ok()
            .and_then(|id| i32::try_from(id).ok())
    }
}

/// Placement of the request and ticker id ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdLayout {
    /// First request id.
    pub request_base: RequestId,
    /// First ticker id.
    pub ticker_base: TickerId,
    /// End of the ticker range (exclusive); request ids resume here.
    pub ticker_ceiling: TickerId,
}

impl Default for IdLayout {
    fn default() -> Self {
        Self {
            request_base: DEFAULT_REQUEST_ID_BASE,
            ticker_base: DEFAULT_TICKER_ID_BASE,
            ticker_ceiling: DEFAULT_TICKER_ID_CEILING,
        }
    }
}

impl IdLayout {
    /// Check that the ranges are ordered and clear of the bootstrap id.
    ///
    /// # Errors
    ///
    /// Returns the first ordering rule the layout breaks.
    pub const fn validate(&self) -> Result<(), IdLayoutError> {
        if self.request_base <= BOOTSTRAP_REQUEST_ID {
            return Err(IdLayoutError::RequestBaseTooLow(self.request_base));
        }
        if self.ticker_base <= self.request_base {
            return Err(IdLayoutError::TickersBelowRequests {
                request_base: self.request_base,
                ticker_base: self.ticker_base,
            });
        }
        if self.ticker_ceiling <= self.ticker_base {
            return Err(IdLayoutError::EmptyTickerRange {
                ticker_base: self.ticker_base,
                ticker_ceiling: self.ticker_ceiling,
            });
        }
        Ok(())
    }

    /// Allocator for request ids.
    #[must_use]
    pub fn request_ids(&self) -> IdAllocator {
        IdAllocator::with_gap(self.request_base, self.ticker_base..self.ticker_ceiling)
    }

    /// Allocator for ticker ids.
    #[must_use]
    pub fn ticker_ids(&self) -> IdAllocator {
        IdAllocator::bounded(self.ticker_base..self.ticker_ceiling)
    }
}

/// Id layout that would let the two spaces meet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum IdLayoutError {
    /// Request ids would reach the bootstrap id.
    #[error("request id base {0} must be above the bootstrap id 0")]
    RequestBaseTooLow(RequestId),
    /// Ticker ids start at or below the request base.
    #[error("ticker id base {ticker_base} must be above request id base {request_base}")]
    TickersBelowRequests {
        /// First request id.
        request_base: RequestId,
        /// First ticker id.
        ticker_base: TickerId,
    },
    /// The ticker range holds no ids.
    #[error("ticker id ceiling {ticker_ceiling} must be above ticker id base {ticker_base}")]
    EmptyTickerRange {
        /// First ticker id.
        ticker_base: TickerId,
        /// End of the ticker range.
        ticker_ceiling: TickerId,
    },
}

// =============================================================================
// Endpoint
// =============================================================================

/// Address of the gateway and the client id used for the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayEndpoint {
    /// Gateway host.
    pub host: String,
    /// Gateway port.
    pub port: u16,
    /// Client id presented to the gateway.
    pub client_id: i32,
}

impl GatewayEndpoint {
    /// Create a new endpoint.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, client_id: i32) -> Self {
        Self {
            host: host.into(),
            port,
            client_id,
        }
    }
}

impl fmt::Display for GatewayEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} (client {})", self.host, self.port, self.client_id)
    }
}

// =============================================================================
// Session State
// =============================================================================

/// Lifecycle state of the gateway session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum SessionState {
    /// No link to the gateway.
    Disconnected = 0,
    /// A connect attempt is in flight.
    Connecting = 1,
    /// Link established and acknowledged.
    Connected = 2,
    /// Teardown in progress.
    Disconnecting = 3,
}

impl SessionState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Disconnecting,
            _ => Self::Disconnected,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session state cell updated with atomic transitions.
#[derive(Debug)]
pub struct AtomicSessionState(AtomicU8);

impl Default for AtomicSessionState {
    fn default() -> Self {
        Self::new(SessionState::Disconnected)
    }
}

impl AtomicSessionState {
    /// Create a cell holding `state`.
    #[must_use]
    pub const fn new(state: SessionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    /// Current state.
    #[must_use]
    pub fn load(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Unconditionally set the state.
    pub fn store(&self, state: SessionState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    /// Move from `from` to `to` if the cell currently holds `from`.
    ///
    /// Returns the observed state on failure.
    pub fn transition(&self, from: SessionState, to: SessionState) -> Result<(), SessionState> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(SessionState::from_u8)
    }
}

// =============================================================================
// Tests
// =============================================================================
