//! Market Data Types
//!
//! The per-subscription snapshot and the tick field-code routing table.
//!
//! # Field codes
//!
//! | Kind  | Code | Attribute  | Persisted |
//! |-------|------|------------|-----------|
//! | price | 1    | bid        | yes       |
//! | price | 2    | ask        | yes       |
//! | price | 4    | last       | yes       |
//! | price | 6    | high       | no        |
//! | price | 7    | low        | no        |
//! | price | 9    | close      | no        |
//! | size  | 0    | bid size   | yes       |
//! | size  | 3    | ask size   | yes       |
//! | size  | 5    | last size  | no        |
//! | size  | 8    | volume     | yes       |
//!
//! Non-persisted codes still refresh `lastUpdated` and are broadcast.

use chrono::{DateTime, TimeDelta, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::contract::ConId;
use super::session::TickerId;

// =============================================================================
// Tick Fields
// =============================================================================

/// Price tick attribute identified by its field code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PriceTickField {
    /// Code 1.
    Bid,
    /// Code 2.
    Ask,
    /// Code 4.
    Last,
    /// Code 6, not persisted.
    High,
    /// Code 7, not persisted.
    Low,
    /// Code 9, not persisted.
    Close,
    /// Any other code.
    Other(i32),
}

impl PriceTickField {
    /// Route a raw field code.
    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        match code {
            1 => Self::Bid,
            2 => Self::Ask,
            4 => Self::Last,
            6 => Self::High,
            7 => Self::Low,
            9 => Self::Close,
            other => Self::Other(other),
        }
    }

    /// Whether the snapshot stores this attribute.
    #[must_use]
    pub const fn is_persisted(self) -> bool {
        matches!(self, Self::Bid | Self::Ask | Self::Last)
    }

    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bid => "bid",
            Self::Ask => "ask",
            Self::Last => "last",
            Self::High => "high",
            Self::Low => "low",
            Self::Close => "close",
            Self::Other(_) => "other",
        }
    }
}

/// Size tick attribute identified by its field code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizeTickField {
    /// Code 0.
    BidSize,
    /// Code 3.
    AskSize,
    /// Code 5, not persisted.
    LastSize,
    /// Code 8.
    Volume,
    /// Any other code.
    Other(i32),
}

impl SizeTickField {
    /// Route a raw field code.
    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        match code {
            0 => Self::BidSize,
            3 => Self::AskSize,
            5 => Self::LastSize,
            8 => Self::Volume,
            other => Self::Other(other),
        }
    }

    /// Whether the snapshot stores this attribute.
    #[must_use]
    pub const fn is_persisted(self) -> bool {
        matches!(self, Self::BidSize | Self::AskSize | Self::Volume)
    }

    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BidSize => "bid_size",
            Self::AskSize => "ask_size",
            Self::LastSize => "last_size",
            Self::Volume => "volume",
            Self::Other(_) => "other",
        }
    }
}

// =============================================================================
// Subscription Snapshot
// =============================================================================

/// Continuously updated market data state for one ticker id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketDataSubscription {
    /// Ticker id the gateway tags updates with.
    pub ticker_id: TickerId,
    /// Underlying symbol.
    pub symbol: String,
    /// Gateway contract id.
    pub con_id: ConId,
    /// Routing exchange.
    pub exchange: String,
    /// Contract month, empty when not given.
    pub contract_month: String,
    /// Expiration, empty when not given.
    pub expiration: String,
    /// Best bid.
    pub bid: f64,
    /// Best ask.
    pub ask: f64,
    /// Last traded price.
    pub last_price: f64,
    /// Size at the bid.
    pub bid_size: Decimal,
    /// Size at the ask.
    pub ask_size: Decimal,
    /// Session volume.
    pub volume: Decimal,
    /// Time of the most recent update (creation time before any tick).
    pub last_updated: DateTime<Utc>,
}

impl MarketDataSubscription {
    /// Create a zero-valued snapshot timestamped now.
    #[must_use]
    pub fn new(
        ticker_id: TickerId,
        symbol: impl Into<String>,
        con_id: ConId,
        exchange: impl Into<String>,
    ) -> Self {
        Self {
            ticker_id,
            symbol: symbol.into(),
            con_id,
            exchange: exchange.into(),
            contract_month: String::new(),
            expiration: String::new(),
            bid: 0.0,
            ask: 0.0,
            last_price: 0.0,
            bid_size: Decimal::ZERO,
            ask_size: Decimal::ZERO,
            volume: Decimal::ZERO,
            last_updated: Utc::now(),
        }
    }

    /// Set contract month and expiration, mapping `None` to empty strings.
    #[must_use]
    pub fn with_expiry(mut self, contract_month: Option<&str>, expiration: Option<&str>) -> Self {
        self.contract_month = contract_month.unwrap_or_default().to_string();
        self.expiration = expiration.unwrap_or_default().to_string();
        self
    }

    /// Apply a price tick. Returns whether a stored field changed.
    pub fn apply_price(&mut self, field: PriceTickField, price: f64) -> bool {
        match field {
            PriceTickField::Bid => self.bid = price,
            PriceTickField::Ask => self.ask = price,
            PriceTickField::Last => self.last_price = price,
            PriceTickField::High
            | PriceTickField::Low
            | PriceTickField::Close
            | PriceTickField::Other(_) => {}
        }
        self.touch();
        field.is_persisted()
    }

    /// Apply a size tick. Returns whether a stored field changed.
    pub fn apply_size(&mut self, field: SizeTickField, size: Decimal) -> bool {
        match field {
            SizeTickField::BidSize => self.bid_size = size,
            SizeTickField::AskSize => self.ask_size = size,
            SizeTickField::Volume => self.volume = size,
            SizeTickField::LastSize | SizeTickField::Other(_) => {}
        }
        self.touch();
        field.is_persisted()
    }

    // lastUpdated is strictly increasing per subscription, even on coarse clocks
    fn touch(&mut self) {
        let now = Utc::now();
        self.last_updated = if now > self.last_updated {
            now
        } else {
            self.last_updated + TimeDelta::nanoseconds(1)
        };
    }
}

// =============================================================================
// Tests
// =============================================================================
