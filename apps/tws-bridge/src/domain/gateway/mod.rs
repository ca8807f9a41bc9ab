//! Gateway Message Types
//!
//! Decoded inbound events and outbound commands exchanged with the gateway
//! sidecar. Events arrive as JSON objects discriminated by a `type` field.
//!
//! # Wire Format (JSON)
//!
//! ```json
//! {"type": "connectAck"}
//! {"type": "contractDetails", "reqId": 7, "details": {"conId": 12345, "symbol": "MES"}}
//! {"type": "tickPrice", "tickerId": 1000, "field": 4, "price": 4500.25}
//! {"type": "tickSize", "tickerId": 1000, "field": 8, "size": "125000"}
//! {"type": "error", "id": 7, "code": 200, "message": "No security definition"}
//! ```
//!
//! Only the correlated subset is routed by the pump. Account, position and
//! order callbacks are decoded so they can be observed, nothing more.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::contract::{Contract, ContractDetails, ContractQuery};
use super::session::{RequestId, TickerId};

/// Gateway error codes in this range are informational (farm status etc.).
pub const INFO_CODES: std::ops::RangeInclusive<i32> = 2100..=2199;

// =============================================================================
// Inbound
// =============================================================================

/// Event decoded from the gateway stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum InboundEvent {
    /// Gateway accepted the session.
    ConnectAck,
    /// Gateway closed the session.
    ConnectionClosed,
    /// Next valid order id.
    NextValidId {
        /// Order id.
        order_id: i32,
    },
    /// Comma-separated managed account list.
    ManagedAccounts {
        /// Account codes.
        accounts: String,
    },
    /// One contract matching a details request.
    ContractDetails {
        /// Request the details answer.
        req_id: RequestId,
        /// The matching contract.
        details: ContractDetails,
    },
    /// All contracts for a details request have been sent.
    ContractDetailsEnd {
        /// Request that finished.
        req_id: RequestId,
    },
    /// Price update for a market data stream.
    TickPrice {
        /// Stream the update belongs to.
        ticker_id: TickerId,
        /// Field code.
        field: i32,
        /// Price.
        price: f64,
    },
    /// Size update for a market data stream.
    TickSize {
        /// Stream the update belongs to.
        ticker_id: TickerId,
        /// Field code.
        field: i32,
        /// Size.
        size: Decimal,
    },
    /// String-valued tick.
    TickString {
        /// Stream the update belongs to.
        ticker_id: TickerId,
        /// Field code.
        field: i32,
        /// Value.
        value: String,
    },
    /// Generic numeric tick.
    TickGeneric {
        /// Stream the update belongs to.
        ticker_id: TickerId,
        /// Field code.
        field: i32,
        /// Value.
        value: f64,
    },
    /// Account summary row.
    AccountSummary {
        /// Summary request id.
        req_id: RequestId,
        /// Account code.
        account: String,
        /// Summary tag.
        tag: String,
        /// Value.
        value: String,
        /// Currency.
        #[serde(default)]
        currency: String,
    },
    /// Account summary finished.
    AccountSummaryEnd {
        /// Summary request id.
        req_id: RequestId,
    },
    /// Open position.
    Position {
        /// Account code.
        account: String,
        /// Position contract.
        contract: Contract,
        /// Quantity.
        position: Decimal,
        /// Average cost.
        avg_cost: f64,
    },
    /// Position list finished.
    PositionEnd,
    /// Order status change.
    OrderStatus {
        /// Order id.
        order_id: i32,
        /// Status text.
        status: String,
        /// Filled quantity.
        filled: Decimal,
        /// Remaining quantity.
        remaining: Decimal,
        /// Average fill price.
        avg_fill_price: f64,
    },
    /// Error tied to a request or ticker id (negative for session-level).
    Error {
        /// Correlation id.
        id: i32,
        /// Gateway error code.
        code: i32,
        /// Message text.
        message: String,
    },
    /// Any callback without a dedicated variant.
    Other {
        /// Callback name as sent by the sidecar.
        name: String,
    },
}

impl InboundEvent {
    /// Short label used in logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ConnectAck => "connect_ack",
            Self::ConnectionClosed => "connection_closed",
            Self::NextValidId { .. } => "next_valid_id",
            Self::ManagedAccounts { .. } => "managed_accounts",
            Self::ContractDetails { .. } => "contract_details",
            Self::ContractDetailsEnd { .. } => "contract_details_end",
            Self::TickPrice { .. } => "tick_price",
            Self::TickSize { .. } => "tick_size",
            Self::TickString { .. } => "tick_string",
            Self::TickGeneric { .. } => "tick_generic",
            Self::AccountSummary { .. } => "account_summary",
            Self::AccountSummaryEnd { .. } => "account_summary_end",
            Self::Position { .. } => "position",
            Self::PositionEnd => "position_end",
            Self::OrderStatus { .. } => "order_status",
            Self::Error { .. } => "error",
            Self::Other { .. } => "other",
        }
    }
}

/// Whether an error event is session-level or informational only.
#[must_use]
pub fn is_informational_error(id: i32, code: i32) -> bool {
    id < 0 || INFO_CODES.contains(&code)
}

// =============================================================================
// Outbound
// =============================================================================

/// Command written to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum OutboundCommand {
    /// Ask for every contract matching `contract`.
    RequestContractDetails {
        /// Correlation id for the answers.
        req_id: RequestId,
        /// Contract fields to match.
        contract: ContractQuery,
    },
    /// Start streaming market data for `contract`.
    RequestMarketData {
        /// Id the gateway tags updates with.
        ticker_id: TickerId,
        /// Contract to stream.
        contract: ContractQuery,
    },
    /// Stop streaming for `ticker_id`.
    CancelMarketData {
        /// Stream to stop.
        ticker_id: TickerId,
    },
}

impl OutboundCommand {
    /// Short label used in logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::RequestContractDetails { .. } => "request_contract_details",
            Self::RequestMarketData { .. } => "request_market_data",
            Self::CancelMarketData { .. } => "cancel_market_data",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_tick_events() {
        let price: InboundEvent =
            serde_json::from_str(r#"{"type":"tickPrice","tickerId":1000,"field":4,"price":4500.25}"#)
                .unwrap();
        assert_eq!(
            price,
            InboundEvent::TickPrice {
                ticker_id: 1000,
                field: 4,
                price: 4500.25
            }
        );

        let size: InboundEvent =
            serde_json::from_str(r#"{"type":"tickSize","tickerId":1000,"field":8,"size":"125000"}"#)
                .unwrap();
        assert_eq!(size.kind(), "tick_size");
    }

    #[test]
    fn decode_contract_details_defaults_missing_fields() {
        let event: InboundEvent = serde_json::from_str(
            r#"{"type":"contractDetails","reqId":3,"details":{"conId":12345,"symbol":"MES","contractMonth":"202512"}}"#,
        )
        .unwrap();

        let InboundEvent::ContractDetails { req_id, details } = event else {
            panic!("expected contract details");
        };
        assert_eq!(req_id, 3);
        assert_eq!(details.contract_month, "202512");
        assert_eq!(details.contract.trading_class, "");
    }

    #[test]
    fn unit_variants_decode_from_tag_only() {
        let event: InboundEvent = serde_json::from_str(r#"{"type":"connectAck"}"#).unwrap();
        assert_eq!(event, InboundEvent::ConnectAck);
    }

    #[test]
    fn informational_errors() {
        assert!(is_informational_error(-1, 502));
        assert!(is_informational_error(5, 2104));
        assert!(!is_informational_error(5, 200));
    }

    #[test]
    fn outbound_encodes_camel_case() {
        let command = OutboundCommand::RequestMarketData {
            ticker_id: 1000,
            contract: ContractQuery::by_con_id(12345),
        };
        let value = serde_json::to_value(&command).unwrap();
        assert_eq!(value["type"], "requestMarketData");
        assert_eq!(value["tickerId"], 1000);
        assert_eq!(value["contract"]["conId"], 12345);
    }
}
