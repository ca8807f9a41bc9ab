//! Gateway Frame Codec
//!
//! The sidecar sends text frames holding either a single JSON event object
//! or an array of them. Event types this bridge does not model decode to
//! [`InboundEvent::Other`] instead of failing the frame.

use serde_json::Value;

use crate::domain::gateway::{InboundEvent, OutboundCommand};

/// Wire `type` values with a dedicated [`InboundEvent`] variant.
const MODELED_TYPES: &[&str] = &[
    "connectAck",
    "connectionClosed",
    "nextValidId",
    "managedAccounts",
    "contractDetails",
    "contractDetailsEnd",
    "tickPrice",
    "tickSize",
    "tickString",
    "tickGeneric",
    "accountSummary",
    "accountSummaryEnd",
    "position",
    "positionEnd",
    "orderStatus",
    "error",
    "other",
];

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// An event object has no string `type` field.
    #[error("event without type field")]
    MissingType,

    /// Invalid frame format.
    #[error("invalid frame format: {0}")]
    InvalidFormat(String),
}

/// JSON codec for the gateway sidecar link.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a text frame into its events, in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not JSON, is neither an object nor an
    /// array, or a modeled event is malformed.
    pub fn decode(&self, text: &str) -> Result<Vec<InboundEvent>, CodecError> {
        match serde_json::from_str::<Value>(text.trim())? {
            Value::Array(values) => values.into_iter().map(|v| self.decode_value(v)).collect(),
            value @ Value::Object(_) => Ok(vec![self.decode_value(value)?]),
            other => Err(CodecError::InvalidFormat(format!(
                "expected JSON array or object, got {}",
                type_name(&other)
            ))),
        }
    }

    fn decode_value(&self, value: Value) -> Result<InboundEvent, CodecError> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(CodecError::MissingType)?;

        if MODELED_TYPES.contains(&kind) {
            Ok(serde_json::from_value(value)?)
        } else {
            Ok(InboundEvent::Other {
                name: kind.to_string(),
            })
        }
    }

    /// Encode a command as a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self, command: &OutboundCommand) -> Result<String, CodecError> {
        Ok(serde_json::to_string(command)?)
    }
}

const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::domain::contract::ContractQuery;

    #[test]
    fn decodes_single_object() {
        let events = JsonCodec::new().decode(r#"{"type":"connectAck"}"#).unwrap();
        assert_eq!(events, vec![InboundEvent::ConnectAck]);
    }

    #[test]
    fn decodes_array_in_order() {
        let frame = r#"[
            {"type":"tickPrice","tickerId":1000,"field":4,"price":4500.25},
            {"type":"tickSize","tickerId":1000,"field":8,"size":"125000"}
        ]"#;
        let events = JsonCodec::new().decode(frame).unwrap();

        assert_eq!(
            events,
            vec![
                InboundEvent::TickPrice {
                    ticker_id: 1000,
                    field: 4,
                    price: 4500.25,
                },
                InboundEvent::TickSize {
                    ticker_id: 1000,
                    field: 8,
                    size: Decimal::from(125_000),
                },
            ]
        );
    }

    #[test]
    fn unmodeled_type_becomes_other() {
        let events = JsonCodec::new()
            .decode(r#"{"type":"historicalData","reqId":3}"#)
            .unwrap();
        assert_eq!(
            events,
            vec![InboundEvent::Other {
                name: "historicalData".to_string()
            }]
        );
    }

    #[test]
    fn rejects_bad_frames() {
        let codec = JsonCodec::new();
        assert!(matches!(codec.decode("not json"), Err(CodecError::Json(_))));
        assert!(matches!(codec.decode("42"), Err(CodecError::InvalidFormat(_))));
        assert!(matches!(codec.decode(r#"{"id":1}"#), Err(CodecError::MissingType)));
        assert!(matches!(
            codec.decode(r#"{"type":"tickPrice","tickerId":"x"}"#),
            Err(CodecError::Json(_))
        ));
    }

    #[test]
    fn encodes_commands_with_type_tag() {
        let json = JsonCodec::new()
            .encode(&OutboundCommand::RequestContractDetails {
                req_id: 7,
                contract: ContractQuery::by_con_id(12345),
            })
            .unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["type"], "requestContractDetails");
        assert_eq!(value["reqId"], 7);
        assert_eq!(value["contract"]["conId"], 12345);
    }
}
