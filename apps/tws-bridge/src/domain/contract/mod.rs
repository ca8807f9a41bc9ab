//! Contract Types
//!
//! Contract descriptions returned by the gateway and the query shapes sent
//! with contract-details and market-data requests.
//!
//! Optional text fields are surfaced as empty strings, never as nulls.

use serde::{Deserialize, Serialize};

/// Contract identifier assigned by the gateway.
pub type ConId = i32;

/// Description of a tradable instrument.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Contract {
    /// Gateway contract id.
    pub con_id: ConId,
    /// Underlying symbol.
    pub symbol: String,
    /// Security type (`FUT`, `STK`, `OPT`, ...).
    pub sec_type: String,
    /// Routing exchange.
    pub exchange: String,
    /// Trading currency.
    pub currency: String,
    /// Contract multiplier.
    pub multiplier: String,
    /// Trading class.
    pub trading_class: String,
    /// Free-form description.
    pub description: String,
}

/// Contract plus the expiry attributes reported alongside it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContractDetails {
    /// The contract itself.
    #[serde(flatten)]
    pub contract: Contract,
    /// Contract month (`YYYYMM`).
    pub contract_month: String,
    /// Real expiration date (`YYYYMMDD`).
    pub real_expiration_date: String,
    /// Last trade time.
    pub last_trade_time: String,
}

impl ContractDetails {
    /// Gateway contract id.
    #[must_use]
    pub const fn con_id(&self) -> ConId {
        self.contract.con_id
    }

    /// Underlying symbol.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.contract.symbol
    }
}

/// Contract fields sent with an outbound request.
///
/// Unset fields are left for the gateway to resolve.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractQuery {
    /// Contract id, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub con_id: Option<ConId>,
    /// Underlying symbol.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub symbol: String,
    /// Security type.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub sec_type: String,
    /// Routing exchange.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub exchange: String,
    /// Trading currency.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub currency: String,
    /// Last trade date or contract month.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_month: Option<String>,
    /// Last trade date.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration: Option<String>,
}

impl ContractQuery {
    /// Query by symbol, security type, exchange and currency.
    #[must_use]
    pub fn search(symbol: &str, sec_type: &str, exchange: &str, currency: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            sec_type: sec_type.to_string(),
            exchange: exchange.to_string(),
            currency: currency.to_string(),
            ..Self::default()
        }
    }

    /// Query by contract id only.
    #[must_use]
    pub fn by_con_id(con_id: ConId) -> Self {
        Self {
            con_id: Some(con_id),
            ..Self::default()
        }
    }

    /// Set the contract month, ignoring empty values.
    #[must_use]
    pub fn with_contract_month(mut self, month: Option<&str>) -> Self {
        self.contract_month = month.filter(|m| !m.is_empty()).map(str::to_string);
        self
    }

    /// Set the expiration, ignoring empty values.
    #[must_use]
    pub fn with_expiration(mut self, expiration: Option<&str>) -> Self {
        self.expiration = expiration.filter(|e| !e.is_empty()).map(str::to_string);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn details_missing_fields_default_to_empty() {
        let details: ContractDetails =
            serde_json::from_str(r#"{"conId":495512563,"symbol":"MES"}"#).unwrap();

        assert_eq!(details.con_id(), 495_512_563);
        assert_eq!(details.symbol(), "MES");
        assert_eq!(details.contract.multiplier, "");
        assert_eq!(details.contract_month, "");
    }

    #[test]
    fn details_serialize_flat() {
        let details = ContractDetails {
            contract: Contract {
                con_id: 12345,
                symbol: "MES".to_string(),
                sec_type: "FUT".to_string(),
                exchange: "CME".to_string(),
                currency: "USD".to_string(),
                multiplier: "5".to_string(),
                trading_class: "MES".to_string(),
                description: String::new(),
            },
            contract_month: "202512".to_string(),
            real_expiration_date: "20251219".to_string(),
            last_trade_time: "08:30:00".to_string(),
        };

        let value = serde_json::to_value(&details).unwrap();
        assert_eq!(value["conId"], 12345);
        assert_eq!(value["tradingClass"], "MES");
        assert_eq!(value["realExpirationDate"], "20251219");
        assert_eq!(value["description"], "");
    }

    #[test]
    fn query_ignores_empty_month_and_expiration() {
        let query = ContractQuery::by_con_id(1)
            .with_contract_month(Some(""))
            .with_expiration(None);
        assert!(query.contract_month.is_none());
        assert!(query.expiration.is_none());

        let query = ContractQuery::by_con_id(1).with_contract_month(Some("202512"));
        assert_eq!(query.contract_month.as_deref(), Some("202512"));
    }

    #[test]
    fn search_query_skips_unset_fields() {
        let json = serde_json::to_string(&ContractQuery::search("ES", "FUT", "CME", "USD")).unwrap();
        assert!(!json.contains("conId"));
        assert!(json.contains("\"secType\":\"FUT\""));
    }
}
