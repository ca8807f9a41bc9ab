//! Subscription Registry
//!
//! Live market data snapshots keyed by ticker id. Callers create and cancel
//! entries; only the message pump applies ticks.
//!
//! Entries are sharded so ticks on one ticker never wait on another.

use std::collections::BTreeMap;

use dashmap::DashMap;
use rust_decimal::Decimal;

use crate::domain::contract::ConId;
use crate::domain::market_data::{MarketDataSubscription, PriceTickField, SizeTickField};
use crate::domain::session::TickerId;
use crate::infrastructure::metrics;

/// Registry of active market data subscriptions.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: DashMap<TickerId, MarketDataSubscription>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and store a zero-valued snapshot for `ticker_id`.
    ///
    /// An existing entry under the same id is replaced.
    pub fn subscribe(
        &self,
        ticker_id: TickerId,
        symbol: &str,
        con_id: ConId,
        contract_month: Option<&str>,
        expiration: Option<&str>,
        exchange: &str,
    ) -> MarketDataSubscription {
        let snapshot = MarketDataSubscription::new(ticker_id, symbol, con_id, exchange)
            .with_expiry(contract_month, expiration);
        self.entries.insert(ticker_id, snapshot.clone());
        metrics::set_active_subscriptions(self.entries.len());

        tracing::info!(ticker_id, symbol, con_id, "Market data subscription created");
        snapshot
    }

    /// Apply a price tick. Returns the updated snapshot, or `None` for an
    /// unknown ticker id.
    pub fn apply_price_tick(
        &self,
        ticker_id: TickerId,
        field_code: i32,
        price: f64,
    ) -> Option<MarketDataSubscription> {
        let field = PriceTickField::from_code(field_code);
        let mut entry = self.entries.get_mut(&ticker_id)?;
        entry.apply_price(field, price);
        metrics::record_tick_applied(field.as_str());

        tracing::debug!(ticker_id, field = field.as_str(), price, "Price tick applied");
        Some(entry.value().clone())
    }

    /// Apply a size tick. Returns the updated snapshot, or `None` for an
    /// unknown ticker id.
    pub fn apply_size_tick(
        &self,
        ticker_id: TickerId,
        field_code: i32,
        size: Decimal,
    ) -> Option<MarketDataSubscription> {
        let field = SizeTickField::from_code(field_code);
        let mut entry = self.entries.get_mut(&ticker_id)?;
        entry.apply_size(field, size);
        metrics::record_tick_applied(field.as_str());

        tracing::debug!(ticker_id, field = field.as_str(), %size, "Size tick applied");
        Some(entry.value().clone())
    }

    /// Remove `ticker_id`. Returns the last snapshot if it was present.
    pub fn cancel(&self, ticker_id: TickerId) -> Option<MarketDataSubscription> {
        let removed = self.entries.remove(&ticker_id).map(|(_, snapshot)| snapshot);
        metrics::set_active_subscriptions(self.entries.len());
        removed
    }

    /// Current snapshot for `ticker_id`.
    #[must_use]
    pub fn snapshot(&self, ticker_id: TickerId) -> Option<MarketDataSubscription> {
        self.entries.get(&ticker_id).map(|entry| entry.value().clone())
    }

    /// Copy of every active snapshot, ordered by ticker id.
    #[must_use]
    pub fn all_active(&self) -> BTreeMap<TickerId, MarketDataSubscription> {
        self.entries
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Whether `ticker_id` is active.
    #[must_use]
    pub fn contains(&self, ticker_id: TickerId) -> bool {
        self.entries.contains_key(&ticker_id)
    }

    /// Number of active subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no active subscriptions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_mes() -> SubscriptionRegistry {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(1000, "MES", 12345, None, None, "CME");
        registry
    }

    #[test]
    fn subscribe_stores_zero_snapshot() {
        let registry = SubscriptionRegistry::new();
        let snapshot = registry.subscribe(1000, "MES", 12345, Some("202512"), None, "CME");

        assert_eq!(snapshot.ticker_id, 1000);
        assert_eq!(snapshot.contract_month, "202512");
        assert_eq!(snapshot.expiration, "");
        assert_eq!(snapshot.last_price, 0.0);
        assert_eq!(registry.snapshot(1000), Some(snapshot));
    }

    #[test]
    fn price_ticks_accumulate_in_order() {
        let registry = registry_with_mes();

        let after_bid = registry.apply_price_tick(1000, 1, 100.5).unwrap();
        let after_last = registry.apply_price_tick(1000, 4, 101.0).unwrap();

        assert_eq!(after_last.bid, 100.5);
        assert_eq!(after_last.last_price, 101.0);
        assert_eq!(after_last.ask, 0.0);
        assert!(after_last.last_updated > after_bid.last_updated);
    }

    #[test]
    fn unpersisted_codes_still_return_snapshot() {
        let registry = registry_with_mes();
        let before = registry.snapshot(1000).unwrap();

        let after = registry.apply_price_tick(1000, 6, 4600.0).unwrap();
        assert_eq!(after.bid, before.bid);
        assert!(after.last_updated > before.last_updated);

        assert!(registry.apply_size_tick(1000, 5, Decimal::ONE).is_some());
    }

    #[test]
    fn ticks_for_unknown_ticker_are_noops() {
        let registry = registry_with_mes();

        assert!(registry.apply_price_tick(2000, 4, 1.0).is_none());
        assert!(registry.apply_size_tick(2000, 8, Decimal::TEN).is_none());
        assert!(!registry.contains(2000));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn cancel_removes_entry_and_stops_updates() {
        let registry = registry_with_mes();

        assert!(registry.cancel(1000).is_some());
        assert!(registry.cancel(1000).is_none());
        assert!(registry.apply_price_tick(1000, 4, 4500.25).is_none());
        assert!(registry.all_active().is_empty());
    }

    #[test]
    fn all_active_is_ordered_copy() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(1002, "ES", 2, None, None, "CME");
        registry.subscribe(1000, "MES", 1, None, None, "CME");

        let active = registry.all_active();
        assert_eq!(active.keys().copied().collect::<Vec<_>>(), vec![1000, 1002]);

        registry.apply_price_tick(1000, 1, 5.0);
        assert_eq!(active[&1000].bid, 0.0);
    }
}
