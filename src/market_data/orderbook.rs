// =============================================================================
// Orderbook Manager — snapshot aggregation + derived microstructure fields
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::types::OrderBookUnit;

/// One (ask_price, bid_price, ask_size, bid_size) level, ordered best-first.
pub type BookUnit = OrderBookUnit;

/// Orderbook snapshot for a single instrument, with derived fields cached at
/// update time so consumers never recompute them.
#[derive(Debug, Clone, Default)]
pub struct OrderbookSnapshot {
    pub total_ask_size: f64,
    pub total_bid_size: f64,
    pub units: Vec<BookUnit>,
    pub spread: f64,
    pub spread_rate: f64,
    pub bid_depth_ratio: f64,
    pub imbalance: f64,
}

impl OrderbookSnapshot {
    fn from_units(units: Vec<BookUnit>) -> Self {
        let total_ask_size: f64 = units.iter().map(|u| u.ask_size).sum();
        let total_bid_size: f64 = units.iter().map(|u| u.bid_size).sum();

        let (best_ask, best_bid) = units
            .first()
            .map(|u| (u.ask_price, u.bid_price))
            .unwrap_or((0.0, 0.0));

        let spread = best_ask - best_bid;
        let mid = (best_ask + best_bid) / 2.0;
        let spread_rate = if mid > 0.0 { spread / mid } else { 0.0 };

        let top5 = &units[..units.len().min(5)];
        let top5_bid: f64 = top5.iter().map(|u| u.bid_size).sum();
        let top5_ask: f64 = top5.iter().map(|u| u.ask_size).sum();
        let top5_total = top5_bid + top5_ask;
        let bid_depth_ratio = if top5_total > 0.0 { top5_bid / top5_total } else { 0.0 };

        let denom = total_bid_size + total_ask_size;
        let imbalance = if denom > 0.0 {
            (total_bid_size - total_ask_size) / denom
        } else {
            0.0
        };

        Self {
            total_ask_size,
            total_bid_size,
            units,
            spread,
            spread_rate,
            bid_depth_ratio,
            imbalance,
        }
    }
}

/// Thread-safe orderbook cache keyed by instrument. The updating stream task
/// is the sole writer; every other reader gets an owned snapshot clone.
pub struct OrderBookManager {
    books: RwLock<HashMap<String, OrderbookSnapshot>>,
}

impl OrderBookManager {
    pub fn new() -> Self {
        Self {
            books: RwLock::new(HashMap::new()),
        }
    }

    /// Overwrite the cached snapshot for `instrument` with a freshly
    /// computed one.
    pub fn update(&self, instrument: &str, units: Vec<BookUnit>) {
        let snapshot = OrderbookSnapshot::from_units(units);
        self.books.write().insert(instrument.to_string(), snapshot);
    }

    pub fn get(&self, instrument: &str) -> Option<OrderbookSnapshot> {
        self.books.read().get(instrument).cloned()
    }

    pub fn imbalance(&self, instrument: &str) -> Option<f64> {
        self.books.read().get(instrument).map(|s| s.imbalance)
    }

    pub fn symbols(&self) -> Vec<String> {
        self.books.read().keys().cloned().collect()
    }
}

impl Default for OrderBookManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(ask_p: f64, bid_p: f64, ask_s: f64, bid_s: f64) -> BookUnit {
        BookUnit {
            ask_price: ask_p,
            bid_price: bid_p,
            ask_size: ask_s,
            bid_size: bid_s,
        }
    }

    #[test]
    fn imbalance_in_range() {
        let mgr = OrderBookManager::new();
        mgr.update("BTCUSDT", vec![unit(100.1, 100.0, 5.0, 10.0)]);
        let snap = mgr.get("BTCUSDT").unwrap();
        assert!((-1.0..=1.0).contains(&snap.imbalance));
        // bid-heavy book => positive imbalance
        assert!(snap.imbalance > 0.0);
    }

    #[test]
    fn empty_book_has_zeroed_derived_fields() {
        let mgr = OrderBookManager::new();
        mgr.update("ETHUSDT", vec![]);
        let snap = mgr.get("ETHUSDT").unwrap();
        assert_eq!(snap.spread, 0.0);
        assert_eq!(snap.imbalance, 0.0);
        assert_eq!(snap.bid_depth_ratio, 0.0);
    }

    #[test]
    fn spread_and_spread_rate() {
        let mgr = OrderBookManager::new();
        mgr.update("BTCUSDT", vec![unit(101.0, 100.0, 1.0, 1.0)]);
        let snap = mgr.get("BTCUSDT").unwrap();
        assert!((snap.spread - 1.0).abs() < 1e-9);
        assert!(snap.spread_rate > 0.0);
    }

    #[test]
    fn depth_ratio_uses_top_5_only() {
        let mgr = OrderBookManager::new();
        let units: Vec<BookUnit> = (0..10).map(|_| unit(101.0, 100.0, 1.0, 9.0)).collect();
        mgr.update("BTCUSDT", units);
        let snap = mgr.get("BTCUSDT").unwrap();
        // top 5: bid=45, ask=5 => ratio = 45/50 = 0.9
        assert!((snap.bid_depth_ratio - 0.9).abs() < 1e-9);
    }

    #[test]
    fn missing_symbol_returns_none() {
        let mgr = OrderBookManager::new();
        assert!(mgr.get("XYZ").is_none());
    }
}
