// =============================================================================
// Central Application State
// =============================================================================
//
// Single source of truth tying every subsystem together: one struct holding
// `Arc`/lock-guarded subsystem handles, constructed once and shared via
// `Arc<AppState>` across every async task. No dashboard feed, version
// counter, or balances/futures-intel snapshots live here — nothing in this
// engine consumes them (see DESIGN.md).
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};

use crate::config::Config;
use crate::decision_log::DecisionLog;
use crate::entry_policy::InstrumentState;
use crate::indicators::IndicatorsBlock;
use crate::market_data::{CandleStore, OrderBookManager, TickAggregator};
use crate::position_manager::Position;
use crate::trend::TrendResult;
use crate::types::{Instrument, Trend};

/// Engine-wide counters and the BTC reference gate, exclusively mutated by
/// `PositionManager`'s exit path and the BTC-reference check respectively.
pub struct GlobalState {
    cumulative_profit: RwLock<f64>,
    pub cumulative_trades: AtomicU64,
    pub cumulative_wins: AtomicU64,
    pub cumulative_losses: AtomicU64,
    pub btc_trend: RwLock<Trend>,
    pub market_safe: AtomicBool,
    pub start_time: Instant,
}

impl GlobalState {
    pub fn new() -> Self {
        Self {
            cumulative_profit: RwLock::new(0.0),
            cumulative_trades: AtomicU64::new(0),
            cumulative_wins: AtomicU64::new(0),
            cumulative_losses: AtomicU64::new(0),
            btc_trend: RwLock::new(Trend::Neutral),
            market_safe: AtomicBool::new(true),
            start_time: Instant::now(),
        }
    }

    pub fn cumulative_profit(&self) -> f64 {
        *self.cumulative_profit.read()
    }

    /// Record one closed trade's realised profit into the running totals.
    pub fn record_trade(&self, profit: f64) {
        *self.cumulative_profit.write() += profit;
        self.cumulative_trades.fetch_add(1, Ordering::Relaxed);
        if profit >= 0.0 {
            self.cumulative_wins.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cumulative_losses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn is_market_safe(&self) -> bool {
        self.market_safe.load(Ordering::Relaxed)
    }

    pub fn set_market_safe(&self, safe: bool) {
        self.market_safe.store(safe, Ordering::Relaxed);
    }
}

impl Default for GlobalState {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-instrument bundle: candle rings, trade tape, the latest derived
/// indicator snapshot, trade-frequency/cooldown bookkeeping, and the open
/// position if any. `CandleStore`/`TickAggregator` are internally
/// lock-guarded already; `IndicatorsBlock`/`InstrumentState`/`Position` are
/// plain data wrapped here because the decision tick and position manager
/// need exclusive, sequenced access to them.
pub struct InstrumentRecord {
    pub candles: CandleStore,
    pub ticks: TickAggregator,
    pub indicators: RwLock<IndicatorsBlock>,
    pub state: Mutex<InstrumentState>,
    pub position: Mutex<Option<Position>>,
    /// Cached macro trend, refreshed only by the macro-refresh loop
    /// (TrendAnalyzer runs on a 60s cadence, not per tick).
    pub trend: RwLock<Option<TrendResult>>,
}

impl InstrumentRecord {
    pub fn new() -> Self {
        Self {
            candles: CandleStore::new(),
            ticks: TickAggregator::new(),
            indicators: RwLock::new(IndicatorsBlock::default()),
            state: Mutex::new(InstrumentState::default()),
            position: Mutex::new(None),
            trend: RwLock::new(None),
        }
    }
}

impl Default for InstrumentRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// Central application state shared across every async task via `Arc`.
pub struct AppState {
    pub config: Config,
    pub global: GlobalState,
    pub orderbook: OrderBookManager,
    pub decisions: DecisionLog,
    /// Currently-tracked instrument list, maintained by the market-list
    /// refresh loop (union of the top-ranked markets and every instrument
    /// with an open position).
    pub active_markets: RwLock<Vec<Instrument>>,
    instruments: RwLock<HashMap<Instrument, Arc<InstrumentRecord>>>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let active_markets = RwLock::new(config.markets.clone());
        Self {
            config,
            global: GlobalState::new(),
            orderbook: OrderBookManager::new(),
            decisions: DecisionLog::new(),
            active_markets,
            instruments: RwLock::new(HashMap::new()),
        }
    }

    /// Instruments with a currently open position — must stay subscribed
    /// even if they drop out of the top-ranked market list.
    pub fn held_instruments(&self) -> Vec<Instrument> {
        self.instruments
            .read()
            .iter()
            .filter(|(_, record)| record.position.lock().is_some())
            .map(|(instrument, _)| instrument.clone())
            .collect()
    }

    /// Fetch the record for `instrument`, creating an empty one on first use.
    pub fn instrument(&self, instrument: &str) -> Arc<InstrumentRecord> {
        if let Some(record) = self.instruments.read().get(instrument) {
            return record.clone();
        }
        self.instruments
            .write()
            .entry(instrument.to_string())
            .or_insert_with(|| Arc::new(InstrumentRecord::new()))
            .clone()
    }

    pub fn instrument_list(&self) -> Vec<Instrument> {
        self.instruments.read().keys().cloned().collect()
    }

    pub fn has_instrument(&self, instrument: &str) -> bool {
        self.instruments.read().contains_key(instrument)
    }

    pub fn remove_instrument(&self, instrument: &str) {
        self.instruments.write().remove(instrument);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_trade_updates_running_totals() {
        let global = GlobalState::new();
        global.record_trade(12.5);
        global.record_trade(-3.0);
        assert_eq!(global.cumulative_trades.load(Ordering::Relaxed), 2);
        assert_eq!(global.cumulative_wins.load(Ordering::Relaxed), 1);
        assert_eq!(global.cumulative_losses.load(Ordering::Relaxed), 1);
        assert!((global.cumulative_profit() - 9.5).abs() < 1e-12);
    }

    #[test]
    fn market_safe_defaults_true_and_toggles() {
        let global = GlobalState::new();
        assert!(global.is_market_safe());
        global.set_market_safe(false);
        assert!(!global.is_market_safe());
    }

    #[test]
    fn instrument_lookup_is_get_or_insert() {
        let state = AppState::new(Config::default());
        let a = state.instrument("BTC-USDT");
        let b = state.instrument("BTC-USDT");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(state.instrument_list(), vec!["BTC-USDT".to_string()]);
    }

    #[test]
    fn remove_instrument_drops_its_record() {
        let state = AppState::new(Config::default());
        state.instrument("ETH-USDT");
        assert!(state.has_instrument("ETH-USDT"));
        state.remove_instrument("ETH-USDT");
        assert!(!state.has_instrument("ETH-USDT"));
    }

    #[test]
    fn held_instruments_reflects_open_positions_only() {
        let state = AppState::new(Config::default());
        let held = state.instrument("BTC-USDT");
        *held.position.lock() = Some(Position::open(100.0, 0, 1.0, 100.0, None, &state.config));
        state.instrument("ETH-USDT");
        assert_eq!(state.held_instruments(), vec!["BTC-USDT".to_string()]);
    }
}
