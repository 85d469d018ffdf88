// =============================================================================
// EntryPolicy — ordered preconditions gating a new position
// =============================================================================
//
// Every gate runs in order, the first failure short-circuits with its
// reason, `None` means approved.

use std::collections::VecDeque;

use tracing::debug;

use crate::config::Config;
use crate::momentum::MomentumResult;
use crate::sentiment::SentimentResult;
use crate::trend::TrendResult;
use crate::types::Trend;

const RECENT_WINDOW_SECS: i64 = 3_600;
const REENTRY_DROP_FACTOR: f64 = 0.98;
const OVERHEATED_D3_DELTA: f64 = 0.20;
const OVERHEATED_M5_DELTA: f64 = 0.005;

/// Per-instrument trade-frequency and loss bookkeeping. `position` is kept
/// outside this struct — `position_manager::Position` is mutated by the
/// decision tick's own branch, never by `EntryPolicy`.
#[derive(Debug, Clone, Default)]
pub struct InstrumentState {
    trade_timestamps: VecDeque<i64>,
    loss_timestamps: VecDeque<i64>,
    pub last_trade_time: i64,
    pub last_loss_time: i64,
    pub consecutive_losses: u32,
    pub last_exit_price: f64,
    pub processing_order: bool,
}

impl InstrumentState {
    pub fn record_trade_opened(&mut self, now: i64) {
        self.trade_timestamps.push_back(now);
        self.prune(now);
        self.last_trade_time = now;
    }

    pub fn record_loss(&mut self, now: i64, exit_price: f64) {
        self.loss_timestamps.push_back(now);
        self.prune(now);
        self.last_loss_time = now;
        self.consecutive_losses += 1;
        self.last_exit_price = exit_price;
    }

    pub fn record_profit(&mut self, exit_price: f64) {
        self.consecutive_losses = 0;
        self.last_exit_price = exit_price;
    }

    fn prune(&mut self, now: i64) {
        while self.trade_timestamps.front().is_some_and(|t| now - t > RECENT_WINDOW_SECS) {
            self.trade_timestamps.pop_front();
        }
        while self.loss_timestamps.front().is_some_and(|t| now - t > RECENT_WINDOW_SECS) {
            self.loss_timestamps.pop_front();
        }
    }

    fn trades_in_last_hour(&self, now: i64) -> usize {
        self.trade_timestamps.iter().filter(|t| now - **t <= RECENT_WINDOW_SECS).count()
    }

    fn recent_loss_count(&self, now: i64) -> usize {
        self.loss_timestamps.iter().filter(|t| now - **t <= RECENT_WINDOW_SECS).count()
    }

    /// Gate 1: trade frequency, re-trade spacing, and loss cooldowns.
    pub fn can_trade(&self, now: i64, cfg: &Config) -> Result<(), String> {
        if self.trades_in_last_hour(now) as u32 >= cfg.max_trades_per_hour {
            return Err(format!("max trades per hour reached ({})", cfg.max_trades_per_hour));
        }
        if now - self.last_trade_time < 300 {
            return Err("too soon since last trade".to_string());
        }
        let cooldown = if self.consecutive_losses >= 2 {
            cfg.consecutive_loss_cooldown_secs
        } else {
            cfg.cool_down_after_loss_secs
        };
        if now - self.last_loss_time < cooldown as i64 {
            return Err("within post-loss cooldown".to_string());
        }
        if self.recent_loss_count(now) >= 3 {
            return Err("too many losses in the last hour".to_string());
        }
        Ok(())
    }
}

/// Evaluate whether a new entry is allowed for `instrument`. Returns `None`
/// when approved, `Some(reason)` for the first gate that blocks.
#[allow(clippy::too_many_arguments)]
pub fn evaluate(
    instrument: &str,
    state: &InstrumentState,
    now: i64,
    current_price: f64,
    trend: &TrendResult,
    sentiment: &SentimentResult,
    rsi: f64,
    fatigue: f64,
    momentum: &MomentumResult,
    momentum_exhaustion: bool,
    cfg: &Config,
) -> Option<String> {
    if let Err(reason) = state.can_trade(now, cfg) {
        debug!(instrument, reason, "entry blocked: instrument cooldown");
        return Some(reason);
    }

    if state.consecutive_losses > 0 && state.last_exit_price > 0.0 && current_price > REENTRY_DROP_FACTOR * state.last_exit_price {
        let reason = "reentry guard: price has not retraced below last exit".to_string();
        debug!(instrument, reason, "entry blocked");
        return Some(reason);
    }

    if trend.h4_delta < cfg.h4_bearish_threshold {
        let reason = format!("h4 delta {:.4} below bearish threshold", trend.h4_delta);
        debug!(instrument, reason, "entry blocked");
        return Some(reason);
    }
    if trend.daily3d_delta > OVERHEATED_D3_DELTA && trend.m5_delta < OVERHEATED_M5_DELTA {
        let reason = "overheated: 3d run-up with stalled 5m momentum".to_string();
        debug!(instrument, reason, "entry blocked");
        return Some(reason);
    }

    if sentiment.sentiment == Trend::Bearish {
        let reason = "sentiment bearish".to_string();
        debug!(instrument, reason, "entry blocked");
        return Some(reason);
    }

    if fatigue >= 35.0 || rsi >= 65.0 {
        if momentum.strength < 75.0 || sentiment.sell_pressure > 0.50 {
            let reason = "elevated fatigue/RSI without strong confirming momentum".to_string();
            debug!(instrument, reason, "entry blocked");
            return Some(reason);
        }
    }

    if rsi >= 75.0 {
        let reason = format!("RSI {rsi:.1} overbought");
        debug!(instrument, reason, "entry blocked");
        return Some(reason);
    }

    if momentum_exhaustion {
        let reason = "momentum exhaustion detected".to_string();
        debug!(instrument, reason, "entry blocked");
        return Some(reason);
    }

    if !momentum.signal {
        let reason = "no momentum signal".to_string();
        debug!(instrument, reason, "entry blocked");
        return Some(reason);
    }

    debug!(instrument, "entry approved");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Stage;

    fn passing_trend() -> TrendResult {
        TrendResult {
            trend: Trend::Bullish,
            score: 0.02,
            m5_delta: 0.01,
            m15_delta: 0.01,
            h4_delta: 0.0,
            daily1d_delta: 0.0,
            daily3d_delta: 0.0,
            can_trade: true,
            long_term_bearish: false,
            strong_short_momentum: false,
            buy_pressure: 0.6,
            fatigue: 10.0,
        }
    }

    fn passing_sentiment() -> SentimentResult {
        SentimentResult { score: 70.0, sentiment: Trend::Bullish, sell_pressure: 0.3, reasons: Vec::new() }
    }

    fn passing_momentum() -> MomentumResult {
        MomentumResult {
            signal: true,
            strength: 80.0,
            minute_signal: true,
            second_signal: false,
            rapid_rise: false,
            mtf_valid: true,
            mtf_stage: Stage::Early,
            mtf_blocked: false,
            reason: "ok".to_string(),
        }
    }

    #[test]
    fn all_clear_approves() {
        let cfg = Config::default();
        let state = InstrumentState::default();
        let result = evaluate("TEST", &state, 10_000, 100.0, &passing_trend(), &passing_sentiment(), 50.0, 10.0, &passing_momentum(), false, &cfg);
        assert!(result.is_none());
    }

    #[test]
    fn too_soon_after_last_trade_blocks() {
        let cfg = Config::default();
        let mut state = InstrumentState::default();
        state.last_trade_time = 10_000;
        let result = evaluate("TEST", &state, 10_100, 100.0, &passing_trend(), &passing_sentiment(), 50.0, 10.0, &passing_momentum(), false, &cfg);
        assert!(result.is_some());
    }

    #[test]
    fn reentry_guard_blocks_without_sufficient_retrace() {
        let cfg = Config::default();
        let mut state = InstrumentState::default();
        state.consecutive_losses = 1;
        state.last_exit_price = 100.0;
        state.last_loss_time = 0;
        // current price only 1% below last exit, guard requires >= 2% retrace.
        let result = evaluate("TEST", &state, 100_000, 99.0, &passing_trend(), &passing_sentiment(), 50.0, 10.0, &passing_momentum(), false, &cfg);
        assert!(result.is_some());
    }

    #[test]
    fn reentry_guard_passes_with_sufficient_retrace() {
        let cfg = Config::default();
        let mut state = InstrumentState::default();
        state.consecutive_losses = 1;
        state.last_exit_price = 100.0;
        state.last_loss_time = 0;
        let result = evaluate("TEST", &state, 100_000, 97.5, &passing_trend(), &passing_sentiment(), 50.0, 10.0, &passing_momentum(), false, &cfg);
        assert!(result.is_none());
    }

    #[test]
    fn h4_bearish_delta_blocks() {
        let cfg = Config::default();
        let state = InstrumentState::default();
        let mut trend = passing_trend();
        trend.h4_delta = -0.01;
        let result = evaluate("TEST", &state, 10_000, 100.0, &trend, &passing_sentiment(), 50.0, 10.0, &passing_momentum(), false, &cfg);
        assert!(result.is_some());
    }

    #[test]
    fn overheated_3d_with_stalled_5m_blocks() {
        let cfg = Config::default();
        let state = InstrumentState::default();
        let mut trend = passing_trend();
        trend.daily3d_delta = 0.25;
        trend.m5_delta = 0.001;
        let result = evaluate("TEST", &state, 10_000, 100.0, &trend, &passing_sentiment(), 50.0, 10.0, &passing_momentum(), false, &cfg);
        assert!(result.is_some());
    }

    #[test]
    fn bearish_sentiment_blocks() {
        let cfg = Config::default();
        let state = InstrumentState::default();
        let sentiment = SentimentResult { score: 20.0, sentiment: Trend::Bearish, sell_pressure: 0.7, reasons: Vec::new() };
        let result = evaluate("TEST", &state, 10_000, 100.0, &passing_trend(), &sentiment, 50.0, 10.0, &passing_momentum(), false, &cfg);
        assert!(result.is_some());
    }

    #[test]
    fn high_fatigue_requires_strong_momentum() {
        let cfg = Config::default();
        let state = InstrumentState::default();
        let mut momentum = passing_momentum();
        momentum.strength = 60.0;
        let result = evaluate("TEST", &state, 10_000, 100.0, &passing_trend(), &passing_sentiment(), 50.0, 40.0, &momentum, false, &cfg);
        assert!(result.is_some());
    }

    #[test]
    fn rsi_overbought_blocks() {
        let cfg = Config::default();
        let state = InstrumentState::default();
        let result = evaluate("TEST", &state, 10_000, 100.0, &passing_trend(), &passing_sentiment(), 80.0, 10.0, &passing_momentum(), false, &cfg);
        assert!(result.is_some());
    }

    #[test]
    fn momentum_exhaustion_blocks() {
        let cfg = Config::default();
        let state = InstrumentState::default();
        let result = evaluate("TEST", &state, 10_000, 100.0, &passing_trend(), &passing_sentiment(), 50.0, 10.0, &passing_momentum(), true, &cfg);
        assert!(result.is_some());
    }

    #[test]
    fn no_momentum_signal_blocks() {
        let cfg = Config::default();
        let state = InstrumentState::default();
        let mut momentum = passing_momentum();
        momentum.signal = false;
        let result = evaluate("TEST", &state, 10_000, 100.0, &passing_trend(), &passing_sentiment(), 50.0, 10.0, &momentum, false, &cfg);
        assert!(result.is_some());
    }
}
