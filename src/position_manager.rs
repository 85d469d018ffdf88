// =============================================================================
// PositionManager — dynamic stop, break-even, trailing, time-exit lifecycle
// =============================================================================
//
// Open/closed position split with `update_price` / `check_exits` /
// `close_position` entry points, driving a fixed stop/break-even/trailing/
// time-exit state machine (see DESIGN.md for the full rule set).

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TrailingStop,
    TimeExit,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StopLoss => write!(f, "stop_loss"),
            Self::TrailingStop => write!(f, "trailing_stop"),
            Self::TimeExit => write!(f, "time_exit"),
        }
    }
}

/// An open long position on one instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub entry_price: f64,
    pub entry_time: i64,
    pub volume: f64,
    pub quote_amount: f64,
    pub highest_price: f64,
    pub stop_loss_price: f64,
    pub take_profit_price: f64,
    pub trailing_active: bool,
    pub dynamic_stop_rate: f64,
}

impl Position {
    /// Open a new position, sizing the initial stop from recent volatility
    /// when known (`volatility` = stdev of recent 1-minute returns), falling
    /// back to the flat `INITIAL_STOP_LOSS` otherwise.
    pub fn open(entry_price: f64, entry_time: i64, volume: f64, quote_amount: f64, volatility: Option<f64>, cfg: &Config) -> Self {
        let dynamic_stop_rate = match volatility {
            Some(v) => {
                let factor = (v * 10.0).min(1.0);
                (cfg.dynamic_stop_loss_min + (cfg.dynamic_stop_loss_max - cfg.dynamic_stop_loss_min) * factor)
                    .clamp(cfg.dynamic_stop_loss_min, cfg.dynamic_stop_loss_max)
            }
            None => cfg.initial_stop_loss,
        };
        let stop_loss_price = entry_price * (1.0 - dynamic_stop_rate);
        let take_profit_price = entry_price * (1.0 + cfg.take_profit_target);

        info!(
            entry_price,
            volume,
            dynamic_stop_rate,
            stop_loss_price,
            take_profit_price,
            "position opened"
        );

        Self {
            entry_price,
            entry_time,
            volume,
            quote_amount,
            highest_price: entry_price,
            stop_loss_price,
            take_profit_price,
            trailing_active: false,
            dynamic_stop_rate,
        }
    }

    fn profit_rate(&self, price: f64) -> f64 {
        if self.entry_price.abs() > f64::EPSILON {
            (price - self.entry_price) / self.entry_price
        } else {
            0.0
        }
    }

    /// Advance this position's state on a new price tick. Returns the exit
    /// reason if an exit barrier triggered this tick, else `None`.
    pub fn on_tick(&mut self, price: f64, now: i64, cfg: &Config) -> Option<ExitReason> {
        self.highest_price = self.highest_price.max(price);
        let profit_rate = self.profit_rate(price);

        if profit_rate >= cfg.break_even_trigger && self.stop_loss_price < self.entry_price {
            self.stop_loss_price = self.entry_price;
        }

        if profit_rate >= cfg.trailing_stop_activation && !self.trailing_active {
            self.trailing_active = true;
            self.stop_loss_price = self.stop_loss_price.max(self.entry_price * (1.0 + cfg.trailing_min_profit));
        }

        if self.trailing_active {
            let candidate = (self.highest_price * (1.0 - cfg.trailing_stop_distance))
                .max(self.entry_price * (1.0 + cfg.trailing_min_profit));
            self.stop_loss_price = self.stop_loss_price.max(candidate);
        }

        if price <= self.stop_loss_price {
            return Some(if self.trailing_active { ExitReason::TrailingStop } else { ExitReason::StopLoss });
        }

        if price >= self.take_profit_price && !self.trailing_active {
            self.trailing_active = true;
            self.stop_loss_price = self.stop_loss_price.max(self.entry_price * (1.0 + cfg.trailing_min_profit));
            return None;
        }

        if now - self.entry_time >= cfg.max_holding_time_secs as i64 {
            return Some(ExitReason::TimeExit);
        }

        None
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExitOutcome {
    pub profit: f64,
    pub reason: ExitReason,
}

/// Realise the position's P&L at `sell_price`, net of the round-trip trading
/// fee on both legs.
pub fn close(position: &Position, sell_price: f64, reason: ExitReason, cfg: &Config) -> ExitOutcome {
    let buy_value = position.volume * position.entry_price;
    let sell_value = position.volume * sell_price;
    let fee = (buy_value + sell_value) * cfg.trading_fee_rate;
    let profit = sell_value - buy_value - fee;

    info!(
        entry_price = position.entry_price,
        sell_price,
        volume = position.volume,
        profit,
        reason = %reason,
        "position closed"
    );

    ExitOutcome { profit, reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dynamic_stop_scales_with_volatility() {
        let cfg = Config::default();
        let pos = Position::open(100.0, 0, 1.0, 100.0, Some(0.003), &cfg);
        // factor = min(0.003*10, 1.0) = 0.03
        let expected_rate = cfg.dynamic_stop_loss_min + (cfg.dynamic_stop_loss_max - cfg.dynamic_stop_loss_min) * 0.03;
        assert!((pos.dynamic_stop_rate - expected_rate).abs() < 1e-12);
        assert!((pos.stop_loss_price - 100.0 * (1.0 - expected_rate)).abs() < 1e-9);
    }

    #[test]
    fn unknown_volatility_uses_flat_initial_stop() {
        let cfg = Config::default();
        let pos = Position::open(100.0, 0, 1.0, 100.0, None, &cfg);
        assert!((pos.dynamic_stop_rate - cfg.initial_stop_loss).abs() < 1e-12);
    }

    #[test]
    fn break_even_promotes_stop_to_entry() {
        let cfg = Config::default();
        let mut pos = Position::open(100.0, 0, 1.0, 100.0, None, &cfg);
        assert!(pos.stop_loss_price < pos.entry_price);
        let exit = pos.on_tick(100.7, 0, &cfg); // profit_rate = 0.007 >= 0.006
        assert!(exit.is_none());
        assert_eq!(pos.stop_loss_price, pos.entry_price);
    }

    #[test]
    fn trailing_stop_never_decreases_as_price_pulls_back() {
        let cfg = Config::default();
        let mut pos = Position::open(100.0, 0, 1.0, 100.0, None, &cfg);
        pos.on_tick(100.9, 0, &cfg); // activates trailing (profit_rate 0.009 >= 0.008)
        assert!(pos.trailing_active);
        let stop_after_peak = pos.stop_loss_price;
        pos.on_tick(101.5, 1, &cfg);
        let stop_after_rise = pos.stop_loss_price;
        assert!(stop_after_rise >= stop_after_peak);
        let exit = pos.on_tick(101.0, 2, &cfg); // pull back, stop must not relax
        assert!(pos.stop_loss_price >= stop_after_rise);
        // price 101.0 still above the (now higher) trailing stop, so no exit yet.
        if let Some(reason) = exit {
            assert_eq!(reason, ExitReason::TrailingStop);
        }
    }

    #[test]
    fn take_profit_converts_to_trailing_instead_of_selling() {
        let cfg = Config::default();
        let mut pos = Position::open(100.0, 0, 1.0, 100.0, None, &cfg);
        let exit = pos.on_tick(100.0 * (1.0 + cfg.take_profit_target), 0, &cfg);
        assert!(exit.is_none());
        assert!(pos.trailing_active);
    }

    #[test]
    fn max_holding_time_forces_time_exit() {
        let cfg = Config::default();
        let mut pos = Position::open(100.0, 0, 1.0, 100.0, None, &cfg);
        let exit = pos.on_tick(100.0, cfg.max_holding_time_secs as i64, &cfg);
        assert_eq!(exit, Some(ExitReason::TimeExit));
    }

    #[test]
    fn stop_loss_before_trailing_activation_exits_as_stop_loss() {
        let cfg = Config::default();
        let mut pos = Position::open(100.0, 0, 1.0, 100.0, None, &cfg);
        let crash_price = pos.stop_loss_price - 0.01;
        let exit = pos.on_tick(crash_price, 0, &cfg);
        assert_eq!(exit, Some(ExitReason::StopLoss));
    }

    #[test]
    fn fee_accounted_profit_on_close() {
        let cfg = Config::default();
        let pos = Position::open(100.0, 0, 10.0, 1000.0, None, &cfg);
        let outcome = close(&pos, 102.0, ExitReason::TrailingStop, &cfg);
        let buy_value = 1000.0;
        let sell_value = 1020.0;
        let fee = (buy_value + sell_value) * cfg.trading_fee_rate;
        let expected = sell_value - buy_value - fee;
        assert!((outcome.profit - expected).abs() < 1e-9);
    }
}
