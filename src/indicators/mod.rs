// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free implementations of the core technical indicators used
// by the trading engine.  Every public function returns `Option<T>` so callers
// are forced to handle insufficient-data and numerical-edge-case scenarios.

pub mod fatigue;
pub mod moving_average;
pub mod rsi;
pub mod volatility;

/// Snapshot of every derived indicator for one instrument, refreshed on
/// trade-tick arrival (RSI/volatility/fatigue/pressure) and on M5 candle
/// close (moving averages).
#[derive(Debug, Clone, Copy, Default)]
pub struct IndicatorsBlock {
    pub rsi: f64,
    pub volatility: f64,
    pub fatigue: f64,
    pub momentum_exhaustion: bool,
    pub ma15: f64,
    pub ma50: f64,
    pub disparity: f64,
    pub bid_volume_1m: f64,
    pub ask_volume_1m: f64,
    pub bid_volume_5m: f64,
    pub ask_volume_5m: f64,
}

impl IndicatorsBlock {
    /// Ratio of ask volume within the combined 1-minute bid+ask window, used
    /// by the fatigue sell-pressure term and by MomentumDetector's gates.
    pub fn ask_ratio_1m(&self) -> f64 {
        let total = self.bid_volume_1m + self.ask_volume_1m;
        if total <= 0.0 {
            0.5
        } else {
            self.ask_volume_1m / total
        }
    }

    /// Ratio of bid volume within the combined 1-minute window.
    pub fn bid_ratio_1m(&self) -> f64 {
        1.0 - self.ask_ratio_1m()
    }

    /// Ratio of bid volume within the combined 5-minute window.
    pub fn bid_ratio_5m(&self) -> f64 {
        let total = self.bid_volume_5m + self.ask_volume_5m;
        if total <= 0.0 {
            0.5
        } else {
            self.bid_volume_5m / total
        }
    }
}
