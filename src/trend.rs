// =============================================================================
// TrendAnalyzer — macro trend scoring, long-term bear filter, V-reversal
// =============================================================================
//
// Stateless: every call takes the close-price series it needs and returns a
// fresh `TrendResult`. Mirrors the hierarchy-of-rules style of
// `regime::detector` and `htf_analysis::analyze` — plain functions over
// slices, no persistent analyzer state.

use tracing::debug;

use crate::config::Config;
use crate::types::Trend;

/// M30/H1/H4/D1/D3 deltas are derived by looking back N candles in the M5
/// series rather than maintaining separate rolling windows for each.
const M30_LOOKBACK_M5: usize = 7;
const H1_LOOKBACK_M5: usize = 13;
const H4_LOOKBACK_M5: usize = 48;
const D1_LOOKBACK_M5: usize = 288;
const D3_LOOKBACK_M5: usize = 576;

/// V-reversal context window and per-candle move cap (not independently
/// configurable — spec ties them to the "3-hour downtrend context" shape).
const V_REVERSAL_CONTEXT_CANDLES: usize = 12;
const V_REVERSAL_DROP_FROM_HIGH: f64 = 0.015;
const V_REVERSAL_MAX_SINGLE_MOVE: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendResult {
    pub trend: Trend,
    pub score: f64,
    pub m5_delta: f64,
    pub m15_delta: f64,
    pub h4_delta: f64,
    pub daily1d_delta: f64,
    pub daily3d_delta: f64,
    pub can_trade: bool,
    pub long_term_bearish: bool,
    pub strong_short_momentum: bool,
    pub buy_pressure: f64,
    pub fatigue: f64,
}

fn delta_back(closes: &[f64], n: usize) -> f64 {
    if closes.len() <= n || n == 0 {
        return 0.0;
    }
    let last = closes[closes.len() - 1];
    let prior = closes[closes.len() - 1 - n];
    if prior.abs() > f64::EPSILON {
        (last - prior) / prior
    } else {
        0.0
    }
}

/// Sample standard deviation (divisor n-1), matching the reference
/// statistics library this was ported from.
fn stdev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

fn returns(closes: &[f64]) -> Vec<f64> {
    closes
        .windows(2)
        .map(|w| if w[0].abs() > f64::EPSILON { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect()
}

/// 3-hour downtrend context + 2-leg rebound check on the most recent 5 M1
/// returns (first two legs down, last two legs up; the middle leg is not
/// constrained).
fn v_reversal_detected(m15_closes: &[f64], current_price: f64, m1_returns: &[f64], cfg: &Config) -> bool {
    if m15_closes.len() < V_REVERSAL_CONTEXT_CANDLES || m1_returns.len() < 5 {
        return false;
    }
    let window = &m15_closes[m15_closes.len() - V_REVERSAL_CONTEXT_CANDLES..];
    let high = window.iter().cloned().fold(f64::MIN, f64::max);
    if high <= 0.0 {
        return false;
    }
    let drop_from_high = (high - current_price) / high;
    if drop_from_high < V_REVERSAL_DROP_FROM_HIGH {
        return false;
    }
    for w in window.windows(2) {
        let mv = if w[0].abs() > f64::EPSILON { (w[1] - w[0]) / w[0] } else { 0.0 };
        if mv > V_REVERSAL_MAX_SINGLE_MOVE {
            return false;
        }
    }

    let r = &m1_returns[m1_returns.len() - 5..];
    let first_two = r[0] + r[1];
    let last_two = r[3] + r[4];
    first_two <= cfg.v_reversal_min_drop && last_two >= cfg.v_reversal_min_rise
}

fn strong_short_momentum(
    m5_delta: f64,
    h4_delta: f64,
    m1_closes: &[f64],
    m15_closes: &[f64],
    current_price: f64,
    bid_pressure_1m: f64,
    fatigue: f64,
    cfg: &Config,
) -> bool {
    if !cfg.v_reversal_enabled {
        return false;
    }
    if m5_delta < 0.015 || h4_delta <= 0.0 || bid_pressure_1m < 0.55 || fatigue > 40.0 {
        return false;
    }

    let m1_returns = returns(m1_closes);
    if m1_returns.len() < 5 {
        return false;
    }
    let last5 = &m1_returns[m1_returns.len() - 5..];
    let up_count = last5.iter().filter(|&&r| r > 0.0).count();
    if up_count < 3 {
        return false;
    }
    if stdev(last5) > cfg.volatility_max_stddev {
        return false;
    }

    v_reversal_detected(m15_closes, current_price, &m1_returns, cfg)
}

/// Compute the full macro trend picture for one instrument.
pub fn analyze(
    instrument: &str,
    m1_closes: &[f64],
    m5_closes: &[f64],
    m15_closes: &[f64],
    current_price: f64,
    bid_pressure_1m: f64,
    fatigue: f64,
    cfg: &Config,
) -> TrendResult {
    let m5_delta = delta_back(m5_closes, 1);
    let m15_delta = delta_back(m15_closes, 1);
    let m30_delta = delta_back(m5_closes, M30_LOOKBACK_M5);
    let h1_delta = delta_back(m5_closes, H1_LOOKBACK_M5);
    let h4_delta = delta_back(m5_closes, H4_LOOKBACK_M5);
    let daily1d_delta = delta_back(m5_closes, D1_LOOKBACK_M5);
    let daily3d_delta = delta_back(m5_closes, D3_LOOKBACK_M5);

    let score = 0.20 * m15_delta + 0.15 * m30_delta + 0.20 * h1_delta + 0.25 * h4_delta + 0.20 * daily1d_delta;

    let raw_long_term_bearish = cfg.long_term_filter_enabled
        && (daily3d_delta <= cfg.daily_bearish_threshold || h4_delta <= cfg.h4_bearish_threshold);

    let strong_short = strong_short_momentum(
        m5_delta,
        h4_delta,
        m1_closes,
        m15_closes,
        current_price,
        bid_pressure_1m,
        fatigue,
        cfg,
    );

    let long_term_bearish = raw_long_term_bearish && !strong_short;
    let short_squeeze = m15_delta >= 0.015;

    let (trend, can_trade, block_reason) = if long_term_bearish {
        let reason = if daily3d_delta <= cfg.daily_bearish_threshold {
            format!("3-day drop {daily3d_delta:.4} <= threshold {:.4}", cfg.daily_bearish_threshold)
        } else {
            format!("4h drop {h4_delta:.4} <= threshold {:.4}", cfg.h4_bearish_threshold)
        };
        let suppressed = if cfg.ignore_short_squeeze_in_downtrend && short_squeeze {
            format!("{reason} (short squeeze signal suppressed in downtrend)")
        } else {
            reason
        };
        (Trend::Bearish, false, Some(suppressed))
    } else if score < cfg.macro_min_change_rate && !short_squeeze {
        (Trend::Bearish, false, Some(format!("macro score {score:.4} below {:.4}", cfg.macro_min_change_rate)))
    } else if score > cfg.macro_bullish_threshold || short_squeeze {
        (Trend::Bullish, true, None)
    } else {
        (Trend::Neutral, true, None)
    };

    debug!(
        instrument,
        trend = %trend,
        score,
        m5_delta,
        m15_delta,
        h4_delta,
        daily3d_delta,
        long_term_bearish,
        strong_short_momentum = strong_short,
        block_reason = block_reason.as_deref().unwrap_or(""),
        "trend analysis"
    );

    TrendResult {
        trend,
        score,
        m5_delta,
        m15_delta,
        h4_delta,
        daily1d_delta,
        daily3d_delta,
        can_trade,
        long_term_bearish,
        strong_short_momentum: strong_short,
        buy_pressure: bid_pressure_1m,
        fatigue,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_series(len: usize, start: f64, step: f64) -> Vec<f64> {
        (0..len).map(|i| start + step * i as f64).collect()
    }

    #[test]
    fn bear_filter_blocks_short_squeeze() {
        let cfg = Config::default();
        // Build an m5 series whose 48-back and 576-back deltas match the
        // scenario's H4Δ=-0.010 and D3Δ=-0.025, with M15Δ=+0.020 via a
        // separate m15 series.
        let mut m5 = flat_series(600, 100.0, 0.0);
        let last = m5.len() - 1;
        m5[last - H4_LOOKBACK_M5] = 100.0 / (1.0 - 0.010);
        m5[last - D3_LOOKBACK_M5] = 100.0 / (1.0 - 0.025);
        m5[last] = 100.0;

        let m15 = {
            let mut v = flat_series(20, 100.0, 0.0);
            let l = v.len() - 1;
            v[l - 1] = 100.0 / (1.0 + 0.020);
            v[l] = 100.0;
            v
        };
        let m1 = flat_series(30, 100.0, 0.0);

        let result = analyze("TEST", &m1, &m5, &m15, 100.0, 0.5, 50.0, &cfg);
        assert_eq!(result.trend, Trend::Bearish);
        assert!(!result.can_trade);
        assert!(result.long_term_bearish);
    }

    #[test]
    fn strong_short_exception_passes() {
        let cfg = Config::default();
        // H4Δ=+0.003 (not triggering the bear filter by itself) but craft a
        // D3 drop so the filter WOULD fire without the exception.
        let mut m5 = flat_series(600, 100.0, 0.0);
        let last = m5.len() - 1;
        m5[last - H4_LOOKBACK_M5] = 100.0 / (1.0 + 0.003);
        m5[last - D3_LOOKBACK_M5] = 100.0 / (1.0 - 0.025); // triggers daily_bearish_threshold
        m5[last - 1] = 100.0 / (1.0 + 0.018); // m5_delta = +0.018
        m5[last] = 100.0;

        // 12 M15 candles forming the 3-hour downtrend context: current price
        // is 1.6% below the window high, no single move exceeds +1%.
        let m15 = {
            let mut v = vec![100.0; 12];
            v[0] = 101.7; // window high
            v
        };
        // Five M1 returns: [-0.0020, -0.0020, +0.0010, +0.0015, +0.0015].
        // First two legs sum to -0.0040 (<= v_reversal_min_drop), last two
        // sum to +0.0030 (>= v_reversal_min_rise), 3 of 5 are up, and their
        // stdev is far below volatility_max_stddev.
        let c0 = 100.0;
        let c1 = c0 * (1.0 - 0.0020);
        let c2 = c1 * (1.0 - 0.0020);
        let c3 = c2 * (1.0 + 0.0010);
        let c4 = c3 * (1.0 + 0.0015);
        let c5 = c4 * (1.0 + 0.0015);
        let m1_closes = vec![c0, c1, c2, c3, c4, c5];
        let current_price = c5;

        let result = analyze("TEST", &m1_closes, &m5, &m15, current_price, 0.60, 30.0, &cfg);
        assert!(result.strong_short_momentum);
        assert!(!result.long_term_bearish, "exception must bypass the raw bear filter");
    }

    #[test]
    fn neutral_when_score_between_thresholds() {
        let cfg = Config::default();
        let m5 = flat_series(600, 100.0, 0.0);
        let m15 = flat_series(20, 100.0, 0.0);
        let m1 = flat_series(30, 100.0, 0.0);
        let result = analyze("TEST", &m1, &m5, &m15, 100.0, 0.5, 20.0, &cfg);
        assert_eq!(result.trend, Trend::Neutral);
        assert!(result.can_trade);
    }

    #[test]
    fn bullish_on_short_squeeze_alone() {
        let cfg = Config::default();
        let m5 = flat_series(600, 100.0, 0.0);
        let mut m15 = flat_series(20, 100.0, 0.0);
        let l = m15.len() - 1;
        m15[l - 1] = 100.0 / 1.02;
        let result = analyze("TEST", &flat_series(30, 100.0, 0.0), &m5, &m15, 100.0, 0.5, 20.0, &cfg);
        assert_eq!(result.trend, Trend::Bullish);
    }

    #[test]
    fn delta_back_guards_insufficient_history() {
        assert_eq!(delta_back(&[100.0, 101.0], 10), 0.0);
    }

    #[test]
    fn delta_back_guards_zero_denominator() {
        assert_eq!(delta_back(&[0.0, 5.0], 1), 0.0);
    }
}
