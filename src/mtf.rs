// =============================================================================
// MTFEvaluator — 5m/15m stage classification, volume confirmation,
// downtrend-rebound gate
// =============================================================================

use tracing::debug;

use crate::config::Config;
use crate::indicators::moving_average::{disparity, simple_moving_average};
use crate::types::{Candle, Stage, Trend};

const VOLUME_LOOKBACK: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct MTFResult {
    pub valid_entry: bool,
    pub stage: Stage,
    pub trend_5m: Trend,
    pub trend_15m: Trend,
    pub change_5m: f64,
    pub change_15m: f64,
    pub volume_confirmed: bool,
    pub reasons: Vec<String>,
    pub warnings: Vec<String>,
}

fn windowed_change(closes: &[f64], window: usize) -> f64 {
    if closes.len() < 2 {
        return 0.0;
    }
    let n = window.min(closes.len() - 1);
    let last = closes[closes.len() - 1];
    let prior = closes[closes.len() - 1 - n];
    if prior.abs() > f64::EPSILON {
        (last - prior) / prior
    } else {
        0.0
    }
}

fn classify_trend(change: f64, threshold: f64) -> Trend {
    if change >= threshold {
        Trend::Bullish
    } else if change <= -threshold {
        Trend::Bearish
    } else {
        Trend::Neutral
    }
}

/// Dead-cat-bounce volume check: last candle's volume against the average of
/// the previous 3.
fn volume_confirmed_recent(candles: &[Candle]) -> bool {
    if candles.len() <= VOLUME_LOOKBACK {
        return false;
    }
    let last_volume = candles.last().unwrap().volume;
    let prev = &candles[candles.len() - 1 - VOLUME_LOOKBACK..candles.len() - 1];
    let avg_prev = prev.iter().map(|c| c.volume).sum::<f64>() / prev.len() as f64;
    avg_prev > 0.0 && last_volume >= 1.5 * avg_prev
}

/// Uptrend volume confirmation: last candle's volume against the average of
/// the rest of the window.
fn volume_confirmed_window(candles: &[Candle]) -> bool {
    if candles.len() < 2 {
        return false;
    }
    let last_volume = candles.last().unwrap().volume;
    let prev = &candles[..candles.len() - 1];
    let avg_prev = prev.iter().map(|c| c.volume).sum::<f64>() / prev.len() as f64;
    avg_prev > 0.0 && last_volume >= 1.5 * avg_prev
}

fn last_n_bearish(candles: &[Candle], n: usize) -> bool {
    candles.len() >= n && candles[candles.len() - n..].iter().all(|c| !c.is_bullish())
}

/// Evaluate multi-timeframe entry validity for one instrument.
pub fn evaluate(instrument: &str, macro_trend: Trend, m5_candles: &[Candle], m15_candles: &[Candle], cfg: &Config) -> MTFResult {
    if macro_trend == Trend::Bearish {
        return MTFResult {
            valid_entry: false,
            stage: Stage::Unknown,
            trend_5m: Trend::Bearish,
            trend_15m: Trend::Neutral,
            change_5m: 0.0,
            change_15m: 0.0,
            volume_confirmed: false,
            reasons: vec!["macro trend bearish".to_string()],
            warnings: Vec::new(),
        };
    }

    let mut reasons = Vec::new();
    let mut warnings = Vec::new();

    if m5_candles.len() < cfg.mtf_5m_min_candles {
        warnings.push(format!(
            "only {} M5 candles (< {})",
            m5_candles.len(),
            cfg.mtf_5m_min_candles
        ));
    }

    let m5_closes: Vec<f64> = m5_candles.iter().map(|c| c.close).collect();
    let ma15 = simple_moving_average(&m5_closes, 15);
    let ma50 = simple_moving_average(&m5_closes, 50);
    let price = m5_closes.last().copied().unwrap_or(0.0);

    let change_5m = windowed_change(&m5_closes, cfg.mtf_5m_min_candles);
    let m15_closes: Vec<f64> = m15_candles.iter().map(|c| c.close).collect();
    let change_15m = windowed_change(&m15_closes, cfg.mtf_15m_min_candles);
    let trend_15m = classify_trend(change_15m, cfg.mtf_15m_trend_threshold);

    let is_downtrend = matches!((ma15, ma50), (Some(a), Some(b)) if a < b);

    let (stage, trend_5m, vol_confirmed) = if is_downtrend {
        let ma15 = ma15.unwrap();
        let disp = disparity(price, ma15).unwrap_or(0.0);
        let last_bullish = m5_candles.last().map(Candle::is_bullish).unwrap_or(false);
        let vol_confirmed = volume_confirmed_recent(m5_candles);
        let rebound_ok = disp < -0.015 && last_bullish && vol_confirmed;
        if !rebound_ok {
            reasons.push("downtrend rebound conditions not met".to_string());
        }
        (Stage::Unknown, Trend::Bearish, vol_confirmed)
    } else {
        let stage = if change_5m >= 0.02 {
            reasons.push(format!("late stage, change_5m {change_5m:.4} >= 0.02"));
            Stage::Late
        } else if change_5m >= 0.008 {
            Stage::Mid
        } else if change_5m >= cfg.mtf_5m_trend_threshold {
            Stage::Early
        } else {
            Stage::Neutral
        };

        let vol_confirmed = volume_confirmed_window(m5_candles);

        if trend_15m == Trend::Bearish && cfg.mtf_strict_mode {
            reasons.push("M15 bearish in strict mode".to_string());
        }

        if last_n_bearish(m5_candles, 3) {
            reasons.push("three consecutive bearish M5 candles".to_string());
        }

        (stage, classify_trend(change_5m, cfg.mtf_5m_trend_threshold), vol_confirmed)
    };

    let valid_entry = reasons.is_empty();

    debug!(
        instrument,
        valid_entry,
        stage = %stage,
        change_5m,
        change_15m,
        volume_confirmed = vol_confirmed,
        reasons = ?reasons,
        "MTF evaluation"
    );

    MTFResult {
        valid_entry,
        stage,
        trend_5m,
        trend_15m,
        change_5m,
        change_15m,
        volume_confirmed: vol_confirmed,
        reasons,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(close: f64, open: f64, volume: f64) -> Candle {
        Candle { open_time: 0, open, high: close.max(open), low: close.min(open), close, volume }
    }

    fn bullish_series(n: usize, start: f64, step: f64) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let close = start + step * i as f64;
                candle(close, close - 0.01, 10.0)
            })
            .collect()
    }

    #[test]
    fn macro_bearish_forces_invalid_entry() {
        let cfg = Config::default();
        let m5 = bullish_series(30, 100.0, 0.1);
        let m15 = bullish_series(15, 100.0, 0.1);
        let result = evaluate("TEST", Trend::Bearish, &m5, &m15, &cfg);
        assert!(!result.valid_entry);
    }

    #[test]
    fn stage_late_rejection() {
        let cfg = Config::default();
        // 24-candle window change_5m = 0.025 (>= 0.02 => Late).
        let mut m5 = bullish_series(30, 100.0, 0.0);
        let n = m5.len();
        m5[n - 1 - cfg.mtf_5m_min_candles].close = 100.0;
        m5[n - 1].close = 102.5;
        let m15 = bullish_series(15, 100.0, 0.1);
        let result = evaluate("TEST", Trend::Bullish, &m5, &m15, &cfg);
        assert_eq!(result.stage, Stage::Late);
        assert!(!result.valid_entry);
    }

    #[test]
    fn three_bearish_candles_reject() {
        let cfg = Config::default();
        let mut m5 = bullish_series(30, 100.0, 0.1);
        let n = m5.len();
        for c in &mut m5[n - 3..] {
            c.open = c.close + 1.0; // bearish: close < open
        }
        let m15 = bullish_series(15, 100.0, 0.1);
        let result = evaluate("TEST", Trend::Bullish, &m5, &m15, &cfg);
        assert!(!result.valid_entry);
    }

    #[test]
    fn insufficient_m5_candles_warns_not_rejects() {
        let cfg = Config::default();
        let m5 = bullish_series(5, 100.0, 0.1);
        let m15 = bullish_series(15, 100.0, 0.1);
        let result = evaluate("TEST", Trend::Bullish, &m5, &m15, &cfg);
        assert!(!result.warnings.is_empty());
    }

    #[test]
    fn volume_confirmation_detects_spike_recent() {
        let mut m5 = bullish_series(30, 100.0, 0.1);
        let n = m5.len();
        m5[n - 1].volume = 100.0; // 10x the flat 10.0 baseline
        assert!(volume_confirmed_recent(&m5));
    }

    #[test]
    fn volume_confirmation_detects_spike_window() {
        let mut m5 = bullish_series(30, 100.0, 0.1);
        let n = m5.len();
        m5[n - 1].volume = 100.0; // 10x the flat 10.0 baseline over the whole window
        assert!(volume_confirmed_window(&m5));
    }
}
