// =============================================================================
// MomentumDetector — 1m/1s momentum signals, MTF/orderbook gated combination
// =============================================================================
//
// Strength is additive from weighted sub-scores, capped at 100. The exact
// per-component weights are this implementation's own resolution of an
// unspecified detail — see DESIGN.md.

use tracing::debug;

use crate::config::Config;
use crate::mtf::MTFResult;
use crate::types::{Candle, Trend};

#[derive(Debug, Clone, PartialEq)]
pub struct MomentumResult {
    pub signal: bool,
    pub strength: f64,
    pub minute_signal: bool,
    pub second_signal: bool,
    pub rapid_rise: bool,
    pub mtf_valid: bool,
    pub mtf_stage: crate::types::Stage,
    pub mtf_blocked: bool,
    pub reason: String,
}

struct MinuteSignal {
    fires: bool,
    price_change: f64,
    strength: f64,
}

fn minute_signal(m1: &[Candle], bid_ask_size_ratio: f64, cfg: &Config) -> MinuteSignal {
    let n = cfg.momentum_window.min(m1.len());
    if n < 4 {
        return MinuteSignal { fires: false, price_change: 0.0, strength: 0.0 };
    }
    let window = &m1[m1.len() - n..];
    let open0 = window[0].open;
    let price = window.last().unwrap().close;
    let price_change = if open0.abs() > f64::EPSILON { (price - open0) / open0 } else { 0.0 };

    let open_3_back = window[window.len() - 3].open;
    let velocity_pct = if open_3_back.abs() > f64::EPSILON {
        ((price - open_3_back) / open_3_back) / 3.0
    } else {
        0.0
    };

    let mean_volume = window.iter().map(|c| c.volume).sum::<f64>() / window.len() as f64;
    let last_volume = window.last().unwrap().volume;
    let volume_ratio = if mean_volume > 0.0 { last_volume / mean_volume } else { 0.0 };

    let mut consecutive_up = 0usize;
    for c in window.iter().rev() {
        if c.is_bullish() {
            consecutive_up += 1;
        } else {
            break;
        }
    }

    let fires = price_change >= cfg.momentum_threshold
        && (volume_ratio >= cfg.volume_spike_ratio
            || velocity_pct >= cfg.breakout_velocity
            || consecutive_up >= cfg.consecutive_up_candles)
        && bid_ask_size_ratio >= 0.8;

    let strength = if fires {
        let price_component = (price_change / cfg.momentum_threshold * 40.0).min(40.0);
        let volume_component = (volume_ratio / cfg.volume_spike_ratio * 30.0).min(30.0);
        let velocity_component = (velocity_pct / cfg.breakout_velocity * 20.0).min(20.0);
        let streak_component = (consecutive_up as f64 / cfg.consecutive_up_candles as f64 * 10.0).min(10.0);
        (price_component + volume_component + velocity_component + streak_component).min(100.0)
    } else {
        0.0
    };

    MinuteSignal { fires, price_change, strength }
}

struct SecondSignal {
    fires: bool,
    rapid_rise: bool,
    strength: f64,
}

fn second_signal(s1: &[Candle], cfg: &Config) -> SecondSignal {
    let n = cfg.second_momentum_window.min(s1.len());
    if n < 2 {
        return SecondSignal { fires: false, rapid_rise: false, strength: 0.0 };
    }
    let window = &s1[s1.len() - n..];
    let open0 = window[0].open;
    let price = window.last().unwrap().close;
    let price_change = if open0.abs() > f64::EPSILON { (price - open0) / open0 } else { 0.0 };

    let mean_volume = window.iter().map(|c| c.volume).sum::<f64>() / window.len() as f64;
    let last_volume = window.last().unwrap().volume;
    let volume_ratio = if mean_volume > 0.0 { last_volume / mean_volume } else { 0.0 };

    let prev = window[window.len() - 2].close;
    let last_return = if prev.abs() > f64::EPSILON { (price - prev) / prev } else { 0.0 };

    let momentum_ok = price_change >= cfg.second_momentum_threshold;
    let volume_ok = volume_ratio >= cfg.volume_spike_ratio;
    let rapid_rise = last_return >= cfg.second_rapid_rise_threshold;

    let fires = (momentum_ok && volume_ok) || rapid_rise;

    let momentum_component = if momentum_ok { (price_change / cfg.second_momentum_threshold * 50.0).min(50.0) } else { 0.0 };
    let volume_component = if volume_ok { (volume_ratio / cfg.volume_spike_ratio * 30.0).min(30.0) } else { 0.0 };
    let rapid_component = if rapid_rise { (last_return / cfg.second_rapid_rise_threshold * 20.0).min(20.0) } else { 0.0 };
    let strength = (momentum_component + volume_component + rapid_component).min(100.0);

    SecondSignal { fires, rapid_rise, strength: if fires { strength } else { 0.0 } }
}

fn m5_returns(m5: &[Candle]) -> Option<(f64, f64)> {
    if m5.len() < 3 {
        return None;
    }
    let c = &m5[m5.len() - 3..];
    let prev = if c[0].close.abs() > f64::EPSILON { (c[1].close - c[0].close) / c[0].close } else { 0.0 };
    let last = if c[1].close.abs() > f64::EPSILON { (c[2].close - c[1].close) / c[1].close } else { 0.0 };
    Some((prev, last))
}

fn last_minute_change(m1: &[Candle]) -> f64 {
    if m1.len() < 2 {
        return 0.0;
    }
    let a = m1[m1.len() - 2].close;
    let b = m1[m1.len() - 1].close;
    if a.abs() > f64::EPSILON { (b - a) / a } else { 0.0 }
}

/// Detect a combined momentum entry signal for one instrument.
#[allow(clippy::too_many_arguments)]
pub fn detect(
    instrument: &str,
    m1_candles: &[Candle],
    s1_candles: &[Candle],
    m5_candles: &[Candle],
    bid_ask_size_ratio: f64,
    orderbook_imbalance: f64,
    bid_volume_ratio_5m: f64,
    mtf: &MTFResult,
    cfg: &Config,
) -> MomentumResult {
    if orderbook_imbalance <= -0.3 {
        return MomentumResult {
            signal: false,
            strength: 0.0,
            minute_signal: false,
            second_signal: false,
            rapid_rise: false,
            mtf_valid: mtf.valid_entry,
            mtf_stage: mtf.stage,
            mtf_blocked: false,
            reason: "wall of asks: orderbook imbalance too negative".to_string(),
        };
    }

    let m1 = minute_signal(m1_candles, bid_ask_size_ratio, cfg);
    let s1 = second_signal(s1_candles, cfg);

    let mtf_confirmed = mtf.trend_5m == Trend::Bullish || mtf.trend_15m == Trend::Bullish;

    let (mut signal, mut strength, mut reason) = if m1.fires && s1.fires {
        (true, (0.6 * m1.strength + 0.4 * s1.strength).min(100.0), "1m + 1s combined signal".to_string())
    } else if s1.rapid_rise && !(m1.fires) {
        if m1.price_change >= 0.9 * cfg.momentum_threshold {
            let strength = if mtf_confirmed { s1.strength } else { s1.strength * 0.5 };
            (true, strength, "rapid 1s rise confirmed by 1m price action".to_string())
        } else {
            (false, 0.0, "rapid rise without sufficient 1m confirmation".to_string())
        }
    } else if m1.fires {
        (true, m1.strength * 0.8, "1m signal only".to_string())
    } else {
        let trend_ok = matches!(mtf.trend_5m, Trend::Bullish | Trend::Neutral) && matches!(mtf.trend_15m, Trend::Bullish | Trend::Neutral);
        if trend_ok && bid_volume_ratio_5m >= 0.55 && last_minute_change(m1_candles) >= 0.003 {
            (true, 60.0, "trend-following fallback".to_string())
        } else {
            (false, 0.0, "no momentum signal fired".to_string())
        }
    };

    let mut mtf_blocked = false;

    if signal {
        if mtf.trend_5m == Trend::Bearish {
            signal = false;
            strength = 0.0;
            mtf_blocked = true;
            reason = "mtf 5m trend bearish".to_string();
        }
    }

    if signal {
        if let Some((prev_m5, last_m5)) = m5_returns(m5_candles) {
            if prev_m5 > 0.003 && last_m5 < 0.5 * prev_m5 {
                signal = false;
                strength = 0.0;
                reason = "M5 momentum fading".to_string();
            }
        }
    }

    if signal && m1.price_change >= 0.03 {
        signal = false;
        strength = 0.0;
        reason = "parabolic M1 move, too late".to_string();
    }

    if signal && !mtf.valid_entry {
        signal = false;
        strength = 0.0;
        mtf_blocked = true;
        reason = "MTF entry invalid".to_string();
    }

    if signal {
        use crate::types::Stage;
        match mtf.stage {
            Stage::Neutral | Stage::Unknown => {
                if strength < 80.0 {
                    signal = false;
                    strength = 0.0;
                    reason = "stage neutral/unknown below strength floor".to_string();
                }
            }
            Stage::Early => {
                strength = (strength * 1.2).min(100.0);
            }
            Stage::Mid => {
                strength *= 0.85;
                if strength < 90.0 {
                    signal = false;
                    strength = 0.0;
                    reason = "mid stage below strength floor".to_string();
                }
            }
            Stage::Late => {
                signal = false;
                strength = 0.0;
                mtf_blocked = true;
                reason = "late stage, move exhausted".to_string();
            }
        }
    }

    if signal {
        if mtf.volume_confirmed {
            strength = (strength + 10.0).min(100.0);
        }
        if mtf.trend_15m == Trend::Bullish {
            strength = (strength + 5.0).min(100.0);
        }
        if mtf.trend_15m == Trend::Bearish && cfg.mtf_strict_mode {
            signal = false;
            strength = 0.0;
            mtf_blocked = true;
            reason = "M15 bearish in strict mode".to_string();
        }
    }

    if signal && strength < cfg.min_signal_strength {
        signal = false;
        strength = 0.0;
        reason = format!("strength below {:.1} floor", cfg.min_signal_strength);
    }

    debug!(
        instrument,
        signal,
        strength,
        minute_signal = m1.fires,
        second_signal = s1.fires,
        rapid_rise = s1.rapid_rise,
        reason,
        "momentum detection"
    );

    MomentumResult {
        signal,
        strength,
        minute_signal: m1.fires,
        second_signal: s1.fires,
        rapid_rise: s1.rapid_rise,
        mtf_valid: mtf.valid_entry,
        mtf_stage: mtf.stage,
        mtf_blocked,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Stage;

    fn candle(close: f64, open: f64, volume: f64) -> Candle {
        Candle { open_time: 0, open, high: close.max(open), low: close.min(open), close, volume }
    }

    fn bullish_m1(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let open = 100.0 + i as f64 * 0.3;
                candle(open + 0.3, open, 10.0)
            })
            .collect()
    }

    /// 1m series whose 20-candle window price_change (~2%) clears
    /// `momentum_threshold` but stays well under the 3% parabolic cutoff,
    /// firing via a volume spike on the final candle.
    fn moderate_bullish_m1(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let open = 100.0 + i as f64 * 0.1;
                let volume = if i == n - 1 { 50.0 } else { 10.0 };
                candle(open + 0.1, open, volume)
            })
            .collect()
    }

    fn confirming_mtf() -> MTFResult {
        MTFResult {
            valid_entry: true,
            stage: Stage::Mid,
            trend_5m: Trend::Bullish,
            trend_15m: Trend::Bullish,
            change_5m: 0.01,
            change_15m: 0.01,
            volume_confirmed: true,
            reasons: Vec::new(),
            warnings: Vec::new(),
        }
    }

    #[test]
    fn imbalance_below_threshold_always_rejects() {
        let cfg = Config::default();
        let m1 = bullish_m1(25);
        let s1 = bullish_m1(20);
        let m5 = bullish_m1(10);
        let mtf = confirming_mtf();
        let result = detect("TEST", &m1, &s1, &m5, 1.0, -0.31, 0.6, &mtf, &cfg);
        assert!(!result.signal);
        assert_eq!(result.strength, 0.0);
    }

    #[test]
    fn stage_late_rejection() {
        let cfg = Config::default();
        let m1 = moderate_bullish_m1(25);
        let s1 = bullish_m1(20);
        let m5 = bullish_m1(10);
        let mut mtf = confirming_mtf();
        mtf.stage = Stage::Late;
        let result = detect("TEST", &m1, &s1, &m5, 1.0, 0.0, 0.6, &mtf, &cfg);
        assert!(!result.signal);
        assert!(result.mtf_blocked);
    }

    #[test]
    fn parabolic_m1_rejects_regardless_of_strength() {
        let cfg = Config::default();
        // price_change of 0.035 over the 20-candle window.
        let n = 25;
        let mut m1 = Vec::with_capacity(n);
        for i in 0..n {
            let open = 100.0;
            let close = if i == n - 1 { 103.5 } else { 100.0 };
            m1.push(candle(close, open, 10.0));
        }
        let s1 = bullish_m1(20);
        let m5 = bullish_m1(10);
        let mtf = confirming_mtf();
        let result = detect("TEST", &m1, &s1, &m5, 1.0, 0.0, 0.6, &mtf, &cfg);
        assert!(!result.signal);
    }

    #[test]
    fn m5_fading_momentum_rejects() {
        let cfg = Config::default();
        let m1 = bullish_m1(25);
        let s1 = bullish_m1(20);
        // prev_m5_return = +0.004, last_m5_return = +0.001 (< half of prev).
        let m5 = vec![candle(100.0, 99.5, 10.0), candle(100.4, 100.0, 10.0), candle(100.5, 100.4, 10.0)];
        let mtf = confirming_mtf();
        let result = detect("TEST", &m1, &s1, &m5, 1.0, 0.0, 0.6, &mtf, &cfg);
        assert!(!result.signal);
    }

    #[test]
    fn mtf_invalid_entry_rejects() {
        let cfg = Config::default();
        let m1 = moderate_bullish_m1(25);
        let s1 = bullish_m1(20);
        let m5 = bullish_m1(10);
        let mut mtf = confirming_mtf();
        mtf.valid_entry = false;
        let result = detect("TEST", &m1, &s1, &m5, 1.0, 0.0, 0.6, &mtf, &cfg);
        assert!(!result.signal);
        assert!(result.mtf_blocked);
    }
}
