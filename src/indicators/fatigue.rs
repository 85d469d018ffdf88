// =============================================================================
// Fatigue — composite 0-100 score estimating exhaustion of a recent up-move
// =============================================================================
//
// fatigue = rate_fatigue + rsi_fatigue + volume_fatigue + sell_pressure,
// clamped to [0, 100]. Components:
//
//   rate_fatigue   = min(100, |delta_5m| * 1000)
//   rsi_fatigue    = 0                      for rsi < 70
//                    (rsi - 70) * 3          for 70 <= rsi < 80
//                    30 + (rsi - 80) * 5     for rsi >= 80
//   volume_fatigue = 20 when last-minute volume < 0.5 * previous-minute volume
//                    (also flags momentum_exhaustion)
//   sell_pressure  = (ask_ratio - 0.5) * 100 when ask_ratio > 0.6, else 0
// =============================================================================

/// Result of a fatigue computation: the clamped score plus whether the
/// volume-collapse exhaustion flag fired.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FatigueResult {
    pub fatigue: f64,
    pub momentum_exhaustion: bool,
}

pub fn calculate_fatigue(
    delta_5m: f64,
    rsi: f64,
    last_minute_volume: f64,
    previous_minute_volume: f64,
    ask_ratio: f64,
) -> FatigueResult {
    let rate_fatigue = (delta_5m.abs() * 1000.0).min(100.0);

    let rsi_fatigue = if rsi >= 80.0 {
        30.0 + (rsi - 80.0) * 5.0
    } else if rsi >= 70.0 {
        (rsi - 70.0) * 3.0
    } else {
        0.0
    };

    let momentum_exhaustion = previous_minute_volume > 0.0 && last_minute_volume < 0.5 * previous_minute_volume;
    let volume_fatigue = if momentum_exhaustion { 20.0 } else { 0.0 };

    let sell_pressure = if ask_ratio > 0.6 {
        (ask_ratio - 0.5) * 100.0
    } else {
        0.0
    };

    let total = (rate_fatigue + rsi_fatigue + volume_fatigue + sell_pressure).clamp(0.0, 100.0);

    FatigueResult {
        fatigue: total,
        momentum_exhaustion,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_market_has_zero_fatigue() {
        let r = calculate_fatigue(0.0, 50.0, 100.0, 100.0, 0.5);
        assert_eq!(r.fatigue, 0.0);
        assert!(!r.momentum_exhaustion);
    }

    #[test]
    fn rsi_tier_below_70_contributes_nothing() {
        let r = calculate_fatigue(0.0, 69.9, 100.0, 100.0, 0.5);
        assert_eq!(r.fatigue, 0.0);
    }

    #[test]
    fn rsi_tier_70_to_80() {
        // rsi=75 => (75-70)*3 = 15
        let r = calculate_fatigue(0.0, 75.0, 100.0, 100.0, 0.5);
        assert!((r.fatigue - 15.0).abs() < 1e-9);
    }

    #[test]
    fn rsi_tier_above_80() {
        // rsi=90 => 30 + (90-80)*5 = 80
        let r = calculate_fatigue(0.0, 90.0, 100.0, 100.0, 0.5);
        assert!((r.fatigue - 80.0).abs() < 1e-9);
    }

    #[test]
    fn volume_collapse_sets_exhaustion_flag() {
        let r = calculate_fatigue(0.0, 50.0, 40.0, 100.0, 0.5);
        assert!(r.momentum_exhaustion);
        assert_eq!(r.fatigue, 20.0);
    }

    #[test]
    fn sell_pressure_only_above_threshold() {
        let below = calculate_fatigue(0.0, 50.0, 100.0, 100.0, 0.6);
        assert_eq!(below.fatigue, 0.0);

        let above = calculate_fatigue(0.0, 50.0, 100.0, 100.0, 0.8);
        assert!((above.fatigue - 30.0).abs() < 1e-9); // (0.8-0.5)*100
    }

    #[test]
    fn clamped_to_100() {
        let r = calculate_fatigue(0.1, 95.0, 10.0, 100.0, 0.9);
        assert_eq!(r.fatigue, 100.0);
    }
}
