// =============================================================================
// Relative Strength Index (RSI) — simplified 14-period snapshot
// =============================================================================
//
// Recomputed fresh on every trade tick from the last up to 14 price deltas
// (not Wilder's exponential smoothing — each call is a standalone snapshot
// over the tail of the trade tape):
//
//   avg_gain = sum(positive deltas) / 14
//   avg_loss = sum(|negative deltas|) / 14      (floored at 0.0001)
//   RSI      = 100 - 100 / (1 + avg_gain/avg_loss)
//
// Special cases: if avg_loss == 0, RSI is 100 when avg_gain > 0, else 50.
// =============================================================================

const RSI_PERIOD: usize = 14;
const MIN_AVG_LOSS: f64 = 0.0001;

/// Compute the current RSI from a slice of recent prices (oldest first).
///
/// Uses up to the last `RSI_PERIOD` deltas between consecutive prices. Fewer
/// than two prices yields `None` (nothing to diff).
pub fn calculate_rsi(prices: &[f64]) -> Option<f64> {
    if prices.len() < 2 {
        return None;
    }

    let deltas: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();
    let window = &deltas[deltas.len().saturating_sub(RSI_PERIOD)..];

    let mut sum_gain = 0.0_f64;
    let mut sum_loss = 0.0_f64;
    for &d in window {
        if d > 0.0 {
            sum_gain += d;
        } else {
            sum_loss += d.abs();
        }
    }

    let period = RSI_PERIOD as f64;
    let avg_gain = sum_gain / period;
    let avg_loss_raw = sum_loss / period;

    if avg_loss_raw == 0.0 {
        return Some(if avg_gain > 0.0 { 100.0 } else { 50.0 });
    }

    let avg_loss = avg_loss_raw.max(MIN_AVG_LOSS);
    let rsi = 100.0 - 100.0 / (1.0 + avg_gain / avg_loss);
    Some(rsi.clamp(0.0, 100.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_data_returns_none() {
        assert!(calculate_rsi(&[]).is_none());
        assert!(calculate_rsi(&[100.0]).is_none());
    }

    #[test]
    fn all_gains_is_100() {
        let prices: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        assert_eq!(calculate_rsi(&prices), Some(100.0));
    }

    #[test]
    fn all_losses_approaches_zero() {
        let prices: Vec<f64> = (1..=20).rev().map(|x| x as f64).collect();
        let rsi = calculate_rsi(&prices).unwrap();
        assert!(rsi < 1.0, "expected near-zero RSI, got {rsi}");
    }

    #[test]
    fn flat_market_is_50() {
        let prices = vec![100.0; 20];
        assert_eq!(calculate_rsi(&prices), Some(50.0));
    }

    #[test]
    fn uses_only_last_14_deltas() {
        // Prepend a huge drop that should be excluded from a 14-delta window.
        let mut prices = vec![1000.0, 1.0];
        prices.extend((1..=15).map(|x| x as f64 + 1.0));
        let rsi = calculate_rsi(&prices).unwrap();
        // The excluded collapse would force RSI near 0; since it's outside the
        // window the ascending tail should still dominate.
        assert!(rsi > 50.0, "expected window to exclude old crash, got {rsi}");
    }

    #[test]
    fn range_check() {
        let prices = vec![
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08, 45.89, 46.03,
            44.18, 44.22, 44.57, 43.42, 42.66, 43.13,
        ];
        let rsi = calculate_rsi(&prices).unwrap();
        assert!((0.0..=100.0).contains(&rsi));
    }
}
