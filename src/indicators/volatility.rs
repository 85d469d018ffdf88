// =============================================================================
// Volatility — coefficient of variation over the last 20 prices
// =============================================================================
//
// volatility = sample_stdev(last 20 prices) / mean(last 20 prices)
//
// Undefined (treated as 0) below 20 samples.
// =============================================================================

const VOLATILITY_WINDOW: usize = 20;

/// Compute volatility from the tail of `prices` (oldest first). Returns 0.0
/// when fewer than 20 samples are available.
pub fn calculate_volatility(prices: &[f64]) -> f64 {
    if prices.len() < VOLATILITY_WINDOW {
        return 0.0;
    }

    let window = &prices[prices.len() - VOLATILITY_WINDOW..];
    let mean = window.iter().sum::<f64>() / VOLATILITY_WINDOW as f64;
    if mean == 0.0 {
        return 0.0;
    }

    let variance = window.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / (VOLATILITY_WINDOW - 1) as f64;
    let stdev = variance.sqrt();

    let vol = stdev / mean;
    if vol.is_finite() {
        vol
    } else {
        0.0
    }
}
