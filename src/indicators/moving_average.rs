// =============================================================================
// Simple moving average + disparity
// =============================================================================

/// Simple moving average over the last `period` closes (oldest-first slice).
/// `None` when there is not enough data.
pub fn simple_moving_average(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period {
        return None;
    }
    let window = &closes[closes.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// `(price - ma) / ma`, the percentage distance of price above/below a
/// moving average. `None` if `ma` is zero or undefined.
pub fn disparity(price: f64, ma: f64) -> Option<f64> {
    if ma == 0.0 {
        None
    } else {
        Some((price - ma) / ma)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_data_is_none() {
        assert!(simple_moving_average(&[1.0, 2.0], 5).is_none());
    }

    #[test]
    fn basic_average() {
        let closes = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(simple_moving_average(&closes, 5), Some(3.0));
    }

    #[test]
    fn uses_tail_window() {
        let closes = vec![100.0, 1.0, 2.0, 3.0];
        assert_eq!(simple_moving_average(&closes, 3), Some(2.0));
    }

    #[test]
    fn disparity_above_and_below() {
        assert_eq!(disparity(110.0, 100.0), Some(0.1));
        assert_eq!(disparity(90.0, 100.0), Some(-0.1));
        assert!(disparity(100.0, 0.0).is_none());
    }
}
