// =============================================================================
// SentimentEngine — additive 0-100 market sentiment score
// =============================================================================
//
// A single pure function over already-computed indicator inputs, structured
// `tracing` output, no internal state of its own.

use tracing::trace;

use crate::types::Trend;

#[derive(Debug, Clone, PartialEq)]
pub struct SentimentResult {
    pub score: f64,
    pub sentiment: Trend,
    pub sell_pressure: f64,
    pub reasons: Vec<String>,
}

pub struct SentimentEngine;

impl SentimentEngine {
    /// Score sentiment from 0 (maximally bearish) to 100 (maximally bullish).
    ///
    /// `buy_ratio` is bid volume over (bid + ask) volume in [0, 1];
    /// `orderbook_imbalance` is in [-1, 1]; `rsi` is in [0, 100].
    pub fn evaluate(
        buy_ratio: f64,
        orderbook_imbalance: f64,
        rsi: f64,
        fatigue: f64,
        momentum_exhaustion: bool,
        volatility: f64,
    ) -> SentimentResult {
        let mut score = 50.0_f64;
        let mut reasons = Vec::new();

        if buy_ratio >= 0.65 {
            score += 15.0;
            reasons.push("bid pressure dominant".to_string());
        } else if buy_ratio >= 0.55 {
            score += 8.0;
            reasons.push("bid pressure leaning".to_string());
        } else if buy_ratio <= 0.35 {
            score -= 15.0;
            reasons.push("ask pressure dominant".to_string());
        } else if buy_ratio <= 0.45 {
            score -= 8.0;
            reasons.push("ask pressure leaning".to_string());
        }

        if orderbook_imbalance >= 0.3 {
            score += 10.0;
            reasons.push("orderbook imbalance bullish".to_string());
        } else if orderbook_imbalance <= -0.3 {
            score -= 10.0;
            reasons.push("orderbook imbalance bearish".to_string());
        }

        if rsi >= 80.0 {
            score -= 20.0;
            reasons.push("RSI overbought >= 80".to_string());
        } else if rsi >= 70.0 {
            score -= 10.0;
            reasons.push("RSI elevated >= 70".to_string());
        } else if rsi <= 20.0 {
            score += 15.0;
            reasons.push("RSI oversold <= 20".to_string());
        } else if rsi <= 30.0 {
            score += 8.0;
            reasons.push("RSI depressed <= 30".to_string());
        }

        if fatigue >= 60.0 {
            score -= 25.0;
            reasons.push("fatigue >= 60".to_string());
        } else if fatigue >= 40.0 {
            score -= 12.0;
            reasons.push("fatigue >= 40".to_string());
        }

        if momentum_exhaustion {
            score -= 15.0;
            reasons.push("momentum exhaustion detected".to_string());
        }

        if volatility >= 0.02 {
            score -= 5.0;
            reasons.push("volatility >= 0.02".to_string());
        }

        score = score.clamp(0.0, 100.0);
        let sell_pressure = 1.0 - buy_ratio;

        let sentiment = if score >= 65.0 {
            Trend::Bullish
        } else if score <= 35.0 {
            Trend::Bearish
        } else {
            Trend::Neutral
        };

        trace!(
            score = format!("{:.2}", score),
            sentiment = %sentiment,
            sell_pressure = format!("{:.4}", sell_pressure),
            reasons = ?reasons,
            "sentiment evaluated"
        );

        SentimentResult { score, sentiment, sell_pressure, reasons }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_inputs_stay_neutral() {
        let result = SentimentEngine::evaluate(0.5, 0.0, 50.0, 10.0, false, 0.005);
        assert_eq!(result.score, 50.0);
        assert_eq!(result.sentiment, Trend::Neutral);
    }

    #[test]
    fn overbought_and_fatigued_is_bearish() {
        let result = SentimentEngine::evaluate(0.5, 0.0, 85.0, 65.0, false, 0.005);
        // 50 - 20 (RSI>=80) - 25 (fatigue>=60) = 5
        assert_eq!(result.score, 5.0);
        assert_eq!(result.sentiment, Trend::Bearish);
    }

    #[test]
    fn oversold_with_bid_pressure_is_bullish() {
        let result = SentimentEngine::evaluate(0.65, 0.35, 18.0, 5.0, false, 0.005);
        // 50 + 15 (bid pressure >= 0.65) + 10 (imbalance) + 15 (RSI<=20) = 90
        assert_eq!(result.score, 90.0);
        assert_eq!(result.sentiment, Trend::Bullish);
    }

    #[test]
    fn score_clamps_at_zero() {
        let result = SentimentEngine::evaluate(0.1, -0.5, 90.0, 70.0, true, 0.03);
        assert_eq!(result.score, 0.0);
        assert_eq!(result.sentiment, Trend::Bearish);
    }

    #[test]
    fn sell_pressure_is_complement_of_buy_ratio() {
        let result = SentimentEngine::evaluate(0.3, 0.0, 50.0, 0.0, false, 0.0);
        assert!((result.sell_pressure - 0.7).abs() < 1e-12);
    }
}
