// =============================================================================
// Config — immutable, environment-sourced engine configuration
// =============================================================================
//
// Built once at startup from `.env` + process environment and handed to every
// component by value at construction. Not hot-reloadable: a live PATCH
// surface for mutating config belongs to an out-of-scope front-end, not this
// engine (see DESIGN.md).
// =============================================================================

use tracing::info;

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_markets(key: &str) -> Vec<String> {
    std::env::var(key)
        .ok()
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Immutable engine configuration, built once from the environment at
/// process start.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Order sizing ---
    pub max_investment: f64,
    pub min_order_amount: f64,
    pub trading_fee_rate: f64,

    // --- 1-minute momentum ---
    pub momentum_window: usize,
    pub momentum_threshold: f64,
    pub min_signal_strength: f64,
    pub volume_spike_ratio: f64,
    pub consecutive_up_candles: usize,
    pub breakout_velocity: f64,

    // --- 1-second momentum ---
    pub second_momentum_window: usize,
    pub second_momentum_threshold: f64,
    pub second_rapid_rise_threshold: f64,
    pub use_second_candles: bool,

    // --- MTF ---
    pub mtf_enabled: bool,
    pub mtf_5m_min_candles: usize,
    pub mtf_15m_min_candles: usize,
    pub mtf_5m_trend_threshold: f64,
    pub mtf_15m_trend_threshold: f64,
    pub mtf_5m_early_stage_max: f64,
    pub mtf_max_1m_change: f64,
    pub mtf_volume_confirmation: f64,
    pub mtf_strict_mode: bool,

    // --- Macro trend ---
    pub macro_min_change_rate: f64,
    pub macro_bullish_threshold: f64,
    pub macro_update_interval_secs: u64,

    // --- Long-term bear filter ---
    pub long_term_filter_enabled: bool,
    pub daily_bearish_threshold: f64,
    pub h4_bearish_threshold: f64,
    pub ignore_short_squeeze_in_downtrend: bool,

    // --- V-reversal ---
    pub v_reversal_enabled: bool,
    pub v_reversal_min_drop: f64,
    pub v_reversal_min_rise: f64,
    pub volatility_max_stddev: f64,

    // --- Stop-loss / trailing / take-profit ---
    pub initial_stop_loss: f64,
    pub dynamic_stop_loss_min: f64,
    pub dynamic_stop_loss_max: f64,
    pub break_even_trigger: f64,
    pub trailing_stop_activation: f64,
    pub trailing_stop_distance: f64,
    pub trailing_min_profit: f64,
    pub take_profit_target: f64,
    pub max_holding_time_secs: u64,

    // --- Trade frequency / cooldowns ---
    pub max_trades_per_hour: u32,
    pub cool_down_after_loss_secs: u64,
    pub consecutive_loss_cooldown_secs: u64,

    // --- BTC reference gate ---
    pub btc_trend_threshold: f64,
    pub btc_bullish_threshold: f64,
    pub btc_check_interval_secs: u64,
    pub btc_downtrend_buy_block: bool,

    // --- Market discovery ---
    pub markets: Vec<String>,
    pub top_market_count: u32,
    pub market_update_interval_secs: u64,
    pub dry_run: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_investment: 100_000.0,
            min_order_amount: 5_000.0,
            trading_fee_rate: 0.0005,

            momentum_window: 20,
            momentum_threshold: 0.015,
            min_signal_strength: 75.0,
            volume_spike_ratio: 3.0,
            consecutive_up_candles: 6,
            breakout_velocity: 0.0015,

            second_momentum_window: 15,
            second_momentum_threshold: 0.002,
            second_rapid_rise_threshold: 0.006,
            use_second_candles: true,

            mtf_enabled: true,
            mtf_5m_min_candles: 24,
            mtf_15m_min_candles: 12,
            mtf_5m_trend_threshold: 0.002,
            mtf_15m_trend_threshold: 0.002,
            mtf_5m_early_stage_max: 0.02,
            mtf_max_1m_change: 0.03,
            mtf_volume_confirmation: 1.5,
            mtf_strict_mode: false,

            macro_min_change_rate: -0.015,
            macro_bullish_threshold: 0.015,
            macro_update_interval_secs: 60,

            long_term_filter_enabled: true,
            daily_bearish_threshold: -0.02,
            h4_bearish_threshold: -0.005,
            ignore_short_squeeze_in_downtrend: true,

            v_reversal_enabled: true,
            v_reversal_min_drop: -0.003,
            v_reversal_min_rise: 0.002,
            volatility_max_stddev: 0.008,

            initial_stop_loss: 0.020,
            dynamic_stop_loss_min: 0.015,
            dynamic_stop_loss_max: 0.025,
            break_even_trigger: 0.006,
            trailing_stop_activation: 0.008,
            trailing_stop_distance: 0.004,
            trailing_min_profit: 0.003,
            take_profit_target: 0.025,
            max_holding_time_secs: 21_600,

            max_trades_per_hour: 20,
            cool_down_after_loss_secs: 600,
            consecutive_loss_cooldown_secs: 1_200,

            btc_trend_threshold: 0.0,
            btc_bullish_threshold: 0.0,
            btc_check_interval_secs: 60,
            btc_downtrend_buy_block: true,

            markets: Vec::new(),
            top_market_count: 20,
            market_update_interval_secs: 600,
            dry_run: true,
        }
    }
}

impl Config {
    /// Build configuration from the process environment, falling back to
    /// spec-documented defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let cfg = Self {
            max_investment: env_f64("MAX_INVESTMENT", defaults.max_investment),
            min_order_amount: env_f64("MIN_ORDER_AMOUNT", defaults.min_order_amount),
            trading_fee_rate: env_f64("TRADING_FEE_RATE", defaults.trading_fee_rate),

            momentum_window: env_u32("MOMENTUM_WINDOW", defaults.momentum_window as u32) as usize,
            momentum_threshold: env_f64("MOMENTUM_THRESHOLD", defaults.momentum_threshold),
            min_signal_strength: env_f64("MIN_SIGNAL_STRENGTH", defaults.min_signal_strength),
            volume_spike_ratio: env_f64("VOLUME_SPIKE_RATIO", defaults.volume_spike_ratio),
            consecutive_up_candles: env_u32(
                "CONSECUTIVE_UP_CANDLES",
                defaults.consecutive_up_candles as u32,
            ) as usize,
            breakout_velocity: env_f64("BREAKOUT_VELOCITY", defaults.breakout_velocity),

            second_momentum_window: env_u32(
                "SECOND_MOMENTUM_WINDOW",
                defaults.second_momentum_window as u32,
            ) as usize,
            second_momentum_threshold: env_f64(
                "SECOND_MOMENTUM_THRESHOLD",
                defaults.second_momentum_threshold,
            ),
            second_rapid_rise_threshold: env_f64(
                "SECOND_RAPID_RISE_THRESHOLD",
                defaults.second_rapid_rise_threshold,
            ),
            use_second_candles: env_bool("USE_SECOND_CANDLES", defaults.use_second_candles),

            mtf_enabled: env_bool("MTF_ENABLED", defaults.mtf_enabled),
            mtf_5m_min_candles: env_u32("MTF_5M_MIN_CANDLES", defaults.mtf_5m_min_candles as u32)
                as usize,
            mtf_15m_min_candles: env_u32(
                "MTF_15M_MIN_CANDLES",
                defaults.mtf_15m_min_candles as u32,
            ) as usize,
            mtf_5m_trend_threshold: env_f64(
                "MTF_5M_TREND_THRESHOLD",
                defaults.mtf_5m_trend_threshold,
            ),
            mtf_15m_trend_threshold: env_f64(
                "MTF_15M_TREND_THRESHOLD",
                defaults.mtf_15m_trend_threshold,
            ),
            mtf_5m_early_stage_max: env_f64(
                "MTF_5M_EARLY_STAGE_MAX",
                defaults.mtf_5m_early_stage_max,
            ),
            mtf_max_1m_change: env_f64("MTF_MAX_1M_CHANGE", defaults.mtf_max_1m_change),
            mtf_volume_confirmation: env_f64(
                "MTF_VOLUME_CONFIRMATION",
                defaults.mtf_volume_confirmation,
            ),
            mtf_strict_mode: env_bool("MTF_STRICT_MODE", defaults.mtf_strict_mode),

            macro_min_change_rate: env_f64("MACRO_MIN_CHANGE_RATE", defaults.macro_min_change_rate),
            macro_bullish_threshold: env_f64(
                "MACRO_BULLISH_THRESHOLD",
                defaults.macro_bullish_threshold,
            ),
            macro_update_interval_secs: env_u64(
                "MACRO_UPDATE_INTERVAL",
                defaults.macro_update_interval_secs,
            ),

            long_term_filter_enabled: env_bool(
                "LONG_TERM_FILTER_ENABLED",
                defaults.long_term_filter_enabled,
            ),
            daily_bearish_threshold: env_f64(
                "DAILY_BEARISH_THRESHOLD",
                defaults.daily_bearish_threshold,
            ),
            h4_bearish_threshold: env_f64("H4_BEARISH_THRESHOLD", defaults.h4_bearish_threshold),
            ignore_short_squeeze_in_downtrend: env_bool(
                "IGNORE_SHORT_SQUEEZE_IN_DOWNTREND",
                defaults.ignore_short_squeeze_in_downtrend,
            ),

            v_reversal_enabled: env_bool("V_REVERSAL_ENABLED", defaults.v_reversal_enabled),
            v_reversal_min_drop: env_f64("V_REVERSAL_MIN_DROP", defaults.v_reversal_min_drop),
            v_reversal_min_rise: env_f64("V_REVERSAL_MIN_RISE", defaults.v_reversal_min_rise),
            volatility_max_stddev: env_f64(
                "VOLATILITY_MAX_STDDEV",
                defaults.volatility_max_stddev,
            ),

            initial_stop_loss: env_f64("INITIAL_STOP_LOSS", defaults.initial_stop_loss),
            dynamic_stop_loss_min: env_f64(
                "DYNAMIC_STOP_LOSS_MIN",
                defaults.dynamic_stop_loss_min,
            ),
            dynamic_stop_loss_max: env_f64(
                "DYNAMIC_STOP_LOSS_MAX",
                defaults.dynamic_stop_loss_max,
            ),
            break_even_trigger: env_f64("BREAK_EVEN_TRIGGER", defaults.break_even_trigger),
            trailing_stop_activation: env_f64(
                "TRAILING_STOP_ACTIVATION",
                defaults.trailing_stop_activation,
            ),
            trailing_stop_distance: env_f64(
                "TRAILING_STOP_DISTANCE",
                defaults.trailing_stop_distance,
            ),
            trailing_min_profit: env_f64("TRAILING_MIN_PROFIT", defaults.trailing_min_profit),
            take_profit_target: env_f64("TAKE_PROFIT_TARGET", defaults.take_profit_target),
            max_holding_time_secs: env_u64(
                "MAX_HOLDING_TIME",
                defaults.max_holding_time_secs,
            ),

            max_trades_per_hour: env_u32("MAX_TRADES_PER_HOUR", defaults.max_trades_per_hour),
            cool_down_after_loss_secs: env_u64(
                "COOL_DOWN_AFTER_LOSS",
                defaults.cool_down_after_loss_secs,
            ),
            consecutive_loss_cooldown_secs: env_u64(
                "CONSECUTIVE_LOSS_COOLDOWN",
                defaults.consecutive_loss_cooldown_secs,
            ),

            btc_trend_threshold: env_f64("BTC_TREND_THRESHOLD", defaults.btc_trend_threshold),
            btc_bullish_threshold: env_f64(
                "BTC_BULLISH_THRESHOLD",
                defaults.btc_bullish_threshold,
            ),
            btc_check_interval_secs: env_u64(
                "BTC_CHECK_INTERVAL",
                defaults.btc_check_interval_secs,
            ),
            btc_downtrend_buy_block: env_bool(
                "BTC_DOWNTREND_BUY_BLOCK",
                defaults.btc_downtrend_buy_block,
            ),

            markets: {
                let m = env_markets("MARKET");
                if m.is_empty() { defaults.markets.clone() } else { m }
            },
            top_market_count: env_u32("TOP_MARKET_COUNT", defaults.top_market_count),
            market_update_interval_secs: env_u64(
                "MARKET_UPDATE_INTERVAL",
                defaults.market_update_interval_secs,
            ),
            dry_run: env_bool("DRY_RUN", defaults.dry_run),
        };

        info!(
            dry_run = cfg.dry_run,
            markets = ?cfg.markets,
            auto_discovery = cfg.markets.is_empty(),
            "configuration loaded"
        );

        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let cfg = Config::default();
        assert_eq!(cfg.momentum_window, 20);
        assert!((cfg.momentum_threshold - 0.015).abs() < 1e-12);
        assert!((cfg.min_signal_strength - 75.0).abs() < 1e-12);
        assert!((cfg.trailing_stop_distance - 0.004).abs() < 1e-12);
        assert_eq!(cfg.max_holding_time_secs, 21_600);
        assert_eq!(cfg.consecutive_loss_cooldown_secs, 1_200);
        assert!(cfg.dry_run, "DRY_RUN defaults to true for safety");
    }

    #[test]
    fn empty_market_env_triggers_auto_discovery() {
        assert!(env_markets("MOMENTUM_ENGINE_TEST_UNSET_MARKET_VAR").is_empty());
    }
}
