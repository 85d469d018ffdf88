// =============================================================================
// Shared types used across the momentum trading engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Balance snapshot for a single asset from the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceInfo {
    pub asset: String,
    #[serde(default)]
    pub free: f64,
    #[serde(default)]
    pub locked: f64,
}

/// Whether the engine is actively trading, paused, or killed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingMode {
    Live,
    Paused,
    Killed,
}

impl Default for TradingMode {
    fn default() -> Self {
        Self::Paused
    }
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "Live"),
            Self::Paused => write!(f, "Paused"),
            Self::Killed => write!(f, "Killed"),
        }
    }
}

/// Whether we are running against real funds or simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountMode {
    Demo,
    Live,
}

impl Default for AccountMode {
    fn default() -> Self {
        Self::Demo
    }
}

impl std::fmt::Display for AccountMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Demo => write!(f, "Demo"),
            Self::Live => write!(f, "Live"),
        }
    }
}

// -----------------------------------------------------------------------------
// Instrument / candle / tick model
// -----------------------------------------------------------------------------

/// Opaque market identifier, e.g. `"BTCUSDT"`. The whole engine is indexed by
/// instrument; every analyzer component is parameterized by one.
pub type Instrument = String;

/// Candle timeframe tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    S1,
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
}

impl Timeframe {
    /// Ring capacity mandated by the data model.
    pub fn ring_capacity(self) -> usize {
        match self {
            Timeframe::S1 => 120,
            Timeframe::M1 => 200,
            Timeframe::M5 => 600,
            Timeframe::M15 => 400,
            Timeframe::M30 => 200,
            Timeframe::H1 => 200,
            Timeframe::H4 => 48,
            Timeframe::D1 => 10,
        }
    }

    /// Minutes spanned by one candle of this timeframe; used for gap
    /// detection when reconciling REST backfill against live candles. S1
    /// is sub-minute so gap math is disabled for it.
    pub fn minutes(self) -> i64 {
        match self {
            Timeframe::S1 => 0,
            Timeframe::M1 => 1,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H4 => 240,
            Timeframe::D1 => 1440,
        }
    }

    /// Exchange-facing interval string used by the REST/WS adapters.
    pub fn wire_code(self) -> &'static str {
        match self {
            Timeframe::S1 => "1s",
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    /// Parse a `candle.{interval}` WS topic suffix back into a timeframe.
    pub fn from_wire_code(code: &str) -> Option<Self> {
        match code {
            "1s" => Some(Timeframe::S1),
            "1m" => Some(Timeframe::M1),
            "5m" => Some(Timeframe::M5),
            "15m" => Some(Timeframe::M15),
            "30m" => Some(Timeframe::M30),
            "1h" | "60m" => Some(Timeframe::H1),
            "4h" | "240m" => Some(Timeframe::H4),
            "1d" | "day" => Some(Timeframe::D1),
            _ => None,
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.wire_code())
    }
}

/// A single OHLCV candle. Candles for a given (instrument, timeframe) are
/// totally ordered by `open_time` and stored in a bounded ring — see
/// `market_data::candle_store::CandleStore`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }
}

/// Aggressor side of an executed trade tick. `Bid` denotes a market-buy-side
/// execution (the taker bought).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
}

/// A single executed trade tick. Bounded ring of 500 per instrument.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TradeTick {
    pub timestamp_ms: i64,
    pub price: f64,
    pub volume: f64,
    pub side: Side,
    pub sequence_id: u64,
}

/// One price level pair contributing to an orderbook snapshot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OrderBookUnit {
    pub ask_price: f64,
    pub bid_price: f64,
    pub ask_size: f64,
    pub bid_size: f64,
}

/// Market trend classification produced by the trend analyzer and consumed
/// by the sentiment engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    Bullish,
    Neutral,
    Bearish,
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trend::Bullish => write!(f, "Bullish"),
            Trend::Neutral => write!(f, "Neutral"),
            Trend::Bearish => write!(f, "Bearish"),
        }
    }
}

/// Multi-timeframe stage classification of an up-move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Early,
    Mid,
    Late,
    Neutral,
    Unknown,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Early => write!(f, "Early"),
            Stage::Mid => write!(f, "Mid"),
            Stage::Late => write!(f, "Late"),
            Stage::Neutral => write!(f, "Neutral"),
            Stage::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Order side sent to the exchange adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}
