// =============================================================================
// Durable state — candle CSV cache + trade log
// =============================================================================
//
// Per-(instrument, timeframe) candle history is cached under
// `data/<INSTRUMENT>_<TF>.csv`; the trade log is a single append-only
// `logs/trades.csv`. Candle bulk saves overwrite the file; live appends use
// `OpenOptions::append` so concurrent readers never see a half-written row.
// Every write is best-effort: a failure is logged and does not interrupt the
// pipeline.
// =============================================================================

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};
use tracing::{error, warn};

use crate::types::{Candle, Timeframe};

fn candle_csv_path(dir: &Path, instrument: &str, tf: Timeframe) -> PathBuf {
    dir.join(format!("{instrument}_{}.csv", tf.wire_code()))
}

const CANDLE_HEADER: &[&str] = &[
    "candle_date_time_utc",
    "open_time",
    "open",
    "high",
    "low",
    "close",
    "volume",
];

fn candle_to_record(c: &Candle) -> [String; 7] {
    let dt = Utc
        .timestamp_millis_opt(c.open_time)
        .single()
        .map(|d| d.to_rfc3339())
        .unwrap_or_default();
    [
        dt,
        c.open_time.to_string(),
        c.open.to_string(),
        c.high.to_string(),
        c.low.to_string(),
        c.close.to_string(),
        c.volume.to_string(),
    ]
}

fn record_to_candle(record: &csv::StringRecord) -> Option<Candle> {
    Some(Candle {
        open_time: record.get(1)?.parse().ok()?,
        open: record.get(2)?.parse().ok()?,
        high: record.get(3)?.parse().ok()?,
        low: record.get(4)?.parse().ok()?,
        close: record.get(5)?.parse().ok()?,
        volume: record.get(6)?.parse().ok()?,
    })
}

/// Load the full cached candle ring for `(instrument, tf)`. A missing or
/// corrupted file is treated as an empty cache so the caller falls back to a
/// full REST refetch.
pub fn load_candles(dir: &Path, instrument: &str, tf: Timeframe) -> Vec<Candle> {
    let path = candle_csv_path(dir, instrument, tf);
    let mut reader = match csv::ReaderBuilder::new().has_headers(true).from_path(&path) {
        Ok(r) => r,
        Err(_) => return Vec::new(),
    };

    let mut candles = Vec::new();
    for result in reader.records() {
        match result {
            Ok(record) => {
                if let Some(c) = record_to_candle(&record) {
                    candles.push(c);
                } else {
                    warn!(path = %path.display(), "skipping malformed cached candle row");
                }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupted candle cache — treating as empty");
                return Vec::new();
            }
        }
    }
    candles
}

/// Overwrite the cache file with the full `candles` ring (oldest-first).
/// Best-effort: logs and swallows any I/O error.
pub fn save_candles(dir: &Path, instrument: &str, tf: Timeframe, candles: &[Candle]) {
    let path = candle_csv_path(dir, instrument, tf);
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!(path = %parent.display(), error = %e, "failed to create candle cache directory");
            return;
        }
    }

    let result = (|| -> anyhow::Result<()> {
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_path(&path)?;
        writer.write_record(CANDLE_HEADER)?;
        for c in candles {
            writer.write_record(candle_to_record(c))?;
        }
        writer.flush()?;
        Ok(())
    })();

    if let Err(e) = result {
        warn!(path = %path.display(), error = %e, "failed to persist candle cache");
    }
}

/// Append a single live candle to the cache file, creating it (with header)
/// if it does not yet exist. Best-effort.
pub fn append_live_candle(dir: &Path, instrument: &str, tf: Timeframe, candle: &Candle) {
    let path = candle_csv_path(dir, instrument, tf);
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!(path = %parent.display(), error = %e, "failed to create candle cache directory");
            return;
        }
    }

    let file_exists = path.exists();
    let result = (|| -> anyhow::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        if !file_exists {
            writer.write_record(CANDLE_HEADER)?;
        }
        writer.write_record(candle_to_record(candle))?;
        writer.flush()?;
        Ok(())
    })();

    if let Err(e) = result {
        warn!(path = %path.display(), error = %e, "failed to append live candle");
    }
}

// -----------------------------------------------------------------------------
// Trade log
// -----------------------------------------------------------------------------

const TRADE_LOG_HEADER: &[&str] = &[
    "timestamp",
    "market",
    "type",
    "price",
    "trade_value",
    "volume",
    "profit",
    "profit_rate",
    "cumulative_profit",
    "reason",
];

/// One row of the durable trade log, appended once per executed buy/sell.
#[derive(Debug, Clone)]
pub struct TradeLogRow {
    pub timestamp: i64,
    pub market: String,
    pub kind: &'static str, // "BUY" | "SELL"
    pub price: f64,
    pub trade_value: f64,
    pub volume: f64,
    pub profit: f64,
    pub profit_rate: f64,
    pub cumulative_profit: f64,
    pub reason: String,
}

/// Append one row to `logs/trades.csv`, serializing writes through this
/// single function so callers never race on the file.
pub fn append_trade_log(log_dir: &Path, row: &TradeLogRow) {
    let path = log_dir.join("trades.csv");
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            error!(path = %parent.display(), error = %e, "failed to create trade log directory");
            return;
        }
    }

    let file_exists = path.exists();
    let result = (|| -> anyhow::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        if !file_exists {
            writer.write_record(TRADE_LOG_HEADER)?;
        }
        writer.write_record([
            row.timestamp.to_string(),
            row.market.clone(),
            row.kind.to_string(),
            row.price.to_string(),
            row.trade_value.to_string(),
            row.volume.to_string(),
            row.profit.to_string(),
            row.profit_rate.to_string(),
            row.cumulative_profit.to_string(),
            row.reason.clone(),
        ])?;
        writer.flush()?;
        Ok(())
    })();

    if let Err(e) = result {
        error!(path = %path.display(), error = %e, "failed to append trade log row — trade was NOT recorded durably");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile_free_dir::TempDir;

    // Minimal self-contained temp-dir helper so tests don't need an extra
    // dev-dependency.
    mod tempfile_free_dir {
        use std::path::{Path, PathBuf};

        pub struct TempDir(PathBuf);

        impl TempDir {
            pub fn new(label: &str) -> Self {
                let mut p = std::env::temp_dir();
                p.push(format!(
                    "momentum-engine-test-{label}-{}",
                    std::process::id()
                ));
                let _ = std::fs::remove_dir_all(&p);
                std::fs::create_dir_all(&p).unwrap();
                Self(p)
            }
            pub fn path(&self) -> &Path {
                &self.0
            }
        }

        impl Drop for TempDir {
            fn drop(&mut self) {
                let _ = std::fs::remove_dir_all(&self.0);
            }
        }
    }

    fn sample_candle(open_time: i64, close: f64) -> Candle {
        Candle {
            open_time,
            open: close - 1.0,
            high: close + 1.0,
            low: close - 2.0,
            close,
            volume: 10.0,
        }
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = TempDir::new("candles-roundtrip");
        let candles = vec![sample_candle(0, 100.0), sample_candle(60_000, 101.0)];
        save_candles(dir.path(), "BTCUSDT", Timeframe::M1, &candles);

        let loaded = load_candles(dir.path(), "BTCUSDT", Timeframe::M1);
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].open_time, 0);
        assert_eq!(loaded[1].close, 101.0);
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = TempDir::new("candles-missing");
        let loaded = load_candles(dir.path(), "NOPE", Timeframe::M1);
        assert!(loaded.is_empty());
    }

    #[test]
    fn append_live_candle_creates_header_once() {
        let dir = TempDir::new("candles-append");
        append_live_candle(dir.path(), "ETHUSDT", Timeframe::M5, &sample_candle(0, 50.0));
        append_live_candle(dir.path(), "ETHUSDT", Timeframe::M5, &sample_candle(300_000, 51.0));

        let loaded = load_candles(dir.path(), "ETHUSDT", Timeframe::M5);
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn trade_log_appends_with_header() {
        let dir = TempDir::new("trade-log");
        let row = TradeLogRow {
            timestamp: 1_700_000_000,
            market: "BTCUSDT".to_string(),
            kind: "BUY",
            price: 100.0,
            trade_value: 1000.0,
            volume: 10.0,
            profit: 0.0,
            profit_rate: 0.0,
            cumulative_profit: 0.0,
            reason: "entry".to_string(),
        };
        append_trade_log(dir.path(), &row);

        let content = std::fs::read_to_string(dir.path().join("trades.csv")).unwrap();
        assert!(content.starts_with("timestamp,market,type"));
        assert!(content.contains("BTCUSDT"));
    }
}
