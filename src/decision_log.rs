// =============================================================================
// DecisionLog — bounded in-memory audit trail of entry verdicts
// =============================================================================
//
// Every call into `EntryPolicy` produces one record here (allow or the
// blocking reason), so a running engine can be asked "why didn't it buy?"
// without re-deriving the gate chain. Executed trades themselves are
// durably logged by `persistence::append_trade_log`; this is the
// lighter-weight verdict trail for decisions that never became an order.

use std::collections::VecDeque;

use parking_lot::Mutex;

const DEFAULT_CAPACITY: usize = 500;

#[derive(Debug, Clone, PartialEq)]
pub struct DecisionRecord {
    pub instrument: String,
    pub timestamp: i64,
    pub approved: bool,
    pub reason: Option<String>,
}

pub struct DecisionLog {
    capacity: usize,
    records: Mutex<VecDeque<DecisionRecord>>,
}

impl DecisionLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity, records: Mutex::new(VecDeque::with_capacity(capacity)) }
    }

    pub fn record(&self, instrument: &str, timestamp: i64, verdict: Option<&str>) {
        let mut records = self.records.lock();
        records.push_back(DecisionRecord {
            instrument: instrument.to_string(),
            timestamp,
            approved: verdict.is_none(),
            reason: verdict.map(str::to_string),
        });
        while records.len() > self.capacity {
            records.pop_front();
        }
    }

    /// Most recent records for `instrument`, newest first.
    pub fn recent_for(&self, instrument: &str, count: usize) -> Vec<DecisionRecord> {
        self.records.lock().iter().rev().filter(|r| r.instrument == instrument).take(count).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DecisionLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_approval_and_block_distinctly() {
        let log = DecisionLog::new();
        log.record("BTC-USDT", 1, None);
        log.record("BTC-USDT", 2, Some("RSI overbought"));
        let recent = log.recent_for("BTC-USDT", 10);
        assert_eq!(recent.len(), 2);
        assert!(!recent[0].approved);
        assert!(recent[1].approved);
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let log = DecisionLog::with_capacity(3);
        for i in 0..5 {
            log.record("BTC-USDT", i, None);
        }
        assert_eq!(log.len(), 3);
        let recent = log.recent_for("BTC-USDT", 10);
        assert_eq!(recent[0].timestamp, 4);
        assert_eq!(recent[2].timestamp, 2);
    }

    #[test]
    fn filters_by_instrument() {
        let log = DecisionLog::new();
        log.record("BTC-USDT", 1, None);
        log.record("ETH-USDT", 2, None);
        assert_eq!(log.recent_for("BTC-USDT", 10).len(), 1);
    }
}
