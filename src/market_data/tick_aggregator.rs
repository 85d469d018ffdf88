// =============================================================================
// Tick Aggregator — trade tape ring + time-windowed bid/ask volume sums
// =============================================================================
//
// On each trade tick: push into the ring (capacity 500), then re-derive the
// 1-minute/5-minute bid/ask volume sums by re-scanning the ring with a cutoff
// of `tick_time - 60_000` / `tick_time - 300_000` milliseconds. The cutoff
// uses the arriving tick's own timestamp rather than wall-clock time, so a
// burst of backlogged ticks aggregates consistently regardless of when the
// process happens to observe them — see DESIGN.md.
// =============================================================================

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::types::{Side, TradeTick};

const RING_CAPACITY: usize = 500;
const WINDOW_1M_MS: i64 = 60_000;
const WINDOW_5M_MS: i64 = 300_000;

/// Bid/ask volume sums and counts over the 1-minute and 5-minute windows,
/// recomputed on every tick arrival.
#[derive(Debug, Clone, Copy, Default)]
pub struct VolumeWindows {
    pub bid_volume_1m: f64,
    pub ask_volume_1m: f64,
    pub bid_volume_5m: f64,
    pub ask_volume_5m: f64,
    pub bid_count_1m: u64,
    pub ask_count_1m: u64,
}

pub struct TickAggregator {
    ticks: RwLock<VecDeque<TradeTick>>,
    windows: RwLock<VolumeWindows>,
    next_sequence: AtomicU64,
}

impl TickAggregator {
    pub fn new() -> Self {
        Self {
            ticks: RwLock::new(VecDeque::with_capacity(RING_CAPACITY + 1)),
            windows: RwLock::new(VolumeWindows::default()),
            next_sequence: AtomicU64::new(1),
        }
    }

    /// Push a new trade tick and recompute the windowed aggregates.
    pub fn push_tick(&self, timestamp_ms: i64, price: f64, volume: f64, side: Side) {
        let sequence_id = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let tick = TradeTick {
            timestamp_ms,
            price,
            volume,
            side,
            sequence_id,
        };

        let mut ring = self.ticks.write();
        ring.push_back(tick);
        while ring.len() > RING_CAPACITY {
            ring.pop_front();
        }

        let windows = Self::recompute(&ring, timestamp_ms);
        *self.windows.write() = windows;
    }

    /// Re-scan the ring from scratch using `now_ms` (the arriving tick's own
    /// timestamp) as the aggregation cutoff reference. O(ring) per tick,
    /// acceptable at ring size 500 per spec.
    fn recompute(ring: &VecDeque<TradeTick>, now_ms: i64) -> VolumeWindows {
        let cutoff_1m = now_ms - WINDOW_1M_MS;
        let cutoff_5m = now_ms - WINDOW_5M_MS;

        let mut w = VolumeWindows::default();
        for tick in ring.iter() {
            if tick.timestamp_ms >= cutoff_5m {
                match tick.side {
                    Side::Bid => w.bid_volume_5m += tick.volume,
                    Side::Ask => w.ask_volume_5m += tick.volume,
                }
            }
            if tick.timestamp_ms >= cutoff_1m {
                match tick.side {
                    Side::Bid => {
                        w.bid_volume_1m += tick.volume;
                        w.bid_count_1m += 1;
                    }
                    Side::Ask => {
                        w.ask_volume_1m += tick.volume;
                        w.ask_count_1m += 1;
                    }
                }
            }
        }
        w
    }

    pub fn windows(&self) -> VolumeWindows {
        *self.windows.read()
    }

    /// Last `n` trade prices, oldest-first, used by RSI/volatility.
    pub fn last_n_prices(&self, n: usize) -> Vec<f64> {
        let ring = self.ticks.read();
        let start = ring.len().saturating_sub(n);
        ring.iter().skip(start).map(|t| t.price).collect()
    }

    pub fn last_price(&self) -> Option<f64> {
        self.ticks.read().back().map(|t| t.price)
    }

    pub fn tick_count(&self) -> usize {
        self.ticks.read().len()
    }
}

impl Default for TickAggregator {
    fn default() -> Self {
        Self::new()
    }
}
