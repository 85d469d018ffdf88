// =============================================================================
// CandleStore — six bounded ordered rings per instrument, REST/live reconciliation
// =============================================================================
//
// One `CandleStore` is owned per instrument. Each timeframe's ring is totally
// ordered by `open_time`; a live update whose `open_time` matches the last
// stored candle replaces it in place, otherwise it is appended and the
// oldest evicted once the ring exceeds its declared capacity.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;

use parking_lot::RwLock;
use tracing::warn;

use crate::exchange::ExchangeRest;
use crate::persistence;
use crate::types::{Candle, Timeframe};

pub struct CandleStore {
    rings: RwLock<HashMap<Timeframe, VecDeque<Candle>>>,
}

impl CandleStore {
    pub fn new() -> Self {
        Self {
            rings: RwLock::new(HashMap::new()),
        }
    }

    /// Extend a ring from exchange history. Input order is irrelevant —
    /// candles are merged by `open_time` (idempotent: applying the same
    /// batch twice leaves the ring unchanged modulo ordering) and the result
    /// is truncated to the timeframe's capacity, oldest evicted first.
    pub fn apply_rest_backfill(&self, tf: Timeframe, candles: Vec<Candle>) {
        if candles.is_empty() {
            // REST returned empty — keep local state.
            return;
        }

        let mut rings = self.rings.write();
        let ring = rings.entry(tf).or_insert_with(VecDeque::new);

        let mut merged: BTreeMap<i64, Candle> = ring.iter().map(|c| (c.open_time, *c)).collect();
        for c in candles {
            merged.insert(c.open_time, c);
        }

        let cap = tf.ring_capacity();
        let mut ordered: VecDeque<Candle> = merged.into_values().collect();
        while ordered.len() > cap {
            ordered.pop_front();
        }
        *ring = ordered;
    }

    /// Apply a single live update: replace-in-place if `open_time` matches
    /// the last stored candle, else append and evict the oldest if the ring
    /// is over capacity.
    pub fn apply_live(&self, tf: Timeframe, candle: Candle) {
        let mut rings = self.rings.write();
        let ring = rings.entry(tf).or_insert_with(VecDeque::new);

        match ring.back() {
            Some(last) if last.open_time == candle.open_time => {
                *ring.back_mut().unwrap() = candle;
            }
            Some(last) if candle.open_time < last.open_time => {
                // Out-of-order update — log and drop rather than corrupt ordering.
                warn!(
                    tf = %tf,
                    incoming = candle.open_time,
                    last = last.open_time,
                    "dropping out-of-order live candle"
                );
            }
            _ => {
                ring.push_back(candle);
                let cap = tf.ring_capacity();
                while ring.len() > cap {
                    ring.pop_front();
                }
            }
        }
    }

    /// Seed (or reconcile) a ring at startup: load the durable cache; if
    /// empty, fetch `max_count` candles from REST. Otherwise fetch the
    /// single latest candle and compute the gap against the last cached
    /// candle using exchange-reported timestamps (never wall-clock); if the
    /// gap covers the whole window, refetch fully, otherwise fetch just the
    /// gap (capped at 200) and merge. Always persists back to cache.
    pub async fn smart_init<R: ExchangeRest>(
        &self,
        tf: Timeframe,
        max_count: u32,
        instrument: &str,
        rest: &R,
        cache_dir: &Path,
    ) {
        let local = persistence::load_candles(cache_dir, instrument, tf);
        let had_local = !local.is_empty();
        if !local.is_empty() {
            self.apply_rest_backfill(tf, local.clone());
        }

        if !had_local {
            match rest.candles(tf, &instrument.to_string(), max_count, None).await {
                Ok(mut fetched) => {
                    fetched.reverse(); // collaborator returns descending; we want ascending
                    self.apply_rest_backfill(tf, fetched);
                }
                Err(e) => {
                    warn!(instrument, tf = %tf, error = %e, "smart_init: full fetch failed");
                }
            }
            self.persist(tf, instrument, cache_dir);
            return;
        }

        // S1 gap math is disabled (sub-minute timeframe) — cached data stands.
        if tf.minutes() == 0 {
            self.persist(tf, instrument, cache_dir);
            return;
        }

        let last_local_open_time = local.last().map(|c| c.open_time).unwrap_or(0);

        let latest = match rest.candles(tf, &instrument.to_string(), 1, None).await {
            Ok(v) => v.into_iter().next(),
            Err(e) => {
                warn!(instrument, tf = %tf, error = %e, "smart_init: latest-candle fetch failed");
                None
            }
        };

        let Some(latest) = latest else {
            self.persist(tf, instrument, cache_dir);
            return;
        };

        let gap = (latest.open_time - last_local_open_time) as f64 / tf.minutes() as f64 + 2.0;

        if gap >= max_count as f64 {
            match rest.candles(tf, &instrument.to_string(), max_count, None).await {
                Ok(mut fetched) => {
                    fetched.reverse();
                    self.apply_rest_backfill(tf, fetched);
                }
                Err(e) => {
                    warn!(instrument, tf = %tf, error = %e, "smart_init: gap refetch failed");
                }
            }
        } else {
            let fetch_count = gap.max(0.0).min(200.0) as u32;
            if fetch_count > 0 {
                match rest.candles(tf, &instrument.to_string(), fetch_count, None).await {
                    Ok(mut fetched) => {
                        fetched.reverse();
                        self.apply_rest_backfill(tf, fetched);
                    }
                    Err(e) => {
                        warn!(instrument, tf = %tf, error = %e, "smart_init: gap-fill fetch failed");
                    }
                }
            }
        }

        self.persist(tf, instrument, cache_dir);
    }

    /// Bulk-persist the current ring, overwriting the cache file.
    pub fn persist(&self, tf: Timeframe, instrument: &str, dir: &Path) {
        let candles = self.get_candles(tf, usize::MAX);
        persistence::save_candles(dir, instrument, tf, &candles);
    }

    /// Append a single live candle to the durable cache (best-effort).
    pub fn append_live(&self, tf: Timeframe, instrument: &str, candle: &Candle, dir: &Path) {
        persistence::append_live_candle(dir, instrument, tf, candle);
    }

    pub fn get_candles(&self, tf: Timeframe, count: usize) -> Vec<Candle> {
        let rings = self.rings.read();
        match rings.get(&tf) {
            Some(ring) => {
                let start = ring.len().saturating_sub(count);
                ring.iter().skip(start).copied().collect()
            }
            None => Vec::new(),
        }
    }

    pub fn get_closes(&self, tf: Timeframe, count: usize) -> Vec<f64> {
        self.get_candles(tf, count).iter().map(|c| c.close).collect()
    }

    pub fn last(&self, tf: Timeframe) -> Option<Candle> {
        self.rings.read().get(&tf).and_then(|r| r.back().copied())
    }

    pub fn len(&self, tf: Timeframe) -> usize {
        self.rings.read().get(&tf).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, tf: Timeframe) -> bool {
        self.len(tf) == 0
    }
}

impl Default for CandleStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open_time: i64, close: f64) -> Candle {
        Candle {
            open_time,
            open: close - 1.0,
            high: close + 1.0,
            low: close - 2.0,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn ring_is_ordered_and_capacity_bounded() {
        let store = CandleStore::new();
        for i in 0..(Timeframe::M1.ring_capacity() + 20) {
            store.apply_live(Timeframe::M1, candle(i as i64 * 60_000, i as f64));
        }
        assert_eq!(store.len(Timeframe::M1), Timeframe::M1.ring_capacity());
        let candles = store.get_candles(Timeframe::M1, usize::MAX);
        for w in candles.windows(2) {
            assert!(w[0].open_time < w[1].open_time);
        }
    }

    #[test]
    fn apply_live_replaces_matching_open_time() {
        let store = CandleStore::new();
        store.apply_live(Timeframe::M5, candle(0, 100.0));
        store.apply_live(Timeframe::M5, candle(0, 105.0));
        assert_eq!(store.len(Timeframe::M5), 1);
        assert_eq!(store.last(Timeframe::M5).unwrap().close, 105.0);
    }

    #[test]
    fn apply_live_appends_new_open_time() {
        let store = CandleStore::new();
        store.apply_live(Timeframe::M5, candle(0, 100.0));
        store.apply_live(Timeframe::M5, candle(300_000, 101.0));
        assert_eq!(store.len(Timeframe::M5), 2);
    }

    #[test]
    fn double_apply_same_live_candle_is_idempotent() {
        let store = CandleStore::new();
        let c = candle(0, 100.0);
        store.apply_live(Timeframe::M1, c);
        store.apply_live(Timeframe::M1, c);
        assert_eq!(store.len(Timeframe::M1), 1);
    }

    #[test]
    fn backfill_is_idempotent_modulo_ordering() {
        let store = CandleStore::new();
        let xs = vec![candle(0, 100.0), candle(60_000, 101.0), candle(120_000, 102.0)];
        store.apply_rest_backfill(Timeframe::M1, xs.clone());
        store.apply_rest_backfill(Timeframe::M1, xs);
        assert_eq!(store.len(Timeframe::M1), 3);
        let closes = store.get_closes(Timeframe::M1, 10);
        assert_eq!(closes, vec![100.0, 101.0, 102.0]);
    }

    #[test]
    fn empty_backfill_keeps_local_state() {
        let store = CandleStore::new();
        store.apply_live(Timeframe::M1, candle(0, 100.0));
        store.apply_rest_backfill(Timeframe::M1, vec![]);
        assert_eq!(store.len(Timeframe::M1), 1);
    }

    #[test]
    fn backfill_evicts_oldest_beyond_capacity() {
        let store = CandleStore::new();
        let cap = Timeframe::D1.ring_capacity();
        let xs: Vec<Candle> = (0..(cap + 5))
            .map(|i| candle(i as i64 * 86_400_000, i as f64))
            .collect();
        store.apply_rest_backfill(Timeframe::D1, xs);
        assert_eq!(store.len(Timeframe::D1), cap);
        let closes = store.get_closes(Timeframe::D1, 1);
        assert_eq!(closes, vec![(cap + 4) as f64]);
    }
}
