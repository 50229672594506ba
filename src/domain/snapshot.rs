// =============================================================================
// BinSnapshot & SnapshotHistory — point-in-time telemetry and its bounded ring
// =============================================================================

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

/// Per-bin telemetry for the neighborhood of the active bin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinEntry {
    pub bin_index: i64,
    pub liquidity_usd: f64,
    pub refill_time_millis: u64,
}

/// A point-in-time observation of a pool's bin state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinSnapshot {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub active_bin: i64,
    pub liquidity_usd: f64,
    pub inventory_base: f64,
    pub inventory_quote: f64,
    pub fee_rate_bps: u32,
    pub trade_count: u64,
    pub bins: Vec<BinEntry>,
}

impl BinSnapshot {
    /// Inventory ratio base/(base+quote), used by the pool entropy variance term.
    pub fn inventory_ratio(&self) -> f64 {
        let total = self.inventory_base + self.inventory_quote;
        if total <= 0.0 {
            0.0
        } else {
            self.inventory_base / total
        }
    }

    /// Mean refill time in seconds across the recorded bin neighborhood.
    pub fn mean_refill_seconds(&self) -> Option<f64> {
        if self.bins.is_empty() {
            return None;
        }
        let sum: f64 = self
            .bins
            .iter()
            .map(|b| b.refill_time_millis as f64 / 1000.0)
            .sum();
        Some(sum / self.bins.len() as f64)
    }
}

const DEFAULT_CAPACITY: usize = 20;
const DEFAULT_MIN_INTERVAL_SECS: i64 = 8;

/// Bounded per-pool ring of recent snapshots. `record` is idempotent with
/// respect to the sampling grain: a snapshot less than `min_interval` after
/// the last retained one is silently discarded.
#[derive(Debug)]
pub struct SnapshotHistory {
    capacity: usize,
    min_interval_secs: i64,
    entries: VecDeque<BinSnapshot>,
}

impl SnapshotHistory {
    pub fn new() -> Self {
        Self::with_params(DEFAULT_CAPACITY, DEFAULT_MIN_INTERVAL_SECS)
    }

    pub fn with_params(capacity: usize, min_interval_secs: i64) -> Self {
        Self {
            capacity,
            min_interval_secs,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Record a snapshot. Returns `true` if it was accepted (and is the new
    /// most-recent entry), `false` if discarded because it landed inside the
    /// minimum sampling interval.
    pub fn record(&mut self, snapshot: BinSnapshot) -> bool {
        if let Some(last) = self.entries.back() {
            let elapsed = snapshot.timestamp.signed_duration_since(last.timestamp);
            if elapsed.num_seconds() < self.min_interval_secs {
                return false;
            }
        }

        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(snapshot);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BinSnapshot> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&BinSnapshot> {
        self.entries.back()
    }

    /// The last two entries, in chronological order, used for velocity
    /// calculations (spec: "with exactly 3 snapshots, velocity uses the last pair").
    pub fn last_pair(&self) -> Option<(&BinSnapshot, &BinSnapshot)> {
        let len = self.entries.len();
        if len < 2 {
            return None;
        }
        Some((&self.entries[len - 2], &self.entries[len - 1]))
    }
}

impl Default for SnapshotHistory {
    fn default() -> Self {
        Self::new()
    }
}

/// Scheduler-owned table of per-pool histories, keyed by canonical address.
pub type SnapshotHistoryTable = HashMap<super::identity::PoolAddress, SnapshotHistory>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn snap_at(t: chrono::DateTime<Utc>, bin: i64, liq: f64, trades: u64) -> BinSnapshot {
        BinSnapshot {
            timestamp: t,
            active_bin: bin,
            liquidity_usd: liq,
            inventory_base: 500.0,
            inventory_quote: 500.0,
            fee_rate_bps: 30,
            trade_count: trades,
            bins: vec![],
        }
    }

    #[test]
    fn record_discards_within_min_interval() {
        let mut h = SnapshotHistory::with_params(20, 8);
        let t0 = Utc::now();
        assert!(h.record(snap_at(t0, 100, 1_000_000.0, 5)));
        assert!(!h.record(snap_at(t0 + Duration::seconds(3), 101, 1_000_000.0, 5)));
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn record_accepts_after_min_interval() {
        let mut h = SnapshotHistory::with_params(20, 8);
        let t0 = Utc::now();
        assert!(h.record(snap_at(t0, 100, 1_000_000.0, 5)));
        assert!(h.record(snap_at(t0 + Duration::seconds(8), 102, 1_000_000.0, 5)));
        assert_eq!(h.len(), 2);
    }

    #[test]
    fn ring_evicts_oldest_when_full() {
        let mut h = SnapshotHistory::with_params(2, 0);
        let t0 = Utc::now();
        h.record(snap_at(t0, 1, 1.0, 1));
        h.record(snap_at(t0 + Duration::seconds(10), 2, 1.0, 1));
        h.record(snap_at(t0 + Duration::seconds(20), 3, 1.0, 1));
        assert_eq!(h.len(), 2);
        assert_eq!(h.iter().next().unwrap().active_bin, 2);
    }

    #[test]
    fn last_pair_uses_most_recent_two() {
        let mut h = SnapshotHistory::with_params(20, 0);
        let t0 = Utc::now();
        h.record(snap_at(t0, 100, 1.0, 1));
        h.record(snap_at(t0 + Duration::seconds(8), 102, 1.0, 1));
        h.record(snap_at(t0 + Duration::seconds(16), 104, 1.0, 1));
        let (a, b) = h.last_pair().unwrap();
        assert_eq!(a.active_bin, 102);
        assert_eq!(b.active_bin, 104);
    }
}
