// =============================================================================
// Cycle-Phase Classifier — refill-latency FSM over recent history
// =============================================================================
//
// Grounded on position_engine::PositionStatus's enum+Display discipline,
// since spec §4.5 names a small closed state set with no direct teacher
// analogue (the teacher has no refill-latency concept at all).
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::domain::snapshot::SnapshotHistory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CyclePhase {
    None,
    Pre,
    Active,
    End,
}

impl std::fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CyclePhase::None => "NONE",
            CyclePhase::Pre => "PRE",
            CyclePhase::Active => "ACTIVE",
            CyclePhase::End => "END",
        };
        write!(f, "{s}")
    }
}

impl CyclePhase {
    pub fn permits_entry(&self) -> bool {
        matches!(self, CyclePhase::Pre | CyclePhase::Active)
    }
}

/// Classifies the current refill-latency phase from the mean bin refill
/// times recorded across history.
pub fn classify(history: &SnapshotHistory) -> CyclePhase {
    let latencies: Vec<f64> = history.iter().filter_map(|s| s.mean_refill_seconds()).collect();
    if latencies.len() < 3 {
        return CyclePhase::None;
    }

    let current = *latencies.last().unwrap();
    let peak = latencies.iter().cloned().fold(f64::MIN, f64::max);

    if current <= 0.80 * peak && peak >= 1.6 {
        return CyclePhase::End;
    }
    if (1.6..=2.3).contains(&current) {
        return CyclePhase::Active;
    }

    let strictly_rising = latencies.windows(2).all(|w| w[1] > w[0]);
    if strictly_rising && current >= 1.25 {
        return CyclePhase::Pre;
    }

    CyclePhase::None
}

/// Entry is additionally blocked by migration ≥ 0.25 or max-bins-crossed > 3.
pub fn entry_blocked(migration: f64, max_bins_crossed: i64) -> bool {
    migration >= 0.25 || max_bins_crossed > 3
}

/// Exit is mandated in END, on migration ≥ 0.30, max-bins-crossed ≥ 6, or
/// latency collapse from peak (captured by `phase == End`).
pub fn exit_mandated(phase: CyclePhase, migration: f64, max_bins_crossed: i64) -> bool {
    phase == CyclePhase::End || migration >= 0.30 || max_bins_crossed >= 6
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::snapshot::{BinEntry, BinSnapshot};
    use chrono::{Duration, Utc};

    fn snap_with_refill(t: chrono::DateTime<Utc>, refill_secs: f64) -> BinSnapshot {
        BinSnapshot {
            timestamp: t,
            active_bin: 100,
            liquidity_usd: 1.0,
            inventory_base: 1.0,
            inventory_quote: 1.0,
            fee_rate_bps: 30,
            trade_count: 1,
            bins: vec![BinEntry { bin_index: 100, liquidity_usd: 1.0, refill_time_millis: (refill_secs * 1000.0) as u64 }],
        }
    }

    #[test]
    fn rising_latency_above_floor_is_pre() {
        let mut h = SnapshotHistory::with_params(20, 0);
        let t0 = Utc::now();
        h.record(snap_with_refill(t0, 1.0));
        h.record(snap_with_refill(t0 + Duration::seconds(8), 1.1));
        h.record(snap_with_refill(t0 + Duration::seconds(16), 1.3));
        assert_eq!(classify(&h), CyclePhase::Pre);
    }

    #[test]
    fn latency_in_band_is_active() {
        let mut h = SnapshotHistory::with_params(20, 0);
        let t0 = Utc::now();
        h.record(snap_with_refill(t0, 1.0));
        h.record(snap_with_refill(t0 + Duration::seconds(8), 1.5));
        h.record(snap_with_refill(t0 + Duration::seconds(16), 2.0));
        assert_eq!(classify(&h), CyclePhase::Active);
    }

    #[test]
    fn collapse_from_peak_is_end() {
        let mut h = SnapshotHistory::with_params(20, 0);
        let t0 = Utc::now();
        h.record(snap_with_refill(t0, 1.0));
        h.record(snap_with_refill(t0 + Duration::seconds(8), 2.0));
        h.record(snap_with_refill(t0 + Duration::seconds(16), 1.0));
        assert_eq!(classify(&h), CyclePhase::End);
    }

    #[test]
    fn entry_permitted_only_in_pre_or_active() {
        assert!(CyclePhase::Pre.permits_entry());
        assert!(CyclePhase::Active.permits_entry());
        assert!(!CyclePhase::None.permits_entry());
        assert!(!CyclePhase::End.permits_entry());
    }
}
