// =============================================================================
// Microstructure Scorer — bin velocity, liquidity flow, swap velocity, fee
// intensity, pool entropy, composite score, gating verdict
// =============================================================================
//
// Grounded directly on regime/detector.rs's classify() hierarchical-threshold
// structure and its remap() linear-interpolation helper (reused verbatim
// below), and on regime/entropy.rs's binary Shannon entropy formula, adapted
// from candle UP/DOWN classification to bin-migration direction.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::domain::snapshot::SnapshotHistory;
use crate::domain::verdict::{GatingReason, MicrostructureVerdict};

const BIN_VELOCITY_CALIBRATION: f64 = 0.1;
const LIQUIDITY_FLOW_CALIBRATION: f64 = 0.05;
const SWAP_VELOCITY_CALIBRATION: f64 = 1.0;
const FEE_INTENSITY_CALIBRATION: f64 = 0.001;

const GATE_MIN_BIN_VELOCITY: f64 = 0.03;
const GATE_MIN_SWAP_VELOCITY: f64 = 0.10;
const GATE_MIN_ENTROPY: f64 = 0.65;
const GATE_MIN_LIQUIDITY_FLOW: f64 = 0.005; // 0.5%

const WEIGHT_BIN: f64 = 0.30;
const WEIGHT_LIQUIDITY: f64 = 0.30;
const WEIGHT_SWAP: f64 = 0.25;
const WEIGHT_FEE: f64 = 0.15;

const ENTROPY_VARIANCE_WEIGHT: f64 = 0.6;
const ENTROPY_BIN_DELTA_WEIGHT: f64 = 0.4;
const ENTROPY_VARIANCE_CALIBRATION: f64 = 0.25;
const ENTROPY_BIN_DELTA_CALIBRATION: f64 = 5.0;

/// Remaps a raw value onto [0,100] against a calibration constant,
/// clamping at both ends. Mirrors regime/detector.rs's `remap()`.
fn remap(raw: f64, calibration: f64) -> f64 {
    if !raw.is_finite() || calibration <= 0.0 {
        return 0.0;
    }
    ((raw / calibration) * 100.0).clamp(0.0, 100.0)
}

/// Safe ratio: a zero denominator yields 0, never NaN or infinity.
fn safe_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator.abs() < f64::EPSILON {
        0.0
    } else {
        numerator / denominator
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnrichmentLevel {
    Enriched,
    MicrostructureOnly,
}

/// Pre-telemetry fundamentals used by the Discovery Funnel's stage 2 to
/// produce a candidate verdict ahead of full history accumulation.
#[derive(Debug, Clone)]
pub struct CandidateFundamentals {
    pub bin_delta: f64,
    pub elapsed_secs: f64,
    pub liquidity_usd: f64,
    pub liquidity_delta_usd: f64,
    pub trade_count: u64,
    pub fees_usd: f64,
    pub inventory_ratio_variance: f64,
    pub mean_abs_bin_delta: f64,
    pub enrichment: EnrichmentLevel,
}

struct RawComponents {
    bin_velocity: f64,
    liquidity_flow: f64,
    swap_velocity: f64,
    fee_intensity: f64,
    entropy: f64,
}

fn binary_entropy(p: f64, q: f64) -> f64 {
    let h_p = if p > 0.0 { -p * p.log2() } else { 0.0 };
    let h_q = if q > 0.0 { -q * q.log2() } else { 0.0 };
    h_p + h_q
}

fn compute_from_fundamentals(f: &CandidateFundamentals) -> RawComponents {
    let bin_velocity = safe_ratio(f.bin_delta.abs(), f.elapsed_secs);
    let liquidity_flow = safe_ratio(f.liquidity_delta_usd.abs(), f.liquidity_usd);
    let swap_velocity = safe_ratio(f.trade_count as f64, f.elapsed_secs);
    let fee_intensity = safe_ratio(f.fees_usd, f.liquidity_usd);

    let variance_term = (f.inventory_ratio_variance / ENTROPY_VARIANCE_CALIBRATION).clamp(0.0, 1.0);
    let bin_delta_term = (f.mean_abs_bin_delta / ENTROPY_BIN_DELTA_CALIBRATION).clamp(0.0, 1.0);
    let entropy = ENTROPY_VARIANCE_WEIGHT * variance_term + ENTROPY_BIN_DELTA_WEIGHT * bin_delta_term;

    RawComponents { bin_velocity, liquidity_flow, swap_velocity, fee_intensity, entropy }
}

pub fn score(f: &CandidateFundamentals) -> MicrostructureVerdict {
    let raw = compute_from_fundamentals(f);
    build_verdict(raw, 1, chrono::Utc::now(), chrono::Utc::now())
}

fn build_verdict(
    raw: RawComponents,
    snapshot_count: usize,
    window_start: chrono::DateTime<chrono::Utc>,
    window_end: chrono::DateTime<chrono::Utc>,
) -> MicrostructureVerdict {
    let bin_velocity_score = remap(raw.bin_velocity, BIN_VELOCITY_CALIBRATION);
    let liquidity_flow_score = remap(raw.liquidity_flow, LIQUIDITY_FLOW_CALIBRATION);
    let swap_velocity_score = remap(raw.swap_velocity, SWAP_VELOCITY_CALIBRATION);
    let fee_intensity_score = remap(raw.fee_intensity, FEE_INTENSITY_CALIBRATION);

    let composite_score = WEIGHT_BIN * bin_velocity_score
        + WEIGHT_LIQUIDITY * liquidity_flow_score
        + WEIGHT_SWAP * swap_velocity_score
        + WEIGHT_FEE * fee_intensity_score;

    let mut gating_reasons = Vec::new();
    if raw.bin_velocity < GATE_MIN_BIN_VELOCITY {
        gating_reasons.push(GatingReason::new("bin_velocity", raw.bin_velocity, GATE_MIN_BIN_VELOCITY));
    }
    if raw.swap_velocity < GATE_MIN_SWAP_VELOCITY {
        gating_reasons.push(GatingReason::new("swap_velocity", raw.swap_velocity, GATE_MIN_SWAP_VELOCITY));
    }
    if raw.entropy < GATE_MIN_ENTROPY {
        gating_reasons.push(GatingReason::new("pool_entropy", raw.entropy, GATE_MIN_ENTROPY));
    }
    if raw.liquidity_flow < GATE_MIN_LIQUIDITY_FLOW {
        gating_reasons.push(GatingReason::new("liquidity_flow", raw.liquidity_flow, GATE_MIN_LIQUIDITY_FLOW));
    }

    MicrostructureVerdict {
        bin_velocity_score,
        liquidity_flow_score,
        swap_velocity_score,
        fee_intensity_score,
        raw_bin_velocity: raw.bin_velocity,
        raw_liquidity_flow: raw.liquidity_flow,
        raw_swap_velocity: raw.swap_velocity,
        raw_fee_intensity: raw.fee_intensity,
        pool_entropy: raw.entropy,
        composite_score,
        market_alive: gating_reasons.is_empty(),
        gating_reasons,
        snapshot_count,
        window_start,
        window_end,
    }
}

/// Scores a full `SnapshotHistory` (length ≥ 3 required by spec §4.4).
/// Velocity components use the last pair of snapshots even when the history
/// holds more than two entries.
pub fn score_history(history: &SnapshotHistory) -> Option<MicrostructureVerdict> {
    if history.len() < 3 {
        return None;
    }
    let (prev, latest) = history.last_pair()?;

    let elapsed_secs = (latest.timestamp - prev.timestamp).num_milliseconds() as f64 / 1000.0;
    let bin_delta = (latest.active_bin - prev.active_bin) as f64;
    let liquidity_delta = latest.liquidity_usd - prev.liquidity_usd;
    let fees_usd = latest.liquidity_usd * (latest.fee_rate_bps as f64 / 10_000.0);

    let ratios: Vec<f64> = history.iter().map(|s| s.inventory_ratio()).collect();
    let mean: f64 = ratios.iter().sum::<f64>() / ratios.len() as f64;
    let variance: f64 = ratios.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / ratios.len() as f64;

    let deltas: Vec<f64> = history
        .iter()
        .collect::<Vec<_>>()
        .windows(2)
        .map(|w| (w[1].active_bin - w[0].active_bin).abs() as f64)
        .collect();
    let mean_abs_bin_delta = if deltas.is_empty() {
        0.0
    } else {
        deltas.iter().sum::<f64>() / deltas.len() as f64
    };

    let raw = compute_from_fundamentals(&CandidateFundamentals {
        bin_delta,
        elapsed_secs,
        liquidity_usd: latest.liquidity_usd,
        liquidity_delta_usd: liquidity_delta,
        trade_count: latest.trade_count,
        fees_usd,
        inventory_ratio_variance: variance,
        mean_abs_bin_delta,
        enrichment: EnrichmentLevel::Enriched,
    });

    Some(build_verdict(raw, history.len(), prev.timestamp, latest.timestamp))
}

/// Directional-disagreement entropy over a bin-migration direction series,
/// the same binary-Shannon-entropy shape as regime/entropy.rs's candle
/// UP/DOWN classifier, retargeted from candle direction to bin direction.
pub fn migration_direction_entropy(bin_deltas: &[i64]) -> f64 {
    if bin_deltas.is_empty() {
        return 0.0;
    }
    let up = bin_deltas.iter().filter(|d| **d > 0).count();
    let p_up = up as f64 / bin_deltas.len() as f64;
    binary_entropy(p_up, 1.0 - p_up)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::snapshot::BinSnapshot;
    use chrono::{Duration, Utc};

    fn snap(t: chrono::DateTime<Utc>, bin: i64, liq: f64, trades: u64, base: f64, quote: f64) -> BinSnapshot {
        BinSnapshot {
            timestamp: t,
            active_bin: bin,
            liquidity_usd: liq,
            inventory_base: base,
            inventory_quote: quote,
            fee_rate_bps: 30,
            trade_count: trades,
            bins: vec![],
        }
    }

    /// Scenario A from spec §8: bins 100,102,104 at t,t+8,t+16s, constant
    /// liquidity 1,000,000 USD, 5 trades per interval.
    #[test]
    fn scenario_a_entry_verdict() {
        let mut history = SnapshotHistory::with_params(20, 0);
        let t0 = Utc::now();
        history.record(snap(t0, 100, 1_000_000.0, 5, 100.0, 900.0));
        history.record(snap(t0 + Duration::seconds(8), 102, 1_000_000.0, 5, 200.0, 800.0));
        history.record(snap(t0 + Duration::seconds(16), 104, 1_000_000.0, 5, 300.0, 700.0));

        let verdict = score_history(&history).unwrap();

        // bin velocity raw = 2/8 = 0.25/s -> normalized 100 (clamped)
        assert!((verdict.raw_bin_velocity - 0.25).abs() < 1e-9);
        assert_eq!(verdict.bin_velocity_score, 100.0);

        // swap velocity raw = 5/8 = 0.625/s -> normalized ~62.5
        assert!((verdict.raw_swap_velocity - 0.625).abs() < 1e-9);
        assert!((verdict.swap_velocity_score - 62.5).abs() < 1e-6);

        // constant liquidity => zero flow ratio
        assert_eq!(verdict.raw_liquidity_flow, 0.0);

        assert!(verdict.composite_score > 60.0);
    }

    #[test]
    fn zero_denominator_ratios_never_nan() {
        let mut history = SnapshotHistory::with_params(20, 0);
        let t0 = Utc::now();
        history.record(snap(t0, 100, 0.0, 0, 0.0, 0.0));
        history.record(snap(t0 + Duration::seconds(8), 100, 0.0, 0, 0.0, 0.0));
        history.record(snap(t0 + Duration::seconds(16), 100, 0.0, 0, 0.0, 0.0));
        let verdict = score_history(&history).unwrap();
        assert!(!verdict.raw_liquidity_flow.is_nan());
        assert!(!verdict.raw_fee_intensity.is_nan());
        assert_eq!(verdict.raw_liquidity_flow, 0.0);
    }

    #[test]
    fn fewer_than_three_snapshots_returns_none() {
        let mut history = SnapshotHistory::with_params(20, 0);
        history.record(snap(Utc::now(), 100, 1.0, 1, 1.0, 1.0));
        assert!(score_history(&history).is_none());
    }

    #[test]
    fn gating_reason_names_floor_observed_and_threshold() {
        let mut history = SnapshotHistory::with_params(20, 0);
        let t0 = Utc::now();
        // No movement at all => fails every floor.
        for i in 0..3 {
            history.record(snap(t0 + Duration::seconds(i * 8), 100, 1_000_000.0, 0, 500.0, 500.0));
        }
        let verdict = score_history(&history).unwrap();
        assert!(!verdict.market_alive);
        assert!(!verdict.gating_reasons.is_empty());
        for reason in &verdict.gating_reasons {
            assert!(reason.observed < reason.threshold);
        }
    }
}
