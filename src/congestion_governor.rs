// =============================================================================
// Congestion Governor — rolling window of transaction outcomes
// =============================================================================
//
// Grounded on binance/rate_limit.rs's windowed-counter/threshold-tier shape,
// retargeted from API request weight to the spec's congestion inputs, with
// the teacher's calendar-day reset replaced by a 5-minute rolling window
// (spec §4.7) and a short cached-aggregate TTL instead of an unconditional
// atomic read.
// =============================================================================

use std::collections::VecDeque;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::domain::congestion::CongestionSample;

const WINDOW_MINUTES: i64 = 5;
const MAX_SAMPLES: usize = 500;
const AGGREGATE_TTL_SECS: u64 = 5;

const CONFIRMATION_BASELINE_MS: f64 = 500.0;
const CONFIRMATION_MAX_MS: f64 = 30_000.0;
const BLOCKTIME_BASELINE: f64 = 0.05;
const BLOCKTIME_MAX: f64 = 0.5;
const RPC_BASELINE_MS: f64 = 100.0;
const RPC_MAX_MS: f64 = 5_000.0;
const PENDING_MAX: f64 = 50.0;

const WEIGHT_CONFIRMATION: f64 = 0.30;
const WEIGHT_FAIL_RATE: f64 = 0.30;
const WEIGHT_BLOCKTIME: f64 = 0.15;
const WEIGHT_PENDING: f64 = 0.10;
const WEIGHT_RPC: f64 = 0.15;

const BLOCK_THRESHOLD: f64 = 0.85;
const HALVE_SIZE_THRESHOLD: f64 = 0.70;
const REDUCE_FREQUENCY_THRESHOLD: f64 = 0.60;

fn normalize(value: f64, baseline: f64, max: f64) -> f64 {
    if (max - baseline).abs() < f64::EPSILON {
        return 0.0;
    }
    ((value - baseline) / (max - baseline)).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CongestionVerdict {
    pub score: f64,
    pub block_trading: bool,
    pub position_size_multiplier: f64,
    pub scan_frequency_multiplier: f64,
}

struct CachedAggregate {
    verdict: CongestionVerdict,
    computed_at: Instant,
}

pub struct CongestionGovernor {
    samples: VecDeque<CongestionSample>,
    cache: Option<CachedAggregate>,
}

impl CongestionGovernor {
    pub fn new() -> Self {
        Self { samples: VecDeque::with_capacity(MAX_SAMPLES), cache: None }
    }

    pub fn record(&mut self, sample: CongestionSample) {
        if self.samples.len() >= MAX_SAMPLES {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        self.cache = None;
    }

    fn compact(&mut self, now: chrono::DateTime<chrono::Utc>) {
        let cutoff = now - chrono::Duration::minutes(WINDOW_MINUTES);
        while matches!(self.samples.front(), Some(s) if s.timestamp < cutoff) {
            self.samples.pop_front();
        }
    }

    /// Evaluate the current congestion verdict. `blocktime_deviation` and
    /// `pending_signature_depth` are instantaneous inputs (not part of the
    /// windowed sample set, per spec §3's CongestionSample fields) supplied
    /// fresh on each call.
    pub fn evaluate(
        &mut self,
        now: chrono::DateTime<chrono::Utc>,
        blocktime_deviation: f64,
        pending_signature_depth: u32,
    ) -> CongestionVerdict {
        if let Some(cached) = &self.cache {
            if cached.computed_at.elapsed().as_secs() < AGGREGATE_TTL_SECS {
                return cached.verdict.clone();
            }
        }

        self.compact(now);

        let confirmations: Vec<f64> = self.samples.iter().filter_map(|s| s.confirmation_time_ms).collect();
        let mean_confirmation = if confirmations.is_empty() {
            CONFIRMATION_BASELINE_MS
        } else {
            confirmations.iter().sum::<f64>() / confirmations.len() as f64
        };

        let fail_rate = if self.samples.is_empty() {
            0.0
        } else {
            let failed = self.samples.iter().filter(|s| !s.success).count();
            failed as f64 / self.samples.len() as f64
        };

        let rpc_latencies: Vec<f64> = self.samples.iter().filter_map(|s| s.rpc_latency_ms).collect();
        let mean_rpc = if rpc_latencies.is_empty() {
            RPC_BASELINE_MS
        } else {
            rpc_latencies.iter().sum::<f64>() / rpc_latencies.len() as f64
        };

        let score = WEIGHT_CONFIRMATION * normalize(mean_confirmation, CONFIRMATION_BASELINE_MS, CONFIRMATION_MAX_MS)
            + WEIGHT_FAIL_RATE * fail_rate.clamp(0.0, 1.0)
            + WEIGHT_BLOCKTIME * normalize(blocktime_deviation, BLOCKTIME_BASELINE, BLOCKTIME_MAX)
            + WEIGHT_PENDING * normalize(pending_signature_depth as f64, 0.0, PENDING_MAX)
            + WEIGHT_RPC * normalize(mean_rpc, RPC_BASELINE_MS, RPC_MAX_MS);

        let block_trading = score >= BLOCK_THRESHOLD;
        let position_size_multiplier = if block_trading {
            0.0
        } else if score >= HALVE_SIZE_THRESHOLD {
            // Linear interpolation between the halve-size tier and the block tier.
            let t = (score - HALVE_SIZE_THRESHOLD) / (BLOCK_THRESHOLD - HALVE_SIZE_THRESHOLD);
            (1.0 - t) * 0.5
        } else if score >= REDUCE_FREQUENCY_THRESHOLD {
            let t = (score - REDUCE_FREQUENCY_THRESHOLD) / (HALVE_SIZE_THRESHOLD - REDUCE_FREQUENCY_THRESHOLD);
            1.0 - t * 0.5
        } else {
            1.0
        };
        let scan_frequency_multiplier = if block_trading {
            0.0
        } else if score >= REDUCE_FREQUENCY_THRESHOLD {
            0.75
        } else {
            1.0
        };

        let verdict = CongestionVerdict { score, block_trading, position_size_multiplier, scan_frequency_multiplier };
        self.cache = Some(CachedAggregate { verdict: verdict.clone(), computed_at: Instant::now() });
        verdict
    }
}

impl Default for CongestionGovernor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(confirmation_ms: f64, success: bool, rpc_ms: f64, t: chrono::DateTime<chrono::Utc>) -> CongestionSample {
        CongestionSample {
            timestamp: t,
            confirmation_time_ms: Some(confirmation_ms),
            success,
            rpc_latency_ms: Some(rpc_ms),
        }
    }

    /// Scenario D (normal) from spec §8.
    #[test]
    fn scenario_d_normal_congestion() {
        let mut gov = CongestionGovernor::new();
        let now = chrono::Utc::now();
        // 3 success, 1 fail in 4 samples => fail rate 0.25.
        gov.record(sample(20_000.0, true, 3_000.0, now));
        gov.record(sample(20_000.0, true, 3_000.0, now));
        gov.record(sample(20_000.0, true, 3_000.0, now));
        gov.record(sample(20_000.0, false, 3_000.0, now));

        let verdict = gov.evaluate(now, 0.1, 0);
        assert!((verdict.score - 0.38).abs() < 0.02, "score was {}", verdict.score);
        assert!(!verdict.block_trading);
        assert_eq!(verdict.position_size_multiplier, 1.0);
    }

    /// Severe congestion across every input crosses the block threshold.
    #[test]
    fn severe_congestion_blocks_trading() {
        let mut gov = CongestionGovernor::new();
        let now = chrono::Utc::now();
        for _ in 0..10 {
            gov.record(sample(30_000.0, false, 5_000.0, now));
        }
        let verdict = gov.evaluate(now, 0.5, 50);
        assert!(verdict.score > 0.85, "score was {}", verdict.score);
        assert!(verdict.block_trading);
        assert_eq!(verdict.position_size_multiplier, 0.0);
    }

    #[test]
    fn samples_outside_window_are_compacted() {
        let mut gov = CongestionGovernor::new();
        let now = chrono::Utc::now();
        gov.record(sample(30_000.0, false, 5_000.0, now - chrono::Duration::minutes(10)));
        let verdict = gov.evaluate(now, 0.0, 0);
        // Stale sample is outside the 5-minute window, so defaults apply.
        assert!(verdict.score < 0.85);
    }
}
