// =============================================================================
// MicrostructureVerdict — computed per pool per tick
// =============================================================================

use serde::{Deserialize, Serialize};

/// One failed gating floor: names exactly one floor and states the observed
/// value against the threshold (spec Testable Property 9).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatingReason {
    pub floor: String,
    pub observed: f64,
    pub threshold: f64,
}

impl GatingReason {
    pub fn new(floor: impl Into<String>, observed: f64, threshold: f64) -> Self {
        Self {
            floor: floor.into(),
            observed,
            threshold,
        }
    }
}

impl std::fmt::Display for GatingReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} floor breached: observed {:.4}, threshold {:.4}",
            self.floor, self.observed, self.threshold
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MicrostructureVerdict {
    pub bin_velocity_score: f64,
    pub liquidity_flow_score: f64,
    pub swap_velocity_score: f64,
    pub fee_intensity_score: f64,

    pub raw_bin_velocity: f64,
    pub raw_liquidity_flow: f64,
    pub raw_swap_velocity: f64,
    pub raw_fee_intensity: f64,

    pub pool_entropy: f64,
    pub composite_score: f64,

    pub market_alive: bool,
    pub gating_reasons: Vec<GatingReason>,

    pub snapshot_count: usize,
    pub window_start: chrono::DateTime<chrono::Utc>,
    pub window_end: chrono::DateTime<chrono::Utc>,
}

impl MicrostructureVerdict {
    /// A verdict considered "good" for the FSM's OBSERVE→READY counter: spec
    /// §4.8 additionally requires composite ≥ entry threshold, which is
    /// checked by the caller alongside whale/migration/crowd criteria; this
    /// helper covers the market-alive half of that conjunction.
    pub fn is_market_alive(&self) -> bool {
        self.market_alive
    }
}
