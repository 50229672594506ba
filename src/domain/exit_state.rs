// =============================================================================
// ExitGovernorState — per-position escape-hatch bookkeeping
// =============================================================================

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitState {
    Hold,
    ExitTriggered,
    ForcedExitPending,
}

impl std::fmt::Display for ExitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExitState::Hold => "HOLD",
            ExitState::ExitTriggered => "EXIT_TRIGGERED",
            ExitState::ForcedExitPending => "FORCED_EXIT_PENDING",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitGovernorState {
    pub exit_state: ExitState,
    pub first_trigger_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Timestamps of suppressions in the rolling 30-minute window.
    #[serde(skip)]
    pub suppressions: VecDeque<chrono::DateTime<chrono::Utc>>,
    pub fee_velocity_usd_per_hour: f64,
    pub estimated_time_to_cost_target_secs: Option<f64>,
    pub consecutive_staleness_ticks: u32,
}

impl ExitGovernorState {
    pub fn new() -> Self {
        Self {
            exit_state: ExitState::Hold,
            first_trigger_at: None,
            suppressions: VecDeque::new(),
            fee_velocity_usd_per_hour: 0.0,
            estimated_time_to_cost_target_secs: None,
            consecutive_staleness_ticks: 0,
        }
    }

    /// Drop suppressions older than 30 minutes and return the count
    /// remaining in the window.
    pub fn suppression_count_in_window(&mut self, now: chrono::DateTime<chrono::Utc>) -> usize {
        let cutoff = now - chrono::Duration::minutes(30);
        while matches!(self.suppressions.front(), Some(t) if *t < cutoff) {
            self.suppressions.pop_front();
        }
        self.suppressions.len()
    }

    pub fn record_suppression(&mut self, now: chrono::DateTime<chrono::Utc>) {
        self.suppressions.push_back(now);
    }

    pub fn ttl_remaining(&self, now: chrono::DateTime<chrono::Utc>, ttl: chrono::Duration) -> Option<chrono::Duration> {
        self.first_trigger_at.map(|t| ttl - (now - t))
    }
}

impl Default for ExitGovernorState {
    fn default() -> Self {
        Self::new()
    }
}
