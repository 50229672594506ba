// =============================================================================
// Exit Governor — cost amortization, suppression, escape-hatch forcing
// =============================================================================
//
// Grounded on exit/triple_barrier.rs's mutable per-position state +
// evaluate(price, time) -> Option<Reason> shape and exit/monitor.rs's
// collect-then-close loop pattern, but the triggering math is entirely
// spec's own (§4.9): cost-amortization percentage, suppression counters, the
// EXIT_TTL escape hatch, and economic staleness — none of triple_barrier's
// SL/TP/trailing logic survives past grounding-for-shape.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::domain::exit_state::{ExitGovernorState, ExitState};

pub const EXIT_TTL_MINUTES: i64 = 45;
pub const MAX_SUPPRESSIONS: usize = 60;
pub const MAX_TIME_TO_AMORTIZE_MINUTES: f64 = 90.0;
pub const MIN_HOLD_MINUTES: i64 = 3;
const AMORTIZATION_FACTOR: f64 = 1.10;
const DEFAULT_ENTRY_FEE_PCT: f64 = 0.003;
const DEFAULT_EXIT_FEE_PCT: f64 = 0.003;
const DEFAULT_SLIPPAGE_PCT: f64 = 0.002;
const MIN_FEE_VELOCITY_USD_PER_HOUR: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AmortizationBucket {
    Green,
    Yellow,
    Red,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitIntent {
    pub critical: bool,
    pub reason: String,
}

impl ExitIntent {
    pub fn non_critical(reason: impl Into<String>) -> Self {
        Self { critical: false, reason: reason.into() }
    }
    pub fn critical(reason: impl Into<String>) -> Self {
        Self { critical: true, reason: reason.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GovernorDecision {
    Execute,
    Suppress(SuppressionReason),
    ForcedExit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SuppressionReason {
    CostNotAmortized,
    MinHold,
    DefenseMode,
    HoldMode,
}

impl std::fmt::Display for SuppressionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SuppressionReason::CostNotAmortized => "COST_NOT_AMORTIZED",
            SuppressionReason::MinHold => "MIN_HOLD",
            SuppressionReason::DefenseMode => "DEFENSE_MODE",
            SuppressionReason::HoldMode => "HOLD_MODE",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone)]
pub struct CostTarget {
    pub target_usd: f64,
}

impl CostTarget {
    pub fn for_position(size_usd: f64) -> Self {
        let entry = size_usd * DEFAULT_ENTRY_FEE_PCT;
        let exit = size_usd * DEFAULT_EXIT_FEE_PCT;
        let slippage = size_usd * DEFAULT_SLIPPAGE_PCT;
        Self { target_usd: (entry + exit + slippage) * AMORTIZATION_FACTOR }
    }
}

pub struct AmortizationReport {
    pub fees_accrued_usd: f64,
    pub amortization_pct: f64,
    pub bucket: AmortizationBucket,
    pub time_to_cost_target_secs: Option<f64>,
    pub economic_staleness: bool,
}

fn bucket_for(pct: f64) -> AmortizationBucket {
    if pct >= 100.0 {
        AmortizationBucket::Green
    } else if pct >= 50.0 {
        AmortizationBucket::Yellow
    } else {
        AmortizationBucket::Red
    }
}

/// Computes fees accrued from hold time and an estimated fee intensity, or
/// from a concrete fee velocity when telemetry provides one.
pub fn evaluate_amortization(
    size_usd: f64,
    hold_time_hours: f64,
    estimated_fee_intensity: f64,
    position_share: f64,
    observed_fee_velocity_usd_per_hour: Option<f64>,
) -> AmortizationReport {
    let cost_target = CostTarget::for_position(size_usd);

    let fee_velocity = observed_fee_velocity_usd_per_hour
        .unwrap_or_else(|| estimated_fee_intensity * size_usd * position_share);

    let fees_accrued_usd = if let Some(velocity) = observed_fee_velocity_usd_per_hour {
        velocity * hold_time_hours
    } else {
        hold_time_hours * estimated_fee_intensity * size_usd * position_share
    };

    let amortization_pct = if cost_target.target_usd <= 0.0 {
        100.0
    } else {
        (fees_accrued_usd / cost_target.target_usd) * 100.0
    };

    let time_to_cost_target_secs = if fee_velocity <= MIN_FEE_VELOCITY_USD_PER_HOUR {
        None // infinite
    } else {
        let remaining_usd = (cost_target.target_usd - fees_accrued_usd).max(0.0);
        Some((remaining_usd / fee_velocity) * 3600.0)
    };

    let economic_staleness = match time_to_cost_target_secs {
        None => true,
        Some(secs) => secs / 60.0 > MAX_TIME_TO_AMORTIZE_MINUTES,
    };

    AmortizationReport {
        fees_accrued_usd,
        amortization_pct,
        bucket: bucket_for(amortization_pct),
        time_to_cost_target_secs,
        economic_staleness,
    }
}

pub struct ExitGovernorContext {
    pub hold_time: chrono::Duration,
    pub amortization: AmortizationReport,
    pub global_regime_is_defense: bool,
    pub hold_mode_active: bool,
}

/// Evaluates a single exit intent against the current `ExitGovernorState`,
/// mutating the state in place and returning the decision. Suppression
/// rules are applied in the order spec §4.9 lists them; the first one whose
/// precondition holds (and whose intent isn't a critical-safety trigger)
/// wins.
pub fn evaluate(
    state: &mut ExitGovernorState,
    intent: &ExitIntent,
    ctx: &ExitGovernorContext,
    now: chrono::DateTime<chrono::Utc>,
) -> GovernorDecision {
    if intent.critical {
        return GovernorDecision::Execute;
    }

    let suppression = if ctx.amortization.amortization_pct < 100.0 {
        Some(SuppressionReason::CostNotAmortized)
    } else if ctx.hold_time < chrono::Duration::minutes(MIN_HOLD_MINUTES) {
        Some(SuppressionReason::MinHold)
    } else if ctx.global_regime_is_defense {
        Some(SuppressionReason::DefenseMode)
    } else if ctx.hold_mode_active {
        Some(SuppressionReason::HoldMode)
    } else {
        None
    };

    let Some(reason) = suppression else {
        return GovernorDecision::Execute;
    };

    state.record_suppression(now);
    let suppressions_in_window = state.suppression_count_in_window(now);

    if state.exit_state == ExitState::Hold {
        state.exit_state = ExitState::ExitTriggered;
        state.first_trigger_at = Some(now);
    }

    if ctx.amortization.economic_staleness {
        state.consecutive_staleness_ticks += 1;
    } else {
        state.consecutive_staleness_ticks = 0;
    }

    let ttl_expired = state
        .first_trigger_at
        .map(|t| now - t >= chrono::Duration::minutes(EXIT_TTL_MINUTES))
        .unwrap_or(false);

    let forced = ttl_expired
        || suppressions_in_window >= MAX_SUPPRESSIONS
        || state.consecutive_staleness_ticks >= 2;

    if forced {
        state.exit_state = ExitState::ForcedExitPending;
        GovernorDecision::ForcedExit
    } else {
        GovernorDecision::Suppress(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario B from spec §8: $500 position, feeVelocity 0.02 USD/h,
    /// costTarget = (500*0.003 + 500*0.003 + 500*0.002)*1.10 = $4.40.
    #[test]
    fn scenario_b_cost_target_matches_worked_example() {
        let cost_target = CostTarget::for_position(500.0);
        assert!((cost_target.target_usd - 4.40).abs() < 1e-9);
    }

    #[test]
    fn scenario_b_suppression_then_forced_exit_after_sixty() {
        let mut state = ExitGovernorState::new();
        let t0 = chrono::Utc::now();
        let amortization = evaluate_amortization(500.0, 10.0 / 60.0, 0.01, 1.0, Some(0.02));
        assert!(amortization.amortization_pct < 1.0);

        let ctx = ExitGovernorContext {
            hold_time: chrono::Duration::minutes(10),
            amortization,
            global_regime_is_defense: false,
            hold_mode_active: false,
        };
        let intent = ExitIntent::non_critical("signal exit");

        let decision = evaluate(&mut state, &intent, &ctx, t0);
        assert_eq!(decision, GovernorDecision::Suppress(SuppressionReason::CostNotAmortized));
        assert_eq!(state.exit_state, ExitState::ExitTriggered);
        assert!(state.first_trigger_at.is_some());

        let mut last_decision = decision;
        for i in 1..60 {
            let t = t0 + chrono::Duration::minutes(i / 3);
            let amortization = evaluate_amortization(500.0, 10.0 / 60.0, 0.01, 1.0, Some(0.02));
            let ctx = ExitGovernorContext {
                hold_time: chrono::Duration::minutes(10),
                amortization,
                global_regime_is_defense: false,
                hold_mode_active: false,
            };
            last_decision = evaluate(&mut state, &intent, &ctx, t);
        }

        assert_eq!(last_decision, GovernorDecision::ForcedExit);
        assert_eq!(state.exit_state, ExitState::ForcedExitPending);
    }

    #[test]
    fn critical_intent_always_executes() {
        let mut state = ExitGovernorState::new();
        let amortization = evaluate_amortization(500.0, 0.01, 0.01, 1.0, Some(0.0));
        let ctx = ExitGovernorContext {
            hold_time: chrono::Duration::seconds(1),
            amortization,
            global_regime_is_defense: true,
            hold_mode_active: true,
        };
        let decision = evaluate(&mut state, &ExitIntent::critical("whale sweep"), &ctx, chrono::Utc::now());
        assert_eq!(decision, GovernorDecision::Execute);
    }

    #[test]
    fn ttl_expiry_forces_exit() {
        let mut state = ExitGovernorState::new();
        let t0 = chrono::Utc::now();
        let amortization = evaluate_amortization(500.0, 50.0, 0.01, 1.0, Some(0.02));
        let ctx = ExitGovernorContext {
            hold_time: chrono::Duration::hours(1),
            amortization,
            global_regime_is_defense: false,
            hold_mode_active: false,
        };
        evaluate(&mut state, &ExitIntent::non_critical("x"), &ctx, t0);

        let amortization2 = evaluate_amortization(500.0, 50.0, 0.01, 1.0, Some(0.02));
        let ctx2 = ExitGovernorContext {
            hold_time: chrono::Duration::hours(1),
            amortization: amortization2,
            global_regime_is_defense: false,
            hold_mode_active: false,
        };
        let later = t0 + chrono::Duration::minutes(EXIT_TTL_MINUTES);
        let decision = evaluate(&mut state, &ExitIntent::non_critical("x"), &ctx2, later);
        assert_eq!(decision, GovernorDecision::ForcedExit);
    }

    #[test]
    fn economic_staleness_for_two_consecutive_ticks_forces_exit() {
        let mut state = ExitGovernorState::new();
        let t0 = chrono::Utc::now();
        // Very slow fee velocity => large time-to-cost-target => stale.
        for i in 0..2 {
            let amortization = evaluate_amortization(500.0, 5.0, 0.0001, 1.0, Some(0.05));
            assert!(amortization.economic_staleness);
            let ctx = ExitGovernorContext {
                hold_time: chrono::Duration::hours(5),
                amortization,
                global_regime_is_defense: false,
                hold_mode_active: false,
            };
            let decision = evaluate(&mut state, &ExitIntent::non_critical("x"), &ctx, t0 + chrono::Duration::seconds(i));
            if i == 1 {
                assert_eq!(decision, GovernorDecision::ForcedExit);
            }
        }
    }
}
