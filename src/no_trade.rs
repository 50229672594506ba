// =============================================================================
// No-Trade Regime — independent triggers + combined weak-regime check
// =============================================================================
//
// Grounded on regime/detector.rs's ordered-trigger classification and
// risk.rs's multi-breaker aggregation (`can_trade()`-style combinator). The
// teacher's five-bucket MarketRegime enum (Trending/Ranging/Volatile/
// Squeeze/Dead) is not reused here: spec §4.6 defines this module by
// independent triggers over aggregate signals, not by a fixed classification
// enum. See DESIGN.md for the separate GlobalRegime mapping consulted by the
// Exit Governor's DEFENSE check.
// =============================================================================

use serde::{Deserialize, Serialize};

const CONSISTENCY_FLOOR: f64 = 0.35;
const ENTROPY_CEILING: f64 = 0.80;
const MIGRATION_CONFIDENCE_FLOOR: f64 = 0.25;
const LIQUIDITY_FLOW_FLOOR: f64 = 0.20;
const VELOCITY_FLOOR: f64 = 0.10;
const WEAK_REGIME_FLOOR: f64 = 0.40;
const SENTIMENT_FLOOR: f64 = 10.0;

const BASE_COOLDOWN_SECS: u64 = 60;
const MAX_COOLDOWN_SECS: u64 = 600;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeInputs {
    pub consistency: f64,
    pub entropy: f64,
    pub migration_confidence: f64,
    pub liquidity_flow: f64,
    pub velocity: f64,
    pub sentiment: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegimeTrigger {
    UnreliableSignals,
    Chaos,
    UnclearDirection,
    Thin,
    Dead,
    WeakRegime,
    SentimentGate,
}

impl std::fmt::Display for RegimeTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RegimeTrigger::UnreliableSignals => "unreliable signals",
            RegimeTrigger::Chaos => "chaos",
            RegimeTrigger::UnclearDirection => "unclear direction",
            RegimeTrigger::Thin => "thin",
            RegimeTrigger::Dead => "dead",
            RegimeTrigger::WeakRegime => "weak regime",
            RegimeTrigger::SentimentGate => "sentiment gate",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeVerdict {
    pub blocked: bool,
    pub reason: Option<String>,
    pub cooldown_secs: u64,
    pub triggers: Vec<RegimeTrigger>,
}

pub fn evaluate(inputs: &RegimeInputs) -> RegimeVerdict {
    let mut triggers = Vec::new();

    if inputs.consistency < CONSISTENCY_FLOOR {
        triggers.push(RegimeTrigger::UnreliableSignals);
    }
    if inputs.entropy > ENTROPY_CEILING {
        triggers.push(RegimeTrigger::Chaos);
    }
    if inputs.migration_confidence < MIGRATION_CONFIDENCE_FLOOR {
        triggers.push(RegimeTrigger::UnclearDirection);
    }
    if inputs.liquidity_flow < LIQUIDITY_FLOW_FLOOR {
        triggers.push(RegimeTrigger::Thin);
    }
    if inputs.velocity < VELOCITY_FLOOR {
        triggers.push(RegimeTrigger::Dead);
    }

    if triggers.is_empty() {
        let mean = (inputs.consistency
            + (1.0 - inputs.entropy)
            + inputs.migration_confidence
            + inputs.liquidity_flow
            + inputs.velocity)
            / 5.0;
        if mean < WEAK_REGIME_FLOOR {
            triggers.push(RegimeTrigger::WeakRegime);
        }
    }

    // Sentiment gate is distinct: it can block even when every other signal
    // is clean, and is independent of the trigger-count-based cooldown sizing.
    let sentiment_blocks = inputs.sentiment < SENTIMENT_FLOOR;
    if sentiment_blocks {
        triggers.push(RegimeTrigger::SentimentGate);
    }

    let blocked = !triggers.is_empty();
    let cooldown_secs = if blocked {
        (BASE_COOLDOWN_SECS * triggers.len() as u64).min(MAX_COOLDOWN_SECS)
    } else {
        0
    };

    let reason = if blocked {
        Some(triggers.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(", "))
    } else {
        None
    };

    RegimeVerdict { blocked, reason, cooldown_secs, triggers }
}

/// A different, coarser axis than per-pool microstructure: the aggregate
/// market classification spec's glossary names. Computed from funnel-wide
/// aggregates and consulted only by the Exit Governor's DEFENSE override and
/// by this module's cooldown sizing — it is not an input to per-pool FSM
/// transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GlobalRegime {
    Bull,
    Bear,
    Neutral,
    Chaos,
    Defense,
}

impl std::fmt::Display for GlobalRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GlobalRegime::Bull => "BULL",
            GlobalRegime::Bear => "BEAR",
            GlobalRegime::Neutral => "NEUTRAL",
            GlobalRegime::Chaos => "CHAOS",
            GlobalRegime::Defense => "DEFENSE",
        };
        write!(f, "{s}")
    }
}

/// Derives the coarse global regime from the same aggregate inputs as
/// `evaluate`, plus a directional bias signal.
pub fn classify_global(inputs: &RegimeInputs, directional_bias: f64) -> GlobalRegime {
    if inputs.entropy > ENTROPY_CEILING || inputs.consistency < CONSISTENCY_FLOOR {
        return GlobalRegime::Chaos;
    }
    if inputs.sentiment < SENTIMENT_FLOOR || inputs.velocity < VELOCITY_FLOOR {
        return GlobalRegime::Defense;
    }
    if directional_bias > 0.15 {
        GlobalRegime::Bull
    } else if directional_bias < -0.15 {
        GlobalRegime::Bear
    } else {
        GlobalRegime::Neutral
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario E from spec §8: four triggers fire, cooldown = min(4*base, cap).
    #[test]
    fn scenario_e_four_triggers_fire() {
        let inputs = RegimeInputs {
            consistency: 0.30,
            entropy: 0.85,
            migration_confidence: 0.20,
            liquidity_flow: 0.15,
            velocity: 0.05,
            sentiment: 50.0,
        };
        let verdict = evaluate(&inputs);
        assert!(verdict.blocked);
        assert_eq!(verdict.triggers.len(), 4);
        assert!(verdict.triggers.contains(&RegimeTrigger::UnreliableSignals));
        assert!(verdict.triggers.contains(&RegimeTrigger::Chaos));
        assert!(verdict.triggers.contains(&RegimeTrigger::UnclearDirection));
        assert!(verdict.triggers.contains(&RegimeTrigger::Thin));
        assert_eq!(verdict.cooldown_secs, (BASE_COOLDOWN_SECS * 4).min(MAX_COOLDOWN_SECS));
    }

    #[test]
    fn clean_signals_and_good_sentiment_do_not_block() {
        let inputs = RegimeInputs {
            consistency: 0.9,
            entropy: 0.3,
            migration_confidence: 0.9,
            liquidity_flow: 0.9,
            velocity: 0.9,
            sentiment: 80.0,
        };
        let verdict = evaluate(&inputs);
        assert!(!verdict.blocked);
        assert!(verdict.triggers.is_empty());
    }

    #[test]
    fn sentiment_gate_blocks_even_with_clean_signals() {
        let inputs = RegimeInputs {
            consistency: 0.9,
            entropy: 0.3,
            migration_confidence: 0.9,
            liquidity_flow: 0.9,
            velocity: 0.9,
            sentiment: 5.0,
        };
        let verdict = evaluate(&inputs);
        assert!(verdict.blocked);
        assert!(verdict.triggers.contains(&RegimeTrigger::SentimentGate));
    }

    #[test]
    fn weak_regime_fires_when_no_individual_trigger_but_mean_is_low() {
        let inputs = RegimeInputs {
            consistency: 0.36,
            entropy: 0.79,
            migration_confidence: 0.26,
            liquidity_flow: 0.21,
            velocity: 0.11,
            sentiment: 80.0,
        };
        let verdict = evaluate(&inputs);
        assert!(verdict.triggers.contains(&RegimeTrigger::WeakRegime));
    }
}
