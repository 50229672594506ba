// =============================================================================
// Pool Lifecycle FSM — tagged sum type, total transition function
// =============================================================================
//
// Grounded on position_engine::PositionStatus's enum+Display discipline and
// exit/triple_barrier.rs's "one mutator, total over all (state, event) pairs"
// style. No string-keyed states: every transition is a match over a closed
// enum.
// =============================================================================

use serde::{Deserialize, Serialize};

use super::verdict::MicrostructureVerdict;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolState {
    Idle,
    Observe,
    Ready,
    Positioned,
    Exited,
    Cooldown,
}

impl std::fmt::Display for PoolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PoolState::Idle => "IDLE",
            PoolState::Observe => "OBSERVE",
            PoolState::Ready => "READY",
            PoolState::Positioned => "POSITIONED",
            PoolState::Exited => "EXITED",
            PoolState::Cooldown => "COOLDOWN",
        };
        write!(f, "{s}")
    }
}

/// Recorded at the moment a position is opened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntrySnapshot {
    pub price: f64,
    pub bin: i64,
    pub size_usd: f64,
    pub verdict: MicrostructureVerdict,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Recorded at the moment a position is closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitSnapshot {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolLifecycle {
    pub state: PoolState,
    pub consecutive_good: u32,
    pub entry: Option<EntrySnapshot>,
    pub exit: Option<ExitSnapshot>,
    pub cooldown_expiry: Option<chrono::DateTime<chrono::Utc>>,
    pub is_memecoin: bool,
}

impl PoolLifecycle {
    pub fn new(is_memecoin: bool) -> Self {
        Self {
            state: PoolState::Idle,
            consecutive_good: 0,
            entry: None,
            exit: None,
            cooldown_expiry: None,
            is_memecoin,
        }
    }
}

/// Every mutation of a `PoolLifecycle` happens through one of these events.
pub enum PoolEvent {
    /// First snapshot recorded for this pool.
    FirstSnapshot,
    /// A verdict arrived; carries whether it satisfies the full READY gate
    /// (composite ≥ entry threshold, whale impact ≤ 25, migration < 0.20,
    /// crowd count ≥ 8 — computed by the caller, this event only carries the
    /// boolean outcome so the FSM stays a pure state machine over outcomes).
    VerdictArrived { gate_passed: bool },
    /// A single entry executes. No DCA, no stacking.
    Enter {
        price: f64,
        bin: i64,
        size_usd: f64,
        verdict: MicrostructureVerdict,
        now: chrono::DateTime<chrono::Utc>,
    },
    /// An unsuppressed exit trigger fired.
    Exit {
        reason: String,
        now: chrono::DateTime<chrono::Utc>,
    },
    /// Cooldown timer expired.
    CooldownExpired,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum FsmError {
    #[error("re-entry refused: pool is in state {0}, not READY")]
    NotReady(PoolStateDebug),
    #[error("cooldown not yet expired")]
    CooldownNotExpired,
    #[error("event {event} is not valid in state {state}")]
    InvalidTransition { state: PoolStateDebug, event: &'static str },
}

/// Wrapper so `PoolState` can appear in an error without requiring `Display`
/// bounds leak into `thiserror`'s derive in a way that fights the enum impl above.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStateDebug(pub PoolState);

impl std::fmt::Display for PoolStateDebug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

const STANDARD_COOLDOWN_MINS: i64 = 5;
const MEMECOIN_COOLDOWN_MINS: i64 = 15;
const READY_CONSECUTIVE_GOOD: u32 = 2;

impl PoolLifecycle {
    /// Total transition function: `(state, event) -> state`. The only
    /// permitted mutator for `PoolLifecycle`.
    pub fn apply(&mut self, event: PoolEvent) -> Result<(), FsmError> {
        match (self.state, event) {
            (PoolState::Idle, PoolEvent::FirstSnapshot) => {
                self.state = PoolState::Observe;
                self.consecutive_good = 0;
                Ok(())
            }

            (PoolState::Observe, PoolEvent::VerdictArrived { gate_passed }) => {
                if gate_passed {
                    self.consecutive_good += 1;
                    if self.consecutive_good >= READY_CONSECUTIVE_GOOD {
                        self.state = PoolState::Ready;
                    }
                } else {
                    self.consecutive_good = 0;
                }
                Ok(())
            }
            // Already-ready pools keep absorbing verdicts; a failing one
            // resets the streak but the state stays READY — re-entry still
            // requires `gate_passed` at the call site, and this keeps the
            // transition graph forward-only (no READY -> OBSERVE edge).
            (PoolState::Ready, PoolEvent::VerdictArrived { gate_passed }) => {
                if !gate_passed {
                    self.consecutive_good = 0;
                }
                Ok(())
            }

            (PoolState::Ready, PoolEvent::Enter { price, bin, size_usd, verdict, now }) => {
                self.entry = Some(EntrySnapshot { price, bin, size_usd, verdict, timestamp: now });
                self.state = PoolState::Positioned;
                Ok(())
            }
            (state, PoolEvent::Enter { .. }) => Err(FsmError::NotReady(PoolStateDebug(state))),

            (PoolState::Positioned, PoolEvent::Exit { reason, now }) => {
                self.exit = Some(ExitSnapshot { timestamp: now, reason });
                self.state = PoolState::Exited;
                let mins = if self.is_memecoin {
                    MEMECOIN_COOLDOWN_MINS
                } else {
                    STANDARD_COOLDOWN_MINS
                };
                self.cooldown_expiry = Some(now + chrono::Duration::minutes(mins));
                self.state = PoolState::Cooldown;
                Ok(())
            }
            (state, PoolEvent::Exit { .. }) => Err(FsmError::InvalidTransition {
                state: PoolStateDebug(state),
                event: "Exit",
            }),

            (PoolState::Cooldown, PoolEvent::CooldownExpired) => {
                self.state = PoolState::Idle;
                self.consecutive_good = 0;
                self.entry = None;
                self.exit = None;
                self.cooldown_expiry = None;
                Ok(())
            }
            (state, PoolEvent::CooldownExpired) => Err(FsmError::InvalidTransition {
                state: PoolStateDebug(state),
                event: "CooldownExpired",
            }),

            (state, PoolEvent::FirstSnapshot) => Err(FsmError::InvalidTransition {
                state: PoolStateDebug(state),
                event: "FirstSnapshot",
            }),
            (state, PoolEvent::VerdictArrived { .. }) => Err(FsmError::InvalidTransition {
                state: PoolStateDebug(state),
                event: "VerdictArrived",
            }),
        }
    }

    pub fn cooldown_remaining(&self, now: chrono::DateTime<chrono::Utc>) -> Option<chrono::Duration> {
        self.cooldown_expiry.map(|expiry| expiry - now)
    }

    pub fn cooldown_has_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        matches!(self.cooldown_expiry, Some(expiry) if now >= expiry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_verdict() -> MicrostructureVerdict {
        MicrostructureVerdict {
            bin_velocity_score: 100.0,
            liquidity_flow_score: 80.0,
            swap_velocity_score: 62.0,
            fee_intensity_score: 50.0,
            raw_bin_velocity: 0.25,
            raw_liquidity_flow: 0.01,
            raw_swap_velocity: 0.625,
            raw_fee_intensity: 0.001,
            pool_entropy: 0.7,
            composite_score: 75.0,
            market_alive: true,
            gating_reasons: vec![],
            snapshot_count: 3,
            window_start: chrono::Utc::now(),
            window_end: chrono::Utc::now(),
        }
    }

    #[test]
    fn no_entry_without_two_consecutive_good_verdicts() {
        let mut fsm = PoolLifecycle::new(false);
        fsm.apply(PoolEvent::FirstSnapshot).unwrap();
        assert_eq!(fsm.state, PoolState::Observe);

        fsm.apply(PoolEvent::VerdictArrived { gate_passed: true }).unwrap();
        assert_eq!(fsm.state, PoolState::Observe);

        let now = chrono::Utc::now();
        let enter_err = fsm.apply(PoolEvent::Enter {
            price: 1.0,
            bin: 100,
            size_usd: 500.0,
            verdict: dummy_verdict(),
            now,
        });
        assert!(enter_err.is_err());

        fsm.apply(PoolEvent::VerdictArrived { gate_passed: true }).unwrap();
        assert_eq!(fsm.state, PoolState::Ready);
    }

    #[test]
    fn failing_verdict_resets_consecutive_counter() {
        let mut fsm = PoolLifecycle::new(false);
        fsm.apply(PoolEvent::FirstSnapshot).unwrap();
        fsm.apply(PoolEvent::VerdictArrived { gate_passed: true }).unwrap();
        fsm.apply(PoolEvent::VerdictArrived { gate_passed: false }).unwrap();
        assert_eq!(fsm.consecutive_good, 0);
        assert_eq!(fsm.state, PoolState::Observe);
    }

    #[test]
    fn full_cycle_standard_pool_cooldown_is_five_minutes() {
        let mut fsm = PoolLifecycle::new(false);
        fsm.apply(PoolEvent::FirstSnapshot).unwrap();
        fsm.apply(PoolEvent::VerdictArrived { gate_passed: true }).unwrap();
        fsm.apply(PoolEvent::VerdictArrived { gate_passed: true }).unwrap();
        assert_eq!(fsm.state, PoolState::Ready);

        let now = chrono::Utc::now();
        fsm.apply(PoolEvent::Enter {
            price: 1.0,
            bin: 100,
            size_usd: 500.0,
            verdict: dummy_verdict(),
            now,
        })
        .unwrap();
        assert_eq!(fsm.state, PoolState::Positioned);

        fsm.apply(PoolEvent::Exit { reason: "test".into(), now }).unwrap();
        assert_eq!(fsm.state, PoolState::Cooldown);
        let remaining = fsm.cooldown_remaining(now).unwrap();
        assert_eq!(remaining.num_minutes(), 5);

        assert!(!fsm.cooldown_has_expired(now + chrono::Duration::minutes(4)));
        assert!(fsm.cooldown_has_expired(now + chrono::Duration::minutes(5)));

        fsm.apply(PoolEvent::CooldownExpired).unwrap();
        assert_eq!(fsm.state, PoolState::Idle);
        assert_eq!(fsm.consecutive_good, 0);
        assert!(fsm.entry.is_none());
    }

    #[test]
    fn memecoin_cooldown_is_fifteen_minutes() {
        let mut fsm = PoolLifecycle::new(true);
        fsm.apply(PoolEvent::FirstSnapshot).unwrap();
        fsm.apply(PoolEvent::VerdictArrived { gate_passed: true }).unwrap();
        fsm.apply(PoolEvent::VerdictArrived { gate_passed: true }).unwrap();
        let now = chrono::Utc::now();
        fsm.apply(PoolEvent::Enter {
            price: 1.0,
            bin: 100,
            size_usd: 500.0,
            verdict: dummy_verdict(),
            now,
        })
        .unwrap();
        fsm.apply(PoolEvent::Exit { reason: "test".into(), now }).unwrap();
        assert_eq!(fsm.cooldown_remaining(now).unwrap().num_minutes(), 15);
    }

    #[test]
    fn reentry_refused_while_not_ready() {
        let mut fsm = PoolLifecycle::new(false);
        let now = chrono::Utc::now();
        let err = fsm.apply(PoolEvent::Enter {
            price: 1.0,
            bin: 1,
            size_usd: 1.0,
            verdict: dummy_verdict(),
            now,
        });
        assert!(matches!(err, Err(FsmError::NotReady(_))));
    }
}
