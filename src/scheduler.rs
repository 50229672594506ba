// =============================================================================
// Scheduler — single-threaded cooperative per-tick loop
// =============================================================================
//
// Grounded on main.rs's tokio::spawn-per-concern structure, but consolidated
// into one task that processes the active pool set strictly sequentially
// within a tick — no per-pool tokio::spawn — matching the "no parallel pool
// processing within a tick" requirement. Ambient concerns unrelated to pool
// processing (the read-only dashboard API) remain separate spawned tasks,
// same as the old market-data stream tasks sat alongside the strategy loop.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::congestion_governor::CongestionGovernor;
use crate::cycle_phase::{self, CyclePhase};
use crate::domain::epoch::{ReconciliationSeal, RunEpoch};
use crate::domain::exit_state::ExitGovernorState;
use crate::domain::identity::{IdentityHints, PoolAddress};
use crate::domain::lifecycle::{EntrySnapshot, PoolEvent, PoolLifecycle, PoolState};
use crate::domain::position::Position;
use crate::domain::snapshot::SnapshotHistory;
use crate::exit_governor::{self, ExitGovernorContext, ExitIntent, GovernorDecision};
use crate::execution::{EntryProposal, ExecutionEngine, ExecutionResult};
use crate::funnel::DiscoveryCandidate;
use crate::identity_resolver::IdentityResolver;
use crate::microstructure;
use crate::no_trade::{self, GlobalRegime, RegimeInputs};
use crate::persistence::PersistenceStore;
use crate::telemetry::{CommitmentLevel, GatedTelemetryFetcher, TelemetryFetcher};

const READY_ENTRY_THRESHOLD: f64 = 65.0;
const ENTRY_SIZE_USD: f64 = 500.0;

/// Derives the migration-direction entropy and max-bins-crossed inputs the
/// cycle-phase gate needs from recorded history, rather than the hardcoded
/// always-zero stand-ins the entry gate and exit governor used to see.
fn bin_delta_metrics(history: &SnapshotHistory) -> (f64, i64) {
    let bins: Vec<i64> = history.iter().map(|s| s.active_bin).collect();
    let deltas: Vec<i64> = bins.windows(2).map(|w| w[1] - w[0]).collect();
    let migration = microstructure::migration_direction_entropy(&deltas);
    let max_bins_crossed = deltas.iter().map(|d| d.abs()).max().unwrap_or(0);
    (migration, max_bins_crossed)
}

struct PoolRuntime {
    history: SnapshotHistory,
    lifecycle: PoolLifecycle,
    exit_state: ExitGovernorState,
    trade_id: Option<i64>,
}

impl PoolRuntime {
    fn new(capacity: usize, min_interval_secs: i64, is_memecoin: bool) -> Self {
        Self {
            history: SnapshotHistory::with_params(capacity, min_interval_secs),
            lifecycle: PoolLifecycle::new(is_memecoin),
            exit_state: ExitGovernorState::new(),
            trade_id: None,
        }
    }
}

pub struct Scheduler<F: TelemetryFetcher> {
    persistence: Arc<dyn PersistenceStore>,
    identity_resolver: Arc<IdentityResolver>,
    execution: Arc<ExecutionEngine>,
    telemetry: GatedTelemetryFetcher<F>,
    congestion: Mutex<CongestionGovernor>,
    pools: Mutex<HashMap<PoolAddress, PoolRuntime>>,
    epoch: RunEpoch,
    seal: ReconciliationSeal,
    snapshot_history_capacity: usize,
    snapshot_min_interval_secs: i64,
}

impl<F: TelemetryFetcher> Scheduler<F> {
    pub fn new(
        persistence: Arc<dyn PersistenceStore>,
        identity_resolver: Arc<IdentityResolver>,
        execution: Arc<ExecutionEngine>,
        telemetry: GatedTelemetryFetcher<F>,
        epoch: RunEpoch,
        seal: ReconciliationSeal,
        snapshot_history_capacity: usize,
        snapshot_min_interval_secs: i64,
    ) -> Self {
        Self {
            persistence,
            identity_resolver,
            execution,
            telemetry,
            congestion: Mutex::new(CongestionGovernor::new()),
            pools: Mutex::new(HashMap::new()),
            epoch,
            seal,
            snapshot_history_capacity,
            snapshot_min_interval_secs,
        }
    }

    /// Runs one scheduler tick against the union of the freshly discovered
    /// candidate set and every pool currently POSITIONED. A positioned pool
    /// that falls out of this tick's discovery top-N must still be ticked —
    /// otherwise its Exit Governor never runs again and it is stuck
    /// positioned forever. Pools are processed strictly one at a time — no
    /// `tokio::spawn` inside the loop body.
    pub async fn tick(&self, candidates: &[DiscoveryCandidate], regime_inputs: &RegimeInputs, now: chrono::DateTime<chrono::Utc>) {
        let regime_verdict = no_trade::evaluate(regime_inputs);
        let global_regime = no_trade::classify_global(regime_inputs, 0.0);

        if regime_verdict.blocked {
            warn!(
                reason = ?regime_verdict.reason,
                cooldown_secs = regime_verdict.cooldown_secs,
                "scheduler: no-trade regime active — entries suppressed this tick"
            );
        }

        let congestion_verdict = self.congestion.lock().evaluate(now, 0.05, 0);
        if congestion_verdict.block_trading {
            warn!(score = congestion_verdict.score, "scheduler: congestion governor blocking trading this tick");
        }

        self.advance_active_cooldowns(now);

        let candidate_addrs: HashSet<&PoolAddress> = candidates.iter().map(|c| &c.pool_address).collect();
        let rediscovered_positioned: Vec<DiscoveryCandidate> = {
            let pools = self.pools.lock();
            pools
                .iter()
                .filter(|(addr, runtime)| {
                    runtime.lifecycle.state == PoolState::Positioned && !candidate_addrs.contains(addr)
                })
                .map(|(addr, _)| DiscoveryCandidate {
                    pool_address: addr.clone(),
                    base_mint: String::new(),
                    quote_mint: String::new(),
                    discovery_score: 0.0,
                })
                .collect()
        };

        for candidate in candidates.iter().chain(rediscovered_positioned.iter()) {
            self.process_pool(candidate, &regime_verdict, global_regime, &congestion_verdict, now).await;
        }
    }

    /// Hydrates the in-memory pool table from the sealed set of open
    /// positions at startup, so exit evaluation runs for them on the very
    /// first tick rather than waiting for rediscovery to repopulate `pools`.
    /// Bypasses `PoolLifecycle::apply` — this restores prior state rather
    /// than replaying the event history that produced it.
    pub fn hydrate_sealed_positions(&self, positions: &[Position]) {
        let mut pools = self.pools.lock();
        for position in positions {
            let mut runtime = PoolRuntime::new(self.snapshot_history_capacity, self.snapshot_min_interval_secs, false);
            let verdict = crate::domain::verdict::MicrostructureVerdict {
                bin_velocity_score: 0.0,
                liquidity_flow_score: 0.0,
                swap_velocity_score: 0.0,
                fee_intensity_score: 0.0,
                raw_bin_velocity: 0.0,
                raw_liquidity_flow: 0.0,
                raw_swap_velocity: 0.0,
                raw_fee_intensity: 0.0,
                pool_entropy: 0.0,
                composite_score: position.health_score * 100.0,
                market_alive: true,
                gating_reasons: vec![],
                snapshot_count: 0,
                window_start: position.entry_timestamp,
                window_end: position.entry_timestamp,
            };
            runtime.lifecycle.state = PoolState::Positioned;
            runtime.lifecycle.entry = Some(EntrySnapshot {
                price: position.entry_price,
                bin: position.current_bin,
                size_usd: position.size_usd,
                verdict,
                timestamp: position.entry_timestamp,
            });
            runtime.trade_id = Some(position.trade_id);
            pools.insert(position.pool_address.clone(), runtime);
        }
    }

    /// Count of pools currently held in the POSITIONED state — used at
    /// startup to verify hydration actually reproduced the sealed count.
    pub fn positioned_pool_count(&self) -> usize {
        self.pools.lock().values().filter(|r| r.lifecycle.state == PoolState::Positioned).count()
    }

    fn advance_active_cooldowns(&self, now: chrono::DateTime<chrono::Utc>) {
        let mut pools = self.pools.lock();
        for runtime in pools.values_mut() {
            if runtime.lifecycle.state == PoolState::Cooldown && runtime.lifecycle.cooldown_has_expired(now) {
                if let Err(e) = runtime.lifecycle.apply(PoolEvent::CooldownExpired) {
                    warn!(error = %e, "scheduler: cooldown-expired transition rejected");
                }
            }
        }
    }

    async fn process_pool(
        &self,
        candidate: &DiscoveryCandidate,
        regime_verdict: &no_trade::RegimeVerdict,
        global_regime: GlobalRegime,
        congestion_verdict: &crate::congestion_governor::CongestionVerdict,
        now: chrono::DateTime<chrono::Utc>,
    ) {
        let hints = IdentityHints {
            base_mint: Some(candidate.base_mint.clone()),
            quote_mint: Some(candidate.quote_mint.clone()),
            base_symbol: None,
            quote_symbol: None,
        };

        let identity = match self.identity_resolver.resolve(&candidate.pool_address, &hints).await {
            Ok(identity) => identity,
            Err(e) => {
                warn!(pool = %candidate.pool_address, error = %e, "scheduler: identity resolution failed, skipping pool this tick");
                return;
            }
        };

        let snapshot = match self.telemetry.fetch(&identity, CommitmentLevel::Confirmed).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(pool = %candidate.pool_address, error = %e, "scheduler: telemetry fetch failed, skipping pool this tick");
                return;
            }
        };

        // All synchronous history/FSM bookkeeping happens under one short
        // lock acquisition; the guard is dropped before any further await so
        // the lock is never held across a suspension point.
        let (verdict, phase, gate_passed, state, latest_bin, open_trade, migration, max_bins_crossed) = {
            let mut pools = self.pools.lock();
            let runtime = pools.entry(candidate.pool_address.clone()).or_insert_with(|| {
                PoolRuntime::new(self.snapshot_history_capacity, self.snapshot_min_interval_secs, false)
            });

            let was_empty = runtime.history.is_empty();
            runtime.history.record(snapshot);
            if was_empty {
                let _ = runtime.lifecycle.apply(PoolEvent::FirstSnapshot);
            }

            let verdict = match microstructure::score_history(&runtime.history) {
                Some(v) => v,
                None => return,
            };
            let phase = cycle_phase::classify(&runtime.history);
            let (migration, max_bins_crossed) = bin_delta_metrics(&runtime.history);

            let gate_passed = verdict.market_alive
                && verdict.composite_score >= READY_ENTRY_THRESHOLD
                && phase.permits_entry()
                && !cycle_phase::entry_blocked(migration, max_bins_crossed)
                && !regime_verdict.blocked
                && !congestion_verdict.block_trading;

            if runtime.lifecycle.state == PoolState::Observe || runtime.lifecycle.state == PoolState::Ready {
                let _ = runtime.lifecycle.apply(PoolEvent::VerdictArrived { gate_passed });
            }

            let latest_bin = runtime.history.latest().map(|s| s.active_bin).unwrap_or(0);
            let open_trade = runtime.trade_id.zip(runtime.lifecycle.entry.clone());
            (verdict, phase, gate_passed, runtime.lifecycle.state, latest_bin, open_trade, migration, max_bins_crossed)
        };

        if state == PoolState::Ready && gate_passed {
            self.try_enter(candidate, &verdict, global_regime, latest_bin, now).await;
        } else if state == PoolState::Positioned {
            if let Some((trade_id, entry)) = open_trade {
                self.evaluate_exit(candidate, &verdict, phase, migration, max_bins_crossed, global_regime, trade_id, entry, now).await;
            }
        }
    }

    async fn try_enter(
        &self,
        candidate: &DiscoveryCandidate,
        verdict: &crate::domain::verdict::MicrostructureVerdict,
        global_regime: GlobalRegime,
        latest_bin: i64,
        now: chrono::DateTime<chrono::Utc>,
    ) {
        let proposal = EntryProposal {
            pool: candidate.pool_address.clone(),
            mode: crate::domain::trade::TradeMode::Paper,
            size_usd: ENTRY_SIZE_USD,
            entry_price: 1.0,
            entry_bin: latest_bin,
            entry_score: verdict.composite_score,
            tier: "standard".into(),
            regime_at_entry: global_regime.to_string(),
            costs: crate::domain::trade::ExecutionCosts {
                entry_fees_usd: ENTRY_SIZE_USD * 0.003,
                entry_slippage_usd: ENTRY_SIZE_USD * 0.002,
                entry_asset_value_usd: ENTRY_SIZE_USD,
            },
            health_score: verdict.composite_score / 100.0,
            risk_tier: "standard".into(),
        };

        match self.execution.enter(proposal, &self.epoch, now).await {
            ExecutionResult::Entered { trade_id } => {
                let mut pools = self.pools.lock();
                if let Some(runtime) = pools.get_mut(&candidate.pool_address) {
                    runtime.trade_id = Some(trade_id);
                    if let Err(e) = runtime.lifecycle.apply(PoolEvent::Enter {
                        price: 1.0,
                        bin: latest_bin,
                        size_usd: ENTRY_SIZE_USD,
                        verdict: verdict.clone(),
                        now,
                    }) {
                        warn!(pool = %candidate.pool_address, error = %e, "scheduler: FSM refused Enter after execution committed it");
                    }
                }
                info!(pool = %candidate.pool_address, trade_id, "scheduler: entry executed");
            }
            other => {
                warn!(pool = %candidate.pool_address, result = %other, "scheduler: entry not executed");
            }
        }
    }

    async fn evaluate_exit(
        &self,
        candidate: &DiscoveryCandidate,
        verdict: &crate::domain::verdict::MicrostructureVerdict,
        phase: CyclePhase,
        migration: f64,
        max_bins_crossed: i64,
        global_regime: GlobalRegime,
        trade_id: i64,
        entry: crate::domain::lifecycle::EntrySnapshot,
        now: chrono::DateTime<chrono::Utc>,
    ) {
        let critical = cycle_phase::exit_mandated(phase, migration, max_bins_crossed);

        let hold_time = now - entry.timestamp;
        let hold_hours = (hold_time.num_milliseconds() as f64 / 3_600_000.0).max(0.0);
        let amortization = exit_governor::evaluate_amortization(
            entry.size_usd,
            hold_hours,
            verdict.raw_fee_intensity,
            1.0,
            None,
        );

        let intent = if critical {
            ExitIntent::critical("cycle-phase mandated exit")
        } else if !verdict.market_alive {
            ExitIntent::non_critical("microstructure gate failed")
        } else {
            return;
        };

        let ctx = ExitGovernorContext {
            hold_time,
            amortization,
            global_regime_is_defense: global_regime == GlobalRegime::Defense,
            hold_mode_active: false,
        };

        let decision = {
            let mut pools = self.pools.lock();
            match pools.get_mut(&candidate.pool_address) {
                Some(runtime) => exit_governor::evaluate(&mut runtime.exit_state, &intent, &ctx, now),
                None => return,
            }
        };

        match decision {
            GovernorDecision::Execute | GovernorDecision::ForcedExit => {
                let exit_fields = crate::domain::trade::ExitFields {
                    exit_price: 1.0,
                    exit_timestamp: now,
                    exit_fees_usd: entry.size_usd * 0.003,
                    exit_slippage_usd: entry.size_usd * 0.002,
                    realized_pnl_usd: 0.0,
                    realized_pnl_pct: 0.0,
                    exit_reason: intent.reason.clone(),
                };
                let result = self.execution.exit(trade_id, exit_fields, &intent.reason).await;
                if matches!(result, ExecutionResult::Exited { .. }) {
                    let mut pools = self.pools.lock();
                    if let Some(runtime) = pools.get_mut(&candidate.pool_address) {
                        if let Err(e) = runtime.lifecycle.apply(PoolEvent::Exit { reason: intent.reason.clone(), now }) {
                            warn!(pool = %candidate.pool_address, error = %e, "scheduler: FSM refused Exit after execution committed it");
                        }
                        runtime.trade_id = None;
                    }
                    info!(pool = %candidate.pool_address, trade_id, "scheduler: exit executed");
                }
            }
            GovernorDecision::Suppress(reason) => {
                info!(pool = %candidate.pool_address, %reason, "scheduler: exit suppressed this tick");
            }
        }
    }

    pub fn authorized_open_trade_count(&self) -> usize {
        self.seal.open_count()
    }
}
