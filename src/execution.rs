// =============================================================================
// Execution Engine — the single entry/exit persistence path
// =============================================================================
//
// Grounded on the old execute_proposal's demo/live branching and
// position_engine.rs's open_position/close_position shape, reworked to
// spec's strict ordered sequence. There is exactly one way into persistence
// for a new trade (`enter`) and one way out (`exit`) — no other module
// writes a trades or positions row directly.
// =============================================================================

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::epoch::RunEpoch;
use crate::domain::identity::{preflight, IdentityHints, PoolAddress, PoolIdentity};
use crate::domain::position::Position;
use crate::domain::trade::{ExecutionCosts, ExitFields, Trade, TradeMode, TradeStatus};
use crate::identity_resolver::IdentityResolver;
use crate::persistence::PersistenceStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecutionResult {
    Entered { trade_id: i64 },
    Exited { trade_id: i64, realized_pnl_usd: f64 },
    Blocked(String),
    Error(String),
}

impl std::fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Entered { trade_id } => write!(f, "Entered(trade_id={trade_id})"),
            Self::Exited { trade_id, realized_pnl_usd } => {
                write!(f, "Exited(trade_id={trade_id}, pnl={realized_pnl_usd})")
            }
            Self::Blocked(reason) => write!(f, "Blocked({reason})"),
            Self::Error(err) => write!(f, "Error({err})"),
        }
    }
}

pub struct EntryProposal {
    pub pool: PoolAddress,
    pub mode: TradeMode,
    pub size_usd: f64,
    pub entry_price: f64,
    pub entry_bin: i64,
    pub entry_score: f64,
    pub tier: String,
    pub regime_at_entry: String,
    pub costs: ExecutionCosts,
    pub health_score: f64,
    pub risk_tier: String,
}

pub struct ExecutionEngine {
    pub persistence: Arc<dyn PersistenceStore>,
    pub identity_resolver: Arc<IdentityResolver>,
}

impl ExecutionEngine {
    pub fn new(persistence: Arc<dyn PersistenceStore>, identity_resolver: Arc<IdentityResolver>) -> Self {
        Self { persistence, identity_resolver }
    }

    /// Runs the ordered entry sequence:
    /// 1. Resolve + preflight the pool identity.
    /// 2. Idempotently register the pool row (no-op if already present).
    /// 3. Insert the trade row and obtain the DB-assigned id.
    /// 4. Insert the position row keyed by that id.
    /// 5. Return the trade id — this is the only path by which a trade
    ///    becomes persisted, so a caller never fabricates or pre-assigns one.
    pub async fn enter(&self, proposal: EntryProposal, epoch: &RunEpoch, now: chrono::DateTime<chrono::Utc>) -> ExecutionResult {
        info!(
            pool = %proposal.pool.0,
            size_usd = proposal.size_usd,
            entry_price = proposal.entry_price,
            tier = %proposal.tier,
            "execution: entry proposal received"
        );

        let identity = match self.identity_resolver.resolve(&proposal.pool, &IdentityHints::default()).await {
            Ok(identity) => identity,
            Err(e) => {
                warn!(pool = %proposal.pool.0, error = %e, "execution: identity resolution failed, entry blocked");
                return ExecutionResult::Blocked(format!("identity resolution failed: {e}"));
            }
        };

        if let Err(e) = preflight(&identity) {
            warn!(pool = %proposal.pool.0, error = %e, "execution: preflight rejected pool identity");
            return ExecutionResult::Blocked(format!("preflight failed: {e}"));
        }

        if let Err(e) = self.register_pool_idempotent(&identity).await {
            return ExecutionResult::Error(format!("pool registration failed: {e}"));
        }

        let trade = Trade {
            id: None,
            pool_address: proposal.pool.clone(),
            mode: proposal.mode,
            size_usd: proposal.size_usd,
            entry_price: proposal.entry_price,
            entry_bin: proposal.entry_bin,
            entry_score: proposal.entry_score,
            tier: proposal.tier,
            regime_at_entry: proposal.regime_at_entry,
            entry_timestamp: now,
            costs: proposal.costs,
            status: TradeStatus::Open,
            exit: None,
        };

        let trade_id = match self.persistence.insert_trade(&trade).await {
            Ok(id) => id,
            Err(e) => {
                warn!(pool = %proposal.pool.0, error = %e, "execution: trade insert failed");
                return ExecutionResult::Error(format!("trade insert failed: {e}"));
            }
        };

        let position = Position {
            trade_id,
            pool_address: proposal.pool.clone(),
            entry_price: proposal.entry_price,
            size_usd: proposal.size_usd,
            entry_timestamp: now,
            current_bin: proposal.entry_bin,
            health_score: proposal.health_score,
            risk_tier: proposal.risk_tier,
            run_id: epoch.run_id.clone(),
            closed_at: None,
            exit_reason: None,
            realized_pnl_usd: None,
        };

        if let Err(e) = self.persistence.insert_position(&position).await {
            warn!(trade_id, error = %e, "execution: position insert failed after trade commit");
            return ExecutionResult::Error(format!("position insert failed: {e}"));
        }

        info!(trade_id, pool = %proposal.pool.0, "execution: entry committed");
        ExecutionResult::Entered { trade_id }
    }

    async fn register_pool_idempotent(&self, identity: &PoolIdentity) -> anyhow::Result<()> {
        match self.persistence.load_pool_identity(&identity.pool_address).await? {
            Some(_) => Ok(()),
            None => self.persistence.save_pool_identity(identity).await,
        }
    }

    /// Runs the 2-step exit sequence: close the trade row with final fields,
    /// then close the position row with the realized PnL.
    pub async fn exit(&self, trade_id: i64, exit: ExitFields, exit_reason: &str) -> ExecutionResult {
        let realized_pnl_usd = exit.realized_pnl_usd;

        if let Err(e) = self.persistence.close_trade(trade_id, &exit).await {
            warn!(trade_id, error = %e, "execution: trade close failed");
            return ExecutionResult::Error(format!("trade close failed: {e}"));
        }

        if let Err(e) = self
            .persistence
            .close_position(trade_id, exit.exit_timestamp, exit_reason, realized_pnl_usd)
            .await
        {
            warn!(trade_id, error = %e, "execution: position close failed after trade close committed");
            return ExecutionResult::Error(format!("position close failed: {e}"));
        }

        info!(trade_id, realized_pnl_usd, exit_reason, "execution: exit committed");
        ExecutionResult::Exited { trade_id, realized_pnl_usd }
    }
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine").field("persistence", &"<dyn PersistenceStore>").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity_resolver::ChainDecoder;
    use crate::persistence::SqlitePersistence;

    struct StubDecoder;

    #[async_trait::async_trait]
    impl ChainDecoder for StubDecoder {
        async fn resolve_on_chain_identity(
            &self,
            pool: &PoolAddress,
            _hints: &crate::domain::identity::IdentityHints,
        ) -> Result<PoolIdentity, crate::domain::identity::IdentityFailure> {
            Ok(PoolIdentity {
                pool_address: pool.clone(),
                base_mint: "BASEmint111".into(),
                quote_mint: "QUOTEmint111".into(),
                base_decimals: 9,
                quote_decimals: 6,
                base_symbol: Some("BASE".into()),
                quote_symbol: Some("USDC".into()),
                resolution_source: crate::domain::identity::ResolutionSource::OnChainDecode,
                resolved_at: chrono::Utc::now(),
            })
        }
    }

    fn epoch() -> RunEpoch {
        RunEpoch::new("run-test".into(), 1000.0, chrono::Utc::now())
    }

    #[tokio::test]
    async fn enter_then_exit_round_trip() {
        let persistence: Arc<dyn PersistenceStore> = Arc::new(SqlitePersistence::open_in_memory().unwrap());
        let resolver = Arc::new(IdentityResolver::new(Box::new(StubDecoder), persistence.clone()));
        let engine = ExecutionEngine::new(persistence, resolver);

        let proposal = EntryProposal {
            pool: PoolAddress::from("pool1"),
            mode: TradeMode::Paper,
            size_usd: 500.0,
            entry_price: 1.0,
            entry_bin: 100,
            entry_score: 75.0,
            tier: "standard".into(),
            regime_at_entry: "NEUTRAL".into(),
            costs: ExecutionCosts { entry_fees_usd: 1.5, entry_slippage_usd: 1.0, entry_asset_value_usd: 500.0 },
            health_score: 1.0,
            risk_tier: "standard".into(),
        };

        let result = engine.enter(proposal, &epoch(), chrono::Utc::now()).await;
        let trade_id = match result {
            ExecutionResult::Entered { trade_id } => trade_id,
            other => panic!("expected Entered, got {other}"),
        };

        let exit = ExitFields {
            exit_price: 1.05,
            exit_timestamp: chrono::Utc::now(),
            exit_fees_usd: 1.5,
            exit_slippage_usd: 1.0,
            realized_pnl_usd: 20.0,
            realized_pnl_pct: 4.0,
            exit_reason: "signal".into(),
        };
        let result = engine.exit(trade_id, exit, "signal").await;
        match result {
            ExecutionResult::Exited { trade_id: id, realized_pnl_usd } => {
                assert_eq!(id, trade_id);
                assert_eq!(realized_pnl_usd, 20.0);
            }
            other => panic!("expected Exited, got {other}"),
        }
    }
}
