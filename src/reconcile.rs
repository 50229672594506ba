// =============================================================================
// Run Epoch & Reconciliation Seal
// =============================================================================
//
// SAFETY POLICY: this module never closes or opens anything on its own. It
// decides, once at startup, the authoritative set of trade ids the rest of
// the process is permitted to treat as open for the coming run epoch. Any
// in-memory claim of an open trade that persistence does not corroborate is
// dropped with a warning rather than silently trusted — the same posture the
// old reconciliation engine took toward balance drift, aimed here at trade
// ids instead of balances.
// =============================================================================

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::domain::epoch::{ReconciliationSeal, RunEpoch};
use crate::domain::position::Position;
use crate::persistence::PersistenceStore;

pub struct SealResult {
    pub epoch: RunEpoch,
    pub seal: ReconciliationSeal,
    pub dropped_unauthorized: Vec<i64>,
    /// The exact rows the seal authorized — the caller hydrates the
    /// scheduler's pool table from these so the authorized set actually
    /// becomes the in-memory active set, not just a count on the side.
    pub positions: Vec<Position>,
}

/// Seals the run epoch against persistence's own open-position table.
///
/// The authoritative id set comes from `load_open_positions` (persistence's
/// `closed_at IS NULL` rows), since persistence is the only durable source of
/// truth across restarts. Any trade id an in-memory position table claims is
/// open but that persistence does not list is dropped from the authorized
/// set — it cannot be resurrected, only logged.
pub async fn seal_run_epoch(
    store: &dyn PersistenceStore,
    in_memory_open_ids: &[i64],
    starting_capital_usd: f64,
) -> Result<SealResult> {
    info!("reconciliation: sealing run epoch");

    let persisted_positions = store
        .load_open_positions()
        .await
        .context("reconcile: failed to load open positions from persistence")?;

    let persisted_set: std::collections::HashSet<i64> = persisted_positions.iter().map(|p| p.trade_id).collect();

    let mut dropped_unauthorized = Vec::new();
    for id in in_memory_open_ids {
        if !persisted_set.contains(id) {
            warn!(trade_id = id, "in-memory trade id has no persisted open position — dropping from authorized set");
            dropped_unauthorized.push(*id);
        }
    }

    let started_at = chrono::Utc::now();
    let run_id = format!("run-{}", started_at.timestamp_millis());
    let epoch = RunEpoch::new(run_id, starting_capital_usd, started_at);
    let seal = ReconciliationSeal::seal(persisted_set);

    // The seal is derived from `persisted_positions` itself, so the counts
    // can only diverge if two rows collide on pool address once hydrated
    // into the scheduler's address-keyed table — a caller-side check that
    // this function cannot make on its own, since it has no view of the
    // in-memory table being hydrated.
    if seal.open_count() != persisted_positions.len() {
        tracing::error!(
            expected = seal.open_count(),
            actual = persisted_positions.len(),
            "reconciliation: sealed authorized count does not match persisted position rows — exiting"
        );
        std::process::exit(1);
    }

    info!(
        run_id = %epoch.run_id,
        authorized_count = seal.open_count(),
        dropped_unauthorized = dropped_unauthorized.len(),
        "run epoch sealed"
    );

    Ok(SealResult { epoch, seal, dropped_unauthorized, positions: persisted_positions })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::identity::PoolAddress;
    use crate::domain::position::Position;
    use crate::persistence::SqlitePersistence;

    fn open_position(trade_id: i64) -> Position {
        Position {
            trade_id,
            pool_address: PoolAddress::from("pool1"),
            entry_price: 1.0,
            size_usd: 500.0,
            entry_timestamp: chrono::Utc::now(),
            current_bin: 100,
            health_score: 1.0,
            risk_tier: "standard".into(),
            run_id: "run-1".into(),
            closed_at: None,
            exit_reason: None,
            realized_pnl_usd: None,
        }
    }

    /// Scenario C from spec §8: in-memory claims open trade id that
    /// persistence has no record of — it must be dropped, not authorized.
    #[tokio::test]
    async fn scenario_c_unauthorized_id_is_dropped() {
        let store = SqlitePersistence::open_in_memory().unwrap();
        let result = seal_run_epoch(&store, &[999], 1000.0).await.unwrap();
        assert_eq!(result.dropped_unauthorized, vec![999]);
        assert!(!result.seal.is_authorized(999));
    }

    #[tokio::test]
    async fn empty_persistence_yields_empty_seal() {
        let store = SqlitePersistence::open_in_memory().unwrap();
        let result = seal_run_epoch(&store, &[], 1000.0).await.unwrap();
        assert_eq!(result.seal.open_count(), 0);
        assert!(result.dropped_unauthorized.is_empty());
    }

    #[tokio::test]
    async fn persisted_open_positions_are_authorized_even_if_not_in_memory() {
        let store = SqlitePersistence::open_in_memory().unwrap();
        let trade = crate::domain::trade::Trade {
            id: None,
            pool_address: PoolAddress::from("pool1"),
            mode: crate::domain::trade::TradeMode::Paper,
            size_usd: 500.0,
            entry_price: 1.0,
            entry_bin: 100,
            entry_score: 75.0,
            tier: "standard".into(),
            regime_at_entry: "NEUTRAL".into(),
            entry_timestamp: chrono::Utc::now(),
            costs: crate::domain::trade::ExecutionCosts {
                entry_fees_usd: 1.5,
                entry_slippage_usd: 1.0,
                entry_asset_value_usd: 500.0,
            },
            status: crate::domain::trade::TradeStatus::Open,
            exit: None,
        };
        let id = store.insert_trade(&trade).await.unwrap();
        store.insert_position(&open_position(id)).await.unwrap();

        // No in-memory process state yet — simulates a fresh restart.
        let result = seal_run_epoch(&store, &[], 1000.0).await.unwrap();
        assert!(result.seal.is_authorized(id));
        assert!(result.dropped_unauthorized.is_empty());
    }
}
