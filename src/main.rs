// =============================================================================
// Bin Liquidity Agent — Main Entry Point
// =============================================================================
//
// Startup sequence: load config, open persistence, seal the run epoch against
// persistence's own open-position table, build the scheduler, then run its
// tick loop and the read-only dashboard API as two concurrent tasks.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod config;
mod congestion_governor;
mod cycle_phase;
mod domain;
mod error;
mod execution;
mod exit_governor;
mod funnel;
mod identity_resolver;
mod microstructure;
mod no_trade;
mod persistence;
mod reconcile;
mod scheduler;
mod telemetry;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::state::DashboardState;
use crate::config::RuntimeConfig;
use crate::domain::identity::{IdentityFailure, IdentityHints, PoolAddress, PoolIdentity};
use crate::execution::ExecutionEngine;
use crate::funnel::DiscoverySource;
use crate::identity_resolver::{ChainDecoder, IdentityResolver};
use crate::no_trade::RegimeInputs;
use crate::persistence::{PersistenceStore, SqlitePersistence};
use crate::scheduler::Scheduler;
use crate::telemetry::{GatedTelemetryFetcher, RpcTelemetryFetcher};

/// On-chain identity decode is an external collaborator (spec's RPC decoder
/// is out of scope) — this stub always fails, same posture as
/// `RpcTelemetryFetcher` toward a missing chain client. A pool can still be
/// entered via the cache/persistence/hints resolution paths ahead of this one.
struct UnconfiguredChainDecoder;

#[async_trait::async_trait]
impl ChainDecoder for UnconfiguredChainDecoder {
    async fn resolve_on_chain_identity(
        &self,
        pool: &PoolAddress,
        _hints: &IdentityHints,
    ) -> Result<PoolIdentity, IdentityFailure> {
        Err(IdentityFailure::FetchFailed(format!("no chain decoder configured for pool {pool}")))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║          Bin Liquidity Agent — Starting Up                ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let cfg = RuntimeConfig::from_env()?;

    // ── Persistence ───────────────────────────────────────────────────────
    let persistence: Arc<dyn PersistenceStore> = Arc::new(SqlitePersistence::open(&cfg.persistence_path)?);

    // ── Reconciliation seal ───────────────────────────────────────────────
    // Fresh process: no in-memory open-trade claims exist yet, so the
    // authorized set is exactly whatever persistence already lists as open.
    let sealed = reconcile::seal_run_epoch(&*persistence, &[], cfg.starting_capital_usd).await?;
    if !sealed.dropped_unauthorized.is_empty() {
        warn!(dropped = ?sealed.dropped_unauthorized, "unauthorized trade ids dropped at startup");
    }
    info!(run_id = %sealed.epoch.run_id, open_positions = sealed.seal.open_count(), "run epoch sealed");

    // ── Identity resolution ───────────────────────────────────────────────
    let identity_resolver = Arc::new(IdentityResolver::new(Box::new(UnconfiguredChainDecoder), persistence.clone()));

    // ── Execution ──────────────────────────────────────────────────────────
    let execution = Arc::new(ExecutionEngine::new(persistence.clone(), identity_resolver.clone()));

    // ── Telemetry ──────────────────────────────────────────────────────────
    let rpc_url = cfg.rpc_url.clone().unwrap_or_default();
    if cfg.rpc_url.is_none() {
        warn!("RPC_URL not configured — telemetry fetches will fail until a chain RPC is wired in");
    }
    let telemetry = GatedTelemetryFetcher::new(RpcTelemetryFetcher { client: reqwest::Client::new(), rpc_url });

    // ── Discovery sources ──────────────────────────────────────────────────
    // Upstream discovery feeds are external collaborators per spec §1; absent
    // an API key, the funnel simply has nothing to fetch this run and every
    // tick yields zero candidates rather than erroring.
    let discovery_sources: Vec<Box<dyn DiscoverySource>> = Vec::new();
    if cfg.discovery_api_key.is_none() {
        warn!("DISCOVERY_API_KEY not configured — discovery funnel has no upstream sources");
    }

    let expected_positioned = sealed.seal.open_count();
    let scheduler = Arc::new(Scheduler::new(
        persistence.clone(),
        identity_resolver,
        execution,
        telemetry,
        sealed.epoch.clone(),
        sealed.seal,
        cfg.snapshot_history_capacity,
        cfg.snapshot_min_interval_secs,
    ));

    // ── Hydrate sealed positions ─────────────────────────────────────────
    // The authorized set from reconciliation must become the scheduler's
    // actual in-memory active set, not just a count sitting next to it —
    // otherwise a sealed position never gets its Exit Governor ticked until
    // discovery happens to rediscover it.
    scheduler.hydrate_sealed_positions(&sealed.positions);
    if scheduler.positioned_pool_count() != expected_positioned {
        error!(
            expected = expected_positioned,
            actual = scheduler.positioned_pool_count(),
            "reconciliation: hydrated pool count does not match sealed authorized count — exiting"
        );
        std::process::exit(1);
    }

    // ── Tick loop ────────────────────────────────────────────────────────
    let tick_scheduler = scheduler.clone();
    let scan_interval_secs = cfg.scan_interval_secs;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(scan_interval_secs));
        loop {
            interval.tick().await;

            let bodies = funnel::fetch_all_sources(&discovery_sources).await;
            let readers: Vec<std::io::Cursor<Vec<u8>>> = bodies.into_iter().map(std::io::Cursor::new).collect();
            let candidates = funnel::run_funnel(readers, |_record| None);

            // No live aggregate-sentiment/migration feed is wired in yet; a
            // neutral reading never itself trips a no-trade trigger, leaving
            // that judgment to each pool's own microstructure verdict.
            let regime_inputs = RegimeInputs {
                consistency: 0.5,
                entropy: 0.4,
                migration_confidence: 0.5,
                liquidity_flow: 0.3,
                velocity: 0.2,
                sentiment: 50.0,
            };

            tick_scheduler.tick(&candidates, &regime_inputs, chrono::Utc::now()).await;
        }
    });

    // ── Dashboard API ────────────────────────────────────────────────────
    let dashboard_state = Arc::new(DashboardState::new(persistence, sealed.epoch));
    let bind_addr = cfg.dashboard_bind_addr.clone();
    tokio::spawn(async move {
        let app = api::state::router(dashboard_state);
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .expect("failed to bind dashboard API server");
        info!(addr = %bind_addr, "dashboard API listening");
        axum::serve(listener, app).await.expect("dashboard API server failed");
    });

    info!(open_positions = scheduler.authorized_open_trade_count(), "all subsystems running — press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping gracefully");
    info!("bin liquidity agent shut down complete");
    Ok(())
}
