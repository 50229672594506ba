// =============================================================================
// Dashboard API — read-only engine state surface
// =============================================================================
//
// Grounded on app_state.rs's build_snapshot/StateSnapshot shape and rest.rs's
// Router/CorsLayer/Json handler style, pared down to what a read-only
// dashboard needs: no AuthBearer gate, no control/feature-flag/WebSocket
// surface, no mutation endpoints at all. The engine has nothing here to
// pause, resume, or kill — the only writer to trades/positions is
// ExecutionEngine (src/execution.rs), reached exclusively through the
// scheduler loop, never through this API.
// =============================================================================

use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use tower_http::cors::CorsLayer;

use crate::domain::epoch::RunEpoch;
use crate::domain::position::Position;
use crate::persistence::PersistenceStore;

/// Shared state behind every dashboard handler. Holds only what read-only
/// reporting needs; it is never mutated after construction.
pub struct DashboardState {
    pub persistence: Arc<dyn PersistenceStore>,
    pub epoch: RunEpoch,
    pub started_at: std::time::Instant,
}

impl DashboardState {
    pub fn new(persistence: Arc<dyn PersistenceStore>, epoch: RunEpoch) -> Self {
        Self { persistence, epoch, started_at: std::time::Instant::now() }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    run_id: String,
    uptime_secs: u64,
}

#[derive(Debug, Serialize)]
struct EngineSnapshot {
    run_id: String,
    started_at: chrono::DateTime<chrono::Utc>,
    starting_capital_usd: f64,
    uptime_secs: u64,
    open_position_count: usize,
    closed_trade_count: usize,
    realized_pnl_usd_total: f64,
}

async fn health(State(state): State<Arc<DashboardState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        run_id: state.epoch.run_id.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

async fn positions(State(state): State<Arc<DashboardState>>) -> impl IntoResponse {
    match state.persistence.load_open_positions().await {
        Ok(open) => Json(open).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "dashboard: failed to load open positions");
            let body = serde_json::json!({ "error": e.to_string() });
            (axum::http::StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
    }
}

async fn engine_state(State(state): State<Arc<DashboardState>>) -> impl IntoResponse {
    let open: Vec<Position> = match state.persistence.load_open_positions().await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "dashboard: failed to load open positions");
            let body = serde_json::json!({ "error": e.to_string() });
            return (axum::http::StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response();
        }
    };

    let closed = match state.persistence.load_closed_trades_for_run(&state.epoch.run_id).await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "dashboard: failed to load closed trades");
            let body = serde_json::json!({ "error": e.to_string() });
            return (axum::http::StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response();
        }
    };

    let realized_pnl_usd_total: f64 = closed
        .iter()
        .filter_map(|t| t.exit.as_ref().map(|e| e.realized_pnl_usd))
        .sum();

    Json(EngineSnapshot {
        run_id: state.epoch.run_id.clone(),
        started_at: state.epoch.started_at,
        starting_capital_usd: state.epoch.starting_capital_usd,
        uptime_secs: state.started_at.elapsed().as_secs(),
        open_position_count: open.len(),
        closed_trade_count: closed.len(),
        realized_pnl_usd_total,
    })
    .into_response()
}

/// Builds the dashboard router. Bound and served by `main.rs` alongside the
/// scheduler's tick loop; CORS is wide open since this is a read-only
/// reporting surface with no credentials to leak.
pub fn router(state: Arc<DashboardState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/state", get(engine_state))
        .route("/api/v1/positions", get(positions))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::SqlitePersistence;

    fn test_state() -> Arc<DashboardState> {
        let persistence: Arc<dyn PersistenceStore> = Arc::new(SqlitePersistence::open_in_memory().unwrap());
        let epoch = RunEpoch::new("run-test".into(), 1000.0, chrono::Utc::now());
        Arc::new(DashboardState::new(persistence, epoch))
    }

    #[tokio::test]
    async fn health_reports_run_id() {
        let state = test_state();
        let response = health(State(state.clone())).await.into_response();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn engine_state_with_no_trades_reports_zero_counts() {
        let state = test_state();
        let response = engine_state(State(state)).await.into_response();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn positions_with_no_open_trades_returns_empty_array() {
        let state = test_state();
        let response = positions(State(state)).await.into_response();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }
}
