// =============================================================================
// Trade — immutable after exit, id assigned by the persistence layer
// =============================================================================

use serde::{Deserialize, Serialize};

use super::identity::PoolAddress;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeMode {
    Paper,
    Live,
}

impl Default for TradeMode {
    fn default() -> Self {
        TradeMode::Paper
    }
}

impl std::fmt::Display for TradeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeMode::Paper => write!(f, "paper"),
            TradeMode::Live => write!(f, "live"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Open,
    Closed,
}

/// Execution cost estimates captured at entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionCosts {
    pub entry_fees_usd: f64,
    pub entry_slippage_usd: f64,
    pub entry_asset_value_usd: f64,
}

/// Fields only populated once the trade has closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitFields {
    pub exit_price: f64,
    pub exit_timestamp: chrono::DateTime<chrono::Utc>,
    pub exit_fees_usd: f64,
    pub exit_slippage_usd: f64,
    pub realized_pnl_usd: f64,
    pub realized_pnl_pct: f64,
    pub exit_reason: String,
}

/// A trade row. `id` is `None` until the persistence layer assigns one on
/// first insert — application code never fabricates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: Option<i64>,
    pub pool_address: PoolAddress,
    pub mode: TradeMode,
    pub size_usd: f64,
    pub entry_price: f64,
    pub entry_bin: i64,
    pub entry_score: f64,
    pub tier: String,
    pub regime_at_entry: String,
    pub entry_timestamp: chrono::DateTime<chrono::Utc>,
    pub costs: ExecutionCosts,
    pub status: TradeStatus,
    pub exit: Option<ExitFields>,
}

impl Trade {
    /// Realized P&L rounded to cents for display; the stored `realized_pnl_usd`
    /// retains full precision.
    pub fn realized_pnl_display(&self) -> Option<f64> {
        self.exit.as_ref().map(|e| (e.realized_pnl_usd * 100.0).round() / 100.0)
    }
}
