// =============================================================================
// Position — the open-lifecycle view of a trade
// =============================================================================

use serde::{Deserialize, Serialize};

use super::identity::PoolAddress;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub trade_id: i64,
    pub pool_address: PoolAddress,
    pub entry_price: f64,
    pub size_usd: f64,
    pub entry_timestamp: chrono::DateTime<chrono::Utc>,
    pub current_bin: i64,
    pub health_score: f64,
    pub risk_tier: String,
    pub run_id: String,
    pub closed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub exit_reason: Option<String>,
    pub realized_pnl_usd: Option<f64>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }
}
