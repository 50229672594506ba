// =============================================================================
// CongestionSample — raw inputs to the Congestion Governor
// =============================================================================

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CongestionSample {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub confirmation_time_ms: Option<f64>,
    pub success: bool,
    pub rpc_latency_ms: Option<f64>,
}
