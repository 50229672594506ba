// =============================================================================
// Error taxonomy
// =============================================================================
//
// Typed failures for every category the scheduler needs to branch on. Ambient
// glue (config parsing, one-off I/O) still uses `anyhow::Result`; anything the
// scheduler's recovery policy needs to match on gets its own variant here.
// =============================================================================

use thiserror::Error;

use crate::domain::identity::PoolAddress;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("identity resolution failed for {pool}: {reason}")]
    IdentityResolution { pool: PoolAddress, reason: String },

    #[error("telemetry invalid for {pool}: {reason}")]
    TelemetryInvalid { pool: PoolAddress, reason: String },

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("upstream source {source} failed: {reason}")]
    UpstreamSource { source: String, reason: String },

    #[error("reconciliation mismatch: expected {expected} open trades, persistence returned {actual}")]
    ReconciliationMismatch { expected: usize, actual: usize },

    #[error("preflight rejected {pool}: {reason}")]
    PreflightRejected { pool: PoolAddress, reason: String },

    #[error("regime blocked: {0}")]
    RegimeBlocked(String),

    #[error("governor suppressed: {0}")]
    GovernorSuppressed(String),

    #[error("fatal config error: {0}")]
    FatalConfig(String),
}

impl AgentError {
    /// True for errors whose recovery policy is "skip this pool this tick",
    /// as opposed to fatal process-exit conditions.
    pub fn is_skip_only(&self) -> bool {
        !matches!(
            self,
            AgentError::ReconciliationMismatch { .. } | AgentError::FatalConfig(_)
        )
    }
}
