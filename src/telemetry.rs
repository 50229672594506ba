// =============================================================================
// Telemetry Fetcher — single point-in-time BinSnapshot per call
// =============================================================================
//
// Grounded on binance/client.rs's #[instrument]-annotated async client
// methods and its defensive value-coercion helper; trait-ized so the
// scheduler never depends on a concrete transport, mirroring how the teacher
// isolates BinanceClient behind a narrow impl the strategy loop calls.
// =============================================================================

use async_trait::async_trait;
use tracing::instrument;

use crate::domain::identity::{preflight, PoolAddress, PoolIdentity};
use crate::domain::snapshot::BinSnapshot;

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum TelemetryFailure {
    #[error("identity not preflight-valid: {0}")]
    PreflightFailed(String),
    #[error("partial telemetry data: {0}")]
    PartialData(String),
    #[error("fetch timed out")]
    Timeout,
    #[error("fetch failed: {0}")]
    FetchFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitmentLevel {
    Processed,
    Confirmed,
    Finalized,
}

#[async_trait]
pub trait TelemetryFetcher: Send + Sync {
    async fn fetch_snapshot(
        &self,
        identity: &PoolIdentity,
        commitment: CommitmentLevel,
    ) -> Result<BinSnapshot, TelemetryFailure>;
}

/// Wraps any fetcher with the mandatory preflight gate: "pool identity must
/// be preflight-valid or the fetch is skipped" (spec §4.2).
pub struct GatedTelemetryFetcher<F: TelemetryFetcher> {
    inner: F,
}

impl<F: TelemetryFetcher> GatedTelemetryFetcher<F> {
    pub fn new(inner: F) -> Self {
        Self { inner }
    }

    #[instrument(skip(self, identity), fields(pool = %identity.pool_address))]
    pub async fn fetch(
        &self,
        identity: &PoolIdentity,
        commitment: CommitmentLevel,
    ) -> Result<BinSnapshot, TelemetryFailure> {
        preflight(identity).map_err(TelemetryFailure::PreflightFailed)?;
        tokio::time::timeout(std::time::Duration::from_secs(10), self.inner.fetch_snapshot(identity, commitment))
            .await
            .map_err(|_| TelemetryFailure::Timeout)?
    }
}

/// Out-of-scope production placeholder: the concrete chain RPC decoder is an
/// external collaborator (spec §1). This stub never fabricates values —
/// every field is sourced or the call fails — but has no real backing chain
/// client wired in.
pub struct RpcTelemetryFetcher {
    pub client: reqwest::Client,
    pub rpc_url: String,
}

#[async_trait]
impl TelemetryFetcher for RpcTelemetryFetcher {
    async fn fetch_snapshot(
        &self,
        identity: &PoolIdentity,
        _commitment: CommitmentLevel,
    ) -> Result<BinSnapshot, TelemetryFailure> {
        Err(TelemetryFailure::FetchFailed(format!(
            "no chain decoder configured for pool {} against rpc {}",
            identity.pool_address, self.rpc_url
        )))
    }
}

/// Deterministic fetcher for tests.
#[cfg(test)]
pub struct MockTelemetryFetcher {
    pub snapshots: parking_lot::Mutex<std::collections::VecDeque<BinSnapshot>>,
}

#[cfg(test)]
#[async_trait]
impl TelemetryFetcher for MockTelemetryFetcher {
    async fn fetch_snapshot(
        &self,
        _identity: &PoolIdentity,
        _commitment: CommitmentLevel,
    ) -> Result<BinSnapshot, TelemetryFailure> {
        self.snapshots
            .lock()
            .pop_front()
            .ok_or_else(|| TelemetryFailure::PartialData("mock exhausted".into()))
    }
}
