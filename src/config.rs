// =============================================================================
// Runtime Configuration — environment-sourced engine settings
// =============================================================================
//
// Grounded on runtime_config.rs's serde-default discipline (every field
// falls back to a sane value so a sparse environment never fails to start),
// but loaded from process environment via dotenvy rather than a JSON file on
// disk — the scheduler has no hot-reload requirement, so there is no
// atomic-save counterpart here.
// =============================================================================

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::trade::TradeMode;

fn default_starting_capital_usd() -> f64 {
    1000.0
}

fn default_scan_interval_secs() -> u64 {
    30
}

fn default_snapshot_history_capacity() -> usize {
    20
}

fn default_snapshot_min_interval_secs() -> i64 {
    8
}

fn default_persistence_path() -> String {
    "bin_liquidity_agent.sqlite3".to_string()
}

fn default_dashboard_bind_addr() -> String {
    "0.0.0.0:8787".to_string()
}

/// Top-level runtime configuration, loaded once at startup from the process
/// environment. Every field has a fallback so a minimal `.env` still starts
/// the agent in paper mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub mode: TradeMode,

    #[serde(default = "default_starting_capital_usd")]
    pub starting_capital_usd: f64,

    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,

    #[serde(default = "default_snapshot_history_capacity")]
    pub snapshot_history_capacity: usize,

    #[serde(default = "default_snapshot_min_interval_secs")]
    pub snapshot_min_interval_secs: i64,

    #[serde(default = "default_persistence_path")]
    pub persistence_path: String,

    #[serde(default = "default_dashboard_bind_addr")]
    pub dashboard_bind_addr: String,

    /// RPC endpoint for on-chain identity decode; absent means the decoder
    /// stub stays in place and any pool without a cache/persistence/hints
    /// match fails resolution outright.
    #[serde(default)]
    pub rpc_url: Option<String>,

    /// Optional upstream discovery source API key; absent sources are
    /// skipped rather than treated as fatal per the funnel's non-fatal
    /// per-source timeout policy.
    #[serde(default)]
    pub discovery_api_key: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mode: TradeMode::Paper,
            starting_capital_usd: default_starting_capital_usd(),
            scan_interval_secs: default_scan_interval_secs(),
            snapshot_history_capacity: default_snapshot_history_capacity(),
            snapshot_min_interval_secs: default_snapshot_min_interval_secs(),
            persistence_path: default_persistence_path(),
            dashboard_bind_addr: default_dashboard_bind_addr(),
            rpc_url: None,
            discovery_api_key: None,
        }
    }
}

impl RuntimeConfig {
    /// Loads `.env` (if present) then reads each setting from the process
    /// environment, falling back to defaults for anything unset. Never
    /// errors on a missing variable — only a malformed value for a
    /// variable that IS set is treated as fatal, since a typo there is
    /// more dangerous silently ignored.
    pub fn from_env() -> Result<Self> {
        if dotenvy::dotenv().is_err() {
            warn!("no .env file found — relying on process environment only");
        }

        let mut cfg = RuntimeConfig::default();

        if let Ok(mode) = std::env::var("AGENT_MODE") {
            cfg.mode = match mode.to_lowercase().as_str() {
                "paper" => TradeMode::Paper,
                "live" => TradeMode::Live,
                other => anyhow::bail!("AGENT_MODE must be 'paper' or 'live', got {other:?}"),
            };
        }

        if let Ok(v) = std::env::var("STARTING_CAPITAL_USD") {
            cfg.starting_capital_usd = v.parse().context("STARTING_CAPITAL_USD must be a number")?;
        }
        if let Ok(v) = std::env::var("SCAN_INTERVAL_SECS") {
            cfg.scan_interval_secs = v.parse().context("SCAN_INTERVAL_SECS must be an integer")?;
        }
        if let Ok(v) = std::env::var("SNAPSHOT_HISTORY_CAPACITY") {
            cfg.snapshot_history_capacity = v.parse().context("SNAPSHOT_HISTORY_CAPACITY must be an integer")?;
        }
        if let Ok(v) = std::env::var("SNAPSHOT_MIN_INTERVAL_SECS") {
            cfg.snapshot_min_interval_secs = v.parse().context("SNAPSHOT_MIN_INTERVAL_SECS must be an integer")?;
        }
        if let Ok(v) = std::env::var("PERSISTENCE_PATH") {
            cfg.persistence_path = v;
        }
        if let Ok(v) = std::env::var("DASHBOARD_BIND_ADDR") {
            cfg.dashboard_bind_addr = v;
        }
        cfg.rpc_url = std::env::var("RPC_URL").ok();
        cfg.discovery_api_key = std::env::var("DISCOVERY_API_KEY").ok();

        // Paper mode tolerates missing credentials — there is nothing live
        // to call. Live mode without an RPC endpoint can never resolve
        // identities or fetch telemetry, so starting anyway would just run
        // silently idle; that is a boot-time configuration error, not a
        // runtime condition to degrade through.
        if cfg.mode == TradeMode::Live {
            let mut missing = Vec::new();
            if cfg.rpc_url.as_deref().unwrap_or("").is_empty() {
                missing.push("RPC_URL");
            }
            if cfg.persistence_path.trim().is_empty() {
                missing.push("PERSISTENCE_PATH");
            }
            if !missing.is_empty() {
                tracing::error!(missing = ?missing, "AGENT_MODE=live requires credentials that are not configured — exiting");
                std::process::exit(1);
            }
        }

        info!(
            mode = %cfg.mode,
            starting_capital_usd = cfg.starting_capital_usd,
            scan_interval_secs = cfg.scan_interval_secs,
            persistence_path = %cfg.persistence_path,
            rpc_configured = cfg.rpc_url.is_some(),
            "runtime config loaded"
        );

        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_starts_in_paper_mode() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.mode, TradeMode::Paper);
        assert_eq!(cfg.starting_capital_usd, 1000.0);
        assert!(cfg.rpc_url.is_none());
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.mode, TradeMode::Paper);
        assert_eq!(cfg.scan_interval_secs, 30);
    }
}
