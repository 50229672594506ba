// =============================================================================
// Pool identity — canonical base/quote mint identity and decimals
// =============================================================================

use serde::{Deserialize, Serialize};

/// Opaque pool handle. Newtype so it can never be confused with a mint
/// address or a trade id at a call site.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PoolAddress(pub String);

impl std::fmt::Display for PoolAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for PoolAddress {
    fn from(s: String) -> Self {
        PoolAddress(s)
    }
}

impl From<&str> for PoolAddress {
    fn from(s: &str) -> Self {
        PoolAddress(s.to_string())
    }
}

/// Where a `PoolIdentity` was resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionSource {
    Cache,
    Persistence,
    Hints,
    OnChainDecode,
}

/// Immutable once resolved. Every field except `base_symbol`/`quote_symbol`
/// must be present or the identity does not exist — there is no
/// "partially resolved" `PoolIdentity`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolIdentity {
    pub pool_address: PoolAddress,
    pub base_mint: String,
    pub quote_mint: String,
    pub base_decimals: u8,
    pub quote_decimals: u8,
    pub base_symbol: Option<String>,
    pub quote_symbol: Option<String>,
    pub resolution_source: ResolutionSource,
    pub resolved_at: chrono::DateTime<chrono::Utc>,
}

impl PoolIdentity {
    /// Canonical pair key: `baseMint:quoteMint`.
    pub fn pair_key(&self) -> String {
        format!("{}:{}", self.base_mint, self.quote_mint)
    }
}

/// Optional caller-supplied hints used as a resolution fallback before
/// falling through to on-chain decode.
#[derive(Debug, Clone, Default)]
pub struct IdentityHints {
    pub base_mint: Option<String>,
    pub quote_mint: Option<String>,
    pub base_symbol: Option<String>,
    pub quote_symbol: Option<String>,
}

/// Typed resolution failure — spec §4.1.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum IdentityFailure {
    #[error("missing pool")]
    MissingPool,
    #[error("missing mints")]
    MissingMints,
    #[error("missing decimals")]
    MissingDecimals,
    #[error("fetch failed: {0}")]
    FetchFailed(String),
    #[error("blacklisted")]
    Blacklisted,
}

/// Pure preflight check. The rule is absolute: no downstream component may
/// operate on a pool identity that fails this check.
pub fn preflight(identity: &PoolIdentity) -> Result<(), String> {
    if identity.base_mint.is_empty() || identity.quote_mint.is_empty() {
        return Err("missing base/quote mint".to_string());
    }
    // decimals are u8, so "negative" can't be represented; the historical
    // invariant becomes: decimals must be within a plausible SPL range.
    if identity.base_decimals > 18 || identity.quote_decimals > 18 {
        return Err("implausible decimals".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> PoolIdentity {
        PoolIdentity {
            pool_address: PoolAddress::from("pool1"),
            base_mint: "BASE".into(),
            quote_mint: "QUOTE".into(),
            base_decimals: 9,
            quote_decimals: 6,
            base_symbol: None,
            quote_symbol: None,
            resolution_source: ResolutionSource::OnChainDecode,
            resolved_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn preflight_passes_for_valid_identity() {
        assert!(preflight(&identity()).is_ok());
    }

    #[test]
    fn preflight_rejects_missing_mint() {
        let mut id = identity();
        id.quote_mint.clear();
        assert!(preflight(&id).is_err());
    }

    #[test]
    fn pair_key_is_base_colon_quote() {
        assert_eq!(identity().pair_key(), "BASE:QUOTE");
    }
}
