// =============================================================================
// Run Epoch & Reconciliation Seal — process-wide, initialize-once singletons
// =============================================================================
//
// Modeled as one-shot values constructed at startup and handed out by `Arc`;
// there is nothing to mutate after construction, so no lock is required,
// unlike app_state.rs's RwLock-guarded mutable fields.
// =============================================================================

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Scopes all accounting to the current process run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEpoch {
    pub run_id: String,
    pub starting_capital_usd: f64,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl RunEpoch {
    pub fn new(run_id: String, starting_capital_usd: f64, started_at: chrono::DateTime<chrono::Utc>) -> Self {
        Self { run_id, starting_capital_usd, started_at }
    }
}

/// The one-shot, startup-time authoritative set of open trade ids used to
/// hydrate positions safely. Once sealed, any hydration request for a trade
/// id outside this set is a hard error.
#[derive(Debug, Clone)]
pub struct ReconciliationSeal {
    sealed: bool,
    authorized: HashSet<i64>,
}

impl ReconciliationSeal {
    /// Seal the given set of trade ids. This is the only constructor; there
    /// is no "unsealed" state visible outside this module.
    pub fn seal(authorized: HashSet<i64>) -> Self {
        Self { sealed: true, authorized }
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn open_count(&self) -> usize {
        self.authorized.len()
    }

    pub fn is_authorized(&self, trade_id: i64) -> bool {
        self.authorized.contains(&trade_id)
    }

    pub fn authorized_ids(&self) -> impl Iterator<Item = &i64> {
        self.authorized.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_authorizes_exactly_the_given_ids() {
        let seal = ReconciliationSeal::seal(HashSet::from([1, 2]));
        assert!(seal.is_authorized(1));
        assert!(seal.is_authorized(2));
        assert!(!seal.is_authorized(3));
        assert_eq!(seal.open_count(), 2);
    }
}
