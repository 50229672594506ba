// =============================================================================
// Identity Resolver — pool address -> canonical base/quote mint identity
// =============================================================================
//
// Grounded on app_state.rs's RwLock-guarded cache-map pattern and risk.rs's
// breaker-style gating. Resolution priority: in-memory cache -> persisted
// record -> provided hints -> on-chain decode. A resolution failure
// blacklists the pool for 30 minutes.
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::domain::identity::{
    preflight, IdentityFailure, IdentityHints, PoolAddress, PoolIdentity, ResolutionSource,
};
use crate::persistence::PersistenceStore;

const CACHE_TTL: Duration = Duration::from_secs(3600);
const BLACKLIST_DURATION: Duration = Duration::from_secs(30 * 60);

/// On-chain decode — out of scope per spec §1, a production implementation
/// is an external collaborator. Only the interface is specified here.
#[async_trait]
pub trait ChainDecoder: Send + Sync {
    async fn resolve_on_chain_identity(
        &self,
        pool: &PoolAddress,
        hints: &IdentityHints,
    ) -> Result<PoolIdentity, IdentityFailure>;
}

struct CacheEntry {
    identity: PoolIdentity,
    inserted_at: Instant,
}

pub struct IdentityResolver {
    cache: RwLock<HashMap<PoolAddress, CacheEntry>>,
    blacklist: RwLock<HashMap<PoolAddress, Instant>>,
    decoder: Box<dyn ChainDecoder>,
    persistence: std::sync::Arc<dyn PersistenceStore>,
}

impl IdentityResolver {
    pub fn new(decoder: Box<dyn ChainDecoder>, persistence: std::sync::Arc<dyn PersistenceStore>) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            blacklist: RwLock::new(HashMap::new()),
            decoder,
            persistence,
        }
    }

    fn is_blacklisted(&self, pool: &PoolAddress) -> bool {
        let blacklist = self.blacklist.read();
        match blacklist.get(pool) {
            Some(since) => since.elapsed() < BLACKLIST_DURATION,
            None => false,
        }
    }

    fn blacklist_pool(&self, pool: &PoolAddress) {
        self.blacklist.write().insert(pool.clone(), Instant::now());
        warn!(pool = %pool, "identity resolution failed — blacklisting for 30 minutes");
    }

    pub async fn resolve(
        &self,
        pool: &PoolAddress,
        hints: &IdentityHints,
    ) -> Result<PoolIdentity, IdentityFailure> {
        if self.is_blacklisted(pool) {
            return Err(IdentityFailure::Blacklisted);
        }

        // 1. In-memory cache, honoring TTL.
        if let Some(entry) = self.cache.read().get(pool) {
            if entry.inserted_at.elapsed() < CACHE_TTL {
                return Ok(entry.identity.clone());
            }
        }

        // 2. Persisted record.
        if let Ok(Some(identity)) = self.persistence.load_pool_identity(pool).await {
            self.cache.write().insert(
                pool.clone(),
                CacheEntry { identity: identity.clone(), inserted_at: Instant::now() },
            );
            return Ok(identity);
        }

        // 3. Provided hints, if complete enough to stand in for a decode.
        if let (Some(base_mint), Some(quote_mint)) = (&hints.base_mint, &hints.quote_mint) {
            let identity = PoolIdentity {
                pool_address: pool.clone(),
                base_mint: base_mint.clone(),
                quote_mint: quote_mint.clone(),
                base_decimals: 9,
                quote_decimals: 9,
                base_symbol: hints.base_symbol.clone(),
                quote_symbol: hints.quote_symbol.clone(),
                resolution_source: ResolutionSource::Hints,
                resolved_at: chrono::Utc::now(),
            };
            if preflight(&identity).is_ok() {
                self.write_through(pool, &identity).await;
                return Ok(identity);
            }
        }

        // 4. On-chain decode.
        match self.decoder.resolve_on_chain_identity(pool, hints).await {
            Ok(identity) => {
                self.write_through(pool, &identity).await;
                info!(pool = %pool, source = ?identity.resolution_source, "identity resolved via decode");
                Ok(identity)
            }
            Err(failure) => {
                self.blacklist_pool(pool);
                Err(failure)
            }
        }
    }

    async fn write_through(&self, pool: &PoolAddress, identity: &PoolIdentity) {
        if let Err(e) = self.persistence.save_pool_identity(identity).await {
            warn!(pool = %pool, error = %e, "failed to persist resolved identity");
        }
        self.cache.write().insert(
            pool.clone(),
            CacheEntry { identity: identity.clone(), inserted_at: Instant::now() },
        );
    }
}
