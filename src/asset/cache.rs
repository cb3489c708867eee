use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::Asset;
use crate::AssetCacheConfig;
use crate::AssetReference;
use crate::TenantId;

type CacheKey = (TenantId, String);

struct CachedAsset {
    asset: Asset,
    inserted_at: Instant,
}

/// Bounded LRU of resolved assets with time-based expiry.
///
/// A zero TTL disables caching entirely.
pub struct AssetCache {
    entries: Mutex<LruCache<CacheKey, CachedAsset>>,
    ttl: Duration,
}

impl AssetCache {
    pub fn new(
        capacity: usize,
        ttl: Duration,
    ) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn from_config(config: &AssetCacheConfig) -> Self {
        Self::new(config.capacity, Duration::from_millis(config.ttl_ms))
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    pub fn get(
        &self,
        reference: &AssetReference,
    ) -> Option<Asset> {
        if !self.is_enabled() {
            return None;
        }
        let key = Self::key(reference);
        let mut entries = self.entries.lock();
        let expired = entries.get(&key)?.inserted_at.elapsed() >= self.ttl;
        if expired {
            entries.pop(&key);
            return None;
        }
        entries.peek(&key).map(|cached| cached.asset.clone())
    }

    pub fn insert(
        &self,
        reference: &AssetReference,
        asset: Asset,
    ) {
        if !self.is_enabled() {
            return;
        }
        self.entries.lock().put(
            Self::key(reference),
            CachedAsset {
                asset,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Returns whether an entry was dropped
    pub fn invalidate(
        &self,
        reference: &AssetReference,
    ) -> bool {
        self.entries.lock().pop(&Self::key(reference)).is_some()
    }

    /// Drops every entry of `tenant_id`, returning how many were dropped
    pub fn invalidate_tenant(
        &self,
        tenant_id: &TenantId,
    ) -> usize {
        let mut entries = self.entries.lock();
        let keys: Vec<CacheKey> = entries
            .iter()
            .filter(|((tenant, _), _)| tenant == tenant_id)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            entries.pop(key);
        }
        keys.len()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn key(reference: &AssetReference) -> CacheKey {
        (reference.tenant_id.clone(), reference.token.clone())
    }
}
