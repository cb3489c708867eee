use std::sync::Arc;

use dashmap::DashMap;
use tonic::async_trait;
use tracing::debug;
use tracing::trace;

use crate::ApiError;
use crate::Asset;
use crate::AssetCache;
use crate::AssetError;
use crate::AssetReference;
use crate::AssetSource;
use crate::Error;
use crate::Lifecycle;
use crate::LifecycleComponent;
use crate::LifecycleStatus;
use crate::Result;
use crate::TenantId;

/// Resolves asset references for tenant engines, caching hits.
pub struct AssetResolver {
    lifecycle: Lifecycle,
    source: Arc<dyn AssetSource>,
    cache: AssetCache,
    /// One fetch per reference at a time; later callers wait and read the cache
    in_flight: DashMap<AssetReference, Arc<tokio::sync::Mutex<()>>>,
}

impl AssetResolver {
    pub fn new(
        source: Arc<dyn AssetSource>,
        cache: AssetCache,
    ) -> Self {
        Self {
            lifecycle: Lifecycle::new("asset-resolver"),
            source,
            cache,
            in_flight: DashMap::new(),
        }
    }

    /// Looks `reference` up in the cache, then in the source.
    ///
    /// # Errors
    /// - `AssetNotFound` when every consulted backend answered without it
    /// - `ResolutionUnavailable` when no backend could answer, or the
    ///   resolver is not started
    pub async fn resolve(
        &self,
        reference: &AssetReference,
    ) -> Result<Asset> {
        let status = self.lifecycle.status();
        if status != LifecycleStatus::Started {
            return Err(AssetError::ResolutionUnavailable(format!("asset resolver is {status}")).into());
        }

        if let Some(asset) = self.cache.get(reference) {
            trace!(%reference, "asset cache hit");
            return Ok(asset);
        }
        if !self.cache.is_enabled() {
            return self.fetch(reference).await;
        }

        let flight = self.in_flight.entry(reference.clone()).or_default().clone();
        let result = {
            let _guard = flight.lock().await;
            match self.cache.get(reference) {
                Some(asset) => {
                    trace!(%reference, "asset fetched by concurrent caller");
                    Ok(asset)
                }
                None => self.fetch(reference).await,
            }
        };
        // map and this call hold the only references once nobody waits
        self.in_flight
            .remove_if(reference, |_, f| Arc::ptr_eq(f, &flight) && Arc::strong_count(f) == 2);
        result
    }

    async fn fetch(
        &self,
        reference: &AssetReference,
    ) -> Result<Asset> {
        match self.source.fetch_asset(reference).await {
            Ok(Some(asset)) => {
                self.cache.insert(reference, asset.clone());
                Ok(asset)
            }
            Ok(None) => Err(AssetError::AssetNotFound {
                tenant_id: reference.tenant_id.to_string(),
                token: reference.token.clone(),
            }
            .into()),
            Err(Error::Api(e @ (ApiError::NoHealthyChannel | ApiError::Unavailable(_) | ApiError::Timeout { .. }))) => {
                debug!(%reference, "asset resolution unavailable: {}", e);
                Err(AssetError::ResolutionUnavailable(e.to_string()).into())
            }
            Err(e) => Err(e),
        }
    }

    pub fn invalidate(
        &self,
        reference: &AssetReference,
    ) -> bool {
        self.cache.invalidate(reference)
    }

    pub fn invalidate_tenant(
        &self,
        tenant_id: &TenantId,
    ) -> usize {
        self.cache.invalidate_tenant(tenant_id)
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache(&self) -> &AssetCache {
        &self.cache
    }
}

#[async_trait]
impl LifecycleComponent for AssetResolver {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        self.cache.clear();
        Ok(())
    }
}
