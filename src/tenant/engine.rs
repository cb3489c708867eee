use std::fmt;
use std::sync::Arc;

use tonic::async_trait;

use crate::LifecycleComponent;
use crate::Result;
use crate::TenantError;

/// Opaque, non-empty tenant identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(TenantError::InvalidId(id).into());
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Independently lifecycled processing unit of one tenant
pub trait TenantEngine: LifecycleComponent {
    fn tenant_id(&self) -> &TenantId;
}

/// Constructs engines for the [`TenantEngineManager`].
///
/// Construction only allocates; resources are acquired when the manager
/// starts the engine.
///
/// [`TenantEngineManager`]: crate::TenantEngineManager
#[async_trait]
pub trait TenantEngineFactory<E>: Send + Sync
where
    E: ?Sized + Send + Sync + 'static,
{
    async fn create_engine(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Arc<E>>;
}
