//! Asset resolution for tenant engines.
//!
//! [`AssetResolver`] answers "which asset is `token` for this tenant" through
//! an [`AssetSource`] (in production the asset-management [`ApiDemux`]) and
//! keeps recent answers in a bounded, expiring [`AssetCache`].
//!
//! [`ApiDemux`]: crate::ApiDemux

mod cache;
mod resolver;
mod source;

pub use cache::*;
pub use resolver::*;
pub use source::*;


use std::collections::HashMap;
use std::fmt;

use crate::proto::asset::Asset as ProtoAsset;
use crate::TenantId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub token: String,
    pub name: String,
    pub asset_type: String,
    pub metadata: HashMap<String, String>,
}

impl From<ProtoAsset> for Asset {
    fn from(asset: ProtoAsset) -> Self {
        Self {
            token: asset.token,
            name: asset.name,
            asset_type: asset.asset_type,
            metadata: asset.metadata,
        }
    }
}

/// Tenant-scoped asset token
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetReference {
    pub tenant_id: TenantId,
    pub token: String,
}

impl AssetReference {
    pub fn new(
        tenant_id: TenantId,
        token: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id,
            token: token.into(),
        }
    }
}

impl fmt::Display for AssetReference {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.token)
    }
}
