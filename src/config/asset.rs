use std::collections::HashSet;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::DEFAULT_ASSET_HEALTH_SERVICE;
use crate::utils::net::normalize_target;
use crate::Error;
use crate::Result;

/// How a request is dispatched over the channels of a route
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Round-robin over healthy channels, failing over on transport errors
    #[default]
    SingleTarget,
    /// Broadcast to every healthy channel and merge the responses
    FanOut,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EventManagementConfig {
    /// Address of the device event management service
    #[serde(default = "default_event_target")]
    pub target: String,
}

impl Default for EventManagementConfig {
    fn default() -> Self {
        Self {
            target: default_event_target(),
        }
    }
}

impl EventManagementConfig {
    pub fn validate(&self) -> Result<()> {
        normalize_target(&self.target).map_err(|e| {
            Error::Config(ConfigError::Message(format!("event_management.target: {e}")))
        })?;
        Ok(())
    }
}

/// Tenant-specific override of the asset backends used for a tenant
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TenantRouteConfig {
    pub tenant_id: String,
    pub targets: Vec<String>,
    #[serde(default)]
    pub selection: SelectionPolicy,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AssetManagementConfig {
    /// Equivalent asset management backends
    #[serde(default)]
    pub targets: Vec<String>,

    /// Policy of the default route
    #[serde(default)]
    pub selection: SelectionPolicy,

    /// Per-tenant routes; tenants without a route use every target
    #[serde(default)]
    pub routes: Vec<TenantRouteConfig>,

    /// Interval of grpc.health.v1 probes (0 disables probing)
    #[serde(default)]
    pub health_probe_interval_ms: u64,

    /// Service name sent in health probes
    #[serde(default = "default_health_service")]
    pub health_service: String,
}

impl Default for AssetManagementConfig {
    fn default() -> Self {
        Self {
            targets: vec![],
            selection: SelectionPolicy::default(),
            routes: vec![],
            health_probe_interval_ms: 0,
            health_service: default_health_service(),
        }
    }
}

impl AssetManagementConfig {
    pub fn validate(&self) -> Result<()> {
        let mut known = HashSet::new();
        for target in &self.targets {
            normalize_target(target).map_err(|e| {
                Error::Config(ConfigError::Message(format!("asset_management.targets: {e}")))
            })?;
            if !known.insert(target.as_str()) {
                return Err(Error::Config(ConfigError::Message(format!(
                    "asset_management.targets contains {target} twice"
                ))));
            }
        }

        let mut routed = HashSet::new();
        for route in &self.routes {
            if route.tenant_id.trim().is_empty() {
                return Err(Error::Config(ConfigError::Message(
                    "asset_management.routes entry has an empty tenant_id".into(),
                )));
            }
            if !routed.insert(route.tenant_id.as_str()) {
                return Err(Error::Config(ConfigError::Message(format!(
                    "asset_management.routes has more than one route for tenant {}",
                    route.tenant_id
                ))));
            }
            if let Some(unknown) = route.targets.iter().find(|t| !known.contains(t.as_str())) {
                return Err(Error::Config(ConfigError::Message(format!(
                    "route for tenant {} references unknown target {}",
                    route.tenant_id, unknown
                ))));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AssetCacheConfig {
    /// Maximum number of cached assets
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    /// Entry lifetime in milliseconds (0 disables caching)
    #[serde(default = "default_cache_ttl_ms")]
    pub ttl_ms: u64,
}

impl Default for AssetCacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl_ms: default_cache_ttl_ms(),
        }
    }
}

impl AssetCacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::Config(ConfigError::Message(
                "asset_cache.capacity must be > 0".into(),
            )));
        }
        Ok(())
    }
}

fn default_event_target() -> String {
    "http://127.0.0.1:9100".to_string()
}
fn default_health_service() -> String {
    DEFAULT_ASSET_HEALTH_SERVICE.to_string()
}
fn default_cache_capacity() -> usize {
    1024
}
fn default_cache_ttl_ms() -> u64 {
    30_000
}
