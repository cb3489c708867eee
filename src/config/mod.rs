//! Configuration management for the device management microservice.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support (`CONFIG_PATH`)
//! - Environment variable overrides (`DEVMGMT__SECTION__KEY`)
//! - Component-wise validation
mod asset;
mod network;
mod retry;
mod service;
mod tenant;
pub use asset::*;
pub use network::*;
pub use retry::*;
pub use service::*;
pub use tenant::*;
use std::env;
use std::fmt::Debug;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::CONFIG_ENV_PREFIX;
use crate::constants::CONFIG_PATH_ENV;
use crate::Result;

/// Main configuration container for the microservice and its components
///
/// Combines all subsystem configurations with hierarchical override support:
/// 1. Default values from code implementation
/// 2. Configuration file specified by `CONFIG_PATH`
/// 3. Environment variables (highest priority)
#[derive(Serialize, Deserialize, Clone, Default)]
pub struct MicroserviceConfig {
    /// Instance identity, listener and logging
    #[serde(default)]
    pub service: ServiceConfig,
    /// Connection tuning for the server and outbound API channels
    #[serde(default)]
    pub network: NetworkConfig,
    /// Reconnect policy of outbound API channels
    #[serde(default)]
    pub retry: RetryPolicies,
    /// Device event management API
    #[serde(default)]
    pub event_management: EventManagementConfig,
    /// Asset management API backends and routing
    #[serde(default)]
    pub asset_management: AssetManagementConfig,
    /// Resolved asset cache
    #[serde(default)]
    pub asset_cache: AssetCacheConfig,
    /// Tenants hosted by this instance
    #[serde(default)]
    pub tenants: TenantsConfig,
}

impl Debug for MicroserviceConfig {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("MicroserviceConfig")
            .field("service", &self.service)
            .field("asset_targets", &self.asset_management.targets)
            .field("tenants", &self.tenants.tenant_ids())
            .finish()
    }
}

impl MicroserviceConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Configuration sources are merged in the following order (later sources override earlier):
    /// 1. Type defaults (lowest priority)
    /// 2. Configuration file from `CONFIG_PATH` environment variable (if set)
    /// 3. Environment variables with `DEVMGMT__` prefix (highest priority)
    ///
    /// # Note
    /// Validation is deferred so that `with_override_config()` can still be
    /// applied. Callers MUST call `validate()` before using the configuration.
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("DEVMGMT__SERVICE__LISTEN_ADDRESS", "0.0.0.0:9090");
    /// let cfg = MicroserviceConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var(CONFIG_PATH_ENV) {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(environment());

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies additional configuration overrides from file without validation.
    ///
    /// Merging order (later sources override earlier):
    /// 1. Current configuration values
    /// 2. New configuration file
    /// 3. Latest environment variables (highest priority)
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(environment())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates every subsystem and returns the validated instance.
    ///
    /// # Example
    /// ```ignore
    /// let config = MicroserviceConfig::new()?
    ///     .with_override_config("app.toml")?
    ///     .validate()?;
    /// ```
    pub fn validate(self) -> Result<Self> {
        self.service.validate()?;
        self.network.validate()?;
        self.retry.validate()?;
        self.event_management.validate()?;
        self.asset_management.validate()?;
        self.asset_cache.validate()?;
        self.tenants.validate()?;
        Ok(self)
    }
}

fn environment() -> Environment {
    Environment::with_prefix(CONFIG_ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
}
