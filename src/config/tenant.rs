use std::collections::HashSet;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Device registered when a tenant engine starts
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DeviceSeedConfig {
    pub token: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub device_type: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TenantConfig {
    pub id: String,

    /// Display name, defaults to the id
    #[serde(default)]
    pub name: String,

    /// Start the engine together with the microservice
    #[serde(default = "default_bootstrap")]
    pub bootstrap: bool,

    #[serde(default)]
    pub devices: Vec<DeviceSeedConfig>,
}

impl TenantConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            bootstrap: default_bootstrap(),
            devices: vec![],
        }
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TenantsConfig {
    /// Tenants known to this instance
    #[serde(default)]
    pub entries: Vec<TenantConfig>,

    /// Refuse to create engines for tenants without an entry
    #[serde(default = "default_require_configuration")]
    pub require_configuration: bool,

    /// Bound on a graceful engine stop before it is terminated
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

impl Default for TenantsConfig {
    fn default() -> Self {
        Self {
            entries: vec![],
            require_configuration: default_require_configuration(),
            stop_timeout_ms: default_stop_timeout_ms(),
        }
    }
}

impl TenantsConfig {
    pub fn get(
        &self,
        tenant_id: &str,
    ) -> Option<&TenantConfig> {
        self.entries.iter().find(|t| t.id == tenant_id)
    }

    pub fn tenant_ids(&self) -> Vec<&str> {
        self.entries.iter().map(|t| t.id.as_str()).collect()
    }

    /// Ids of tenants started with the microservice
    pub fn bootstrap_ids(&self) -> Vec<String> {
        self.entries.iter().filter(|t| t.bootstrap).map(|t| t.id.clone()).collect()
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for tenant in &self.entries {
            if tenant.id.trim().is_empty() {
                return Err(Error::Config(ConfigError::Message(
                    "tenants.entries contains an empty id".into(),
                )));
            }
            if !seen.insert(tenant.id.as_str()) {
                return Err(Error::Config(ConfigError::Message(format!(
                    "tenant {} is configured twice",
                    tenant.id
                ))));
            }
            let mut tokens = HashSet::new();
            for device in &tenant.devices {
                if device.token.is_empty() || !tokens.insert(device.token.as_str()) {
                    return Err(Error::Config(ConfigError::Message(format!(
                        "tenant {} seeds an empty or duplicate device token {:?}",
                        tenant.id, device.token
                    ))));
                }
            }
        }

        if self.stop_timeout_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "tenants.stop_timeout_ms must be > 0".into(),
            )));
        }

        Ok(())
    }
}

fn default_bootstrap() -> bool {
    true
}
fn default_require_configuration() -> bool {
    true
}
fn default_stop_timeout_ms() -> u64 {
    30_000
}
