use std::net::SocketAddr;
use std::path::PathBuf;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;
use tonic::metadata::AsciiMetadataKey;

use crate::constants::DEFAULT_TENANT_METADATA_KEY;
use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServiceConfig {
    /// Identifier of this microservice instance, used in logs
    #[serde(default = "default_instance_id")]
    pub instance_id: String,

    /// Address the device management gRPC server binds to
    #[serde(default = "default_listen_address")]
    pub listen_address: SocketAddr,

    /// Request metadata key carrying the tenant id
    #[serde(default = "default_tenant_metadata_key")]
    pub tenant_metadata_key: String,

    /// Directory for log files; logs go to stdout when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            instance_id: default_instance_id(),
            listen_address: default_listen_address(),
            tenant_metadata_key: default_tenant_metadata_key(),
            log_dir: None,
        }
    }
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.instance_id.trim().is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "service.instance_id cannot be empty".into(),
            )));
        }

        if AsciiMetadataKey::from_bytes(self.tenant_metadata_key.as_bytes()).is_err() {
            return Err(Error::Config(ConfigError::Message(format!(
                "service.tenant_metadata_key {:?} is not a valid ASCII metadata key",
                self.tenant_metadata_key
            ))));
        }

        Ok(())
    }
}

fn default_instance_id() -> String {
    "device-management-1".to_string()
}
fn default_listen_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9000))
}
fn default_tenant_metadata_key() -> String {
    DEFAULT_TENANT_METADATA_KEY.to_string()
}
