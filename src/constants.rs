// -
// Configuration

/// Environment variable pointing at an optional TOML configuration file
pub(crate) const CONFIG_PATH_ENV: &str = "CONFIG_PATH";

/// Prefix of environment overrides, e.g. `DEVMGMT__SERVICE__LISTEN_ADDRESS`
pub(crate) const CONFIG_ENV_PREFIX: &str = "DEVMGMT";

// -
// gRPC

/// Request metadata key carrying the tenant id
pub const DEFAULT_TENANT_METADATA_KEY: &str = "tenant-id";

/// Health-check service name probed on asset backends
pub(crate) const DEFAULT_ASSET_HEALTH_SERVICE: &str = "devmgmt.asset.AssetManagement";
pub(crate) const EVENT_HEALTH_SERVICE: &str = "devmgmt.event.DeviceEventManagement";

pub(crate) const ASSET_DEMUX_NAME: &str = "asset-management-demux";

// -
// Device events

pub(crate) const EVENT_DEVICE_ASSIGNMENT_CREATED: &str = "DeviceAssignmentCreated";
pub(crate) const EVENT_META_ASSIGNMENT_TOKEN: &str = "assignment_token";
pub(crate) const EVENT_META_ASSET_TOKEN: &str = "asset_token";
