use std::collections::HashMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use nanoid::nanoid;
use tonic::async_trait;
use tracing::debug;
use tracing::info;

use crate::constants::EVENT_DEVICE_ASSIGNMENT_CREATED;
use crate::constants::EVENT_META_ASSET_TOKEN;
use crate::constants::EVENT_META_ASSIGNMENT_TOKEN;
use crate::utils::time::get_now_as_i64;
use crate::AssetReference;
use crate::AssetResolver;
use crate::DeviceError;
use crate::DeviceEvent;
use crate::DeviceEventSink;
use crate::Lifecycle;
use crate::LifecycleComponent;
use crate::LifecycleStatus;
use crate::Result;
use crate::TenantConfig;
use crate::TenantEngine;
use crate::TenantEngineFactory;
use crate::TenantError;
use crate::TenantId;
use crate::TenantsConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub token: String,
    pub name: String,
    pub device_type: String,
    pub metadata: HashMap<String, String>,
    pub created_at_ms: i64,
}

/// Device registration request; an empty token is generated
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewDevice {
    pub token: String,
    pub name: String,
    pub device_type: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAssignment {
    pub token: String,
    pub device_token: String,
    pub asset_token: String,
    pub asset_name: String,
    pub assigned_at_ms: i64,
}

/// Tenant engine serving the device management API
#[async_trait]
pub trait DeviceManagementTenantEngine: TenantEngine {
    fn create_device(
        &self,
        device: NewDevice,
    ) -> Result<Device>;

    fn get_device(
        &self,
        token: &str,
    ) -> Result<Device>;

    /// Devices ordered by token, optionally restricted to one device type
    fn list_devices(
        &self,
        device_type: Option<&str>,
    ) -> Result<Vec<Device>>;

    /// Assigns a device to an asset, emitting an assignment event.
    async fn create_assignment(
        &self,
        device_token: &str,
        asset_token: &str,
    ) -> Result<DeviceAssignment>;
}

/// In-memory device registry of one tenant.
pub struct DeviceManagementEngine {
    lifecycle: Lifecycle,
    tenant_id: TenantId,
    config: TenantConfig,
    devices: DashMap<String, Device>,
    assignments: DashMap<String, DeviceAssignment>,
    resolver: Arc<AssetResolver>,
    events: Arc<dyn DeviceEventSink>,
}

impl DeviceManagementEngine {
    pub fn new(
        tenant_id: TenantId,
        config: TenantConfig,
        resolver: Arc<AssetResolver>,
        events: Arc<dyn DeviceEventSink>,
    ) -> Self {
        Self {
            lifecycle: Lifecycle::new(format!("tenant-engine[{tenant_id}]")),
            tenant_id,
            config,
            devices: DashMap::new(),
            assignments: DashMap::new(),
            resolver,
            events,
        }
    }

    pub fn config(&self) -> &TenantConfig {
        &self.config
    }

    /// Assignments of `device_token`, oldest first
    pub fn assignments_of(
        &self,
        device_token: &str,
    ) -> Vec<DeviceAssignment> {
        let mut assignments: Vec<DeviceAssignment> = self
            .assignments
            .iter()
            .filter(|a| a.device_token == device_token)
            .map(|a| a.value().clone())
            .collect();
        assignments.sort_by_key(|a| a.assigned_at_ms);
        assignments
    }

    fn ensure_started(&self) -> Result<()> {
        let status = self.lifecycle.status();
        if status != LifecycleStatus::Started {
            return Err(TenantError::NotReady {
                tenant_id: self.tenant_id.to_string(),
                status,
            }
            .into());
        }
        Ok(())
    }

    fn register(
        &self,
        device: NewDevice,
    ) -> Result<Device> {
        let token = if device.token.is_empty() { nanoid!() } else { device.token };
        if token.chars().any(char::is_whitespace) {
            return Err(DeviceError::InvalidRequest(format!("device token {token:?} contains whitespace")).into());
        }

        match self.devices.entry(token.clone()) {
            Entry::Occupied(_) => Err(DeviceError::AlreadyExists(token).into()),
            Entry::Vacant(vacant) => {
                let device = Device {
                    token,
                    name: device.name,
                    device_type: device.device_type,
                    metadata: device.metadata,
                    created_at_ms: get_now_as_i64(),
                };
                vacant.insert(device.clone());
                Ok(device)
            }
        }
    }
}

impl TenantEngine for DeviceManagementEngine {
    fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }
}

#[async_trait]
impl DeviceManagementTenantEngine for DeviceManagementEngine {
    fn create_device(
        &self,
        device: NewDevice,
    ) -> Result<Device> {
        self.ensure_started()?;
        let device = self.register(device)?;
        debug!(tenant = %self.tenant_id, device = %device.token, "device created");
        Ok(device)
    }

    fn get_device(
        &self,
        token: &str,
    ) -> Result<Device> {
        self.ensure_started()?;
        self.devices
            .get(token)
            .map(|d| d.value().clone())
            .ok_or_else(|| DeviceError::NotFound(token.to_string()).into())
    }

    fn list_devices(
        &self,
        device_type: Option<&str>,
    ) -> Result<Vec<Device>> {
        self.ensure_started()?;
        let mut devices: Vec<Device> = self
            .devices
            .iter()
            .filter(|d| device_type.map_or(true, |t| d.device_type == t))
            .map(|d| d.value().clone())
            .collect();
        devices.sort_by(|a, b| a.token.cmp(&b.token));
        Ok(devices)
    }

    async fn create_assignment(
        &self,
        device_token: &str,
        asset_token: &str,
    ) -> Result<DeviceAssignment> {
        self.ensure_started()?;
        if asset_token.is_empty() {
            return Err(DeviceError::InvalidRequest("asset token is required".to_string()).into());
        }
        if !self.devices.contains_key(device_token) {
            return Err(DeviceError::NotFound(device_token.to_string()).into());
        }

        let asset = self
            .resolver
            .resolve(&AssetReference::new(self.tenant_id.clone(), asset_token))
            .await?;

        let assignment = DeviceAssignment {
            token: nanoid!(),
            device_token: device_token.to_string(),
            asset_token: asset.token,
            asset_name: asset.name,
            assigned_at_ms: get_now_as_i64(),
        };

        let event_id = self
            .events
            .emit(DeviceEvent {
                tenant_id: self.tenant_id.clone(),
                device_token: device_token.to_string(),
                event_type: EVENT_DEVICE_ASSIGNMENT_CREATED.to_string(),
                occurred_at_ms: assignment.assigned_at_ms,
                metadata: HashMap::from([
                    (EVENT_META_ASSIGNMENT_TOKEN.to_string(), assignment.token.clone()),
                    (EVENT_META_ASSET_TOKEN.to_string(), assignment.asset_token.clone()),
                ]),
            })
            .await?;

        self.assignments.insert(assignment.token.clone(), assignment.clone());
        info!(
            tenant = %self.tenant_id,
            device = device_token,
            asset = %assignment.asset_token,
            event_id = %event_id,
            "device assigned"
        );
        Ok(assignment)
    }
}

#[async_trait]
impl LifecycleComponent for DeviceManagementEngine {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    async fn initialize(&self) -> Result<()> {
        for seed in &self.config.devices {
            self.register(NewDevice {
                token: seed.token.clone(),
                name: seed.name.clone(),
                device_type: seed.device_type.clone(),
                metadata: HashMap::new(),
            })?;
        }
        debug!(
            tenant = %self.tenant_id,
            name = self.config.display_name(),
            devices = self.devices.len(),
            "tenant engine initialized"
        );
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        self.devices.clear();
        self.assignments.clear();
        Ok(())
    }
}

/// Builds [`DeviceManagementEngine`]s from the tenants configuration.
pub struct DeviceManagementEngineFactory {
    tenants: TenantsConfig,
    resolver: Arc<AssetResolver>,
    events: Arc<dyn DeviceEventSink>,
}

impl DeviceManagementEngineFactory {
    pub fn new(
        tenants: TenantsConfig,
        resolver: Arc<AssetResolver>,
        events: Arc<dyn DeviceEventSink>,
    ) -> Self {
        Self {
            tenants,
            resolver,
            events,
        }
    }
}

#[async_trait]
impl TenantEngineFactory<dyn DeviceManagementTenantEngine> for DeviceManagementEngineFactory {
    async fn create_engine(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Arc<dyn DeviceManagementTenantEngine>> {
        let config = match self.tenants.get(tenant_id.as_str()) {
            Some(config) => config.clone(),
            None if self.tenants.require_configuration => {
                return Err(TenantError::MissingConfiguration(tenant_id.to_string()).into());
            }
            None => TenantConfig::new(tenant_id.as_str()),
        };

        Ok(Arc::new(DeviceManagementEngine::new(
            tenant_id.clone(),
            config,
            self.resolver.clone(),
            self.events.clone(),
        )))
    }
}
