use std::sync::Arc;

use tonic::Request;
use tonic::Response;
use tonic::Status;
use tracing::debug;

use crate::proto::device::device_management_server::DeviceManagement;
use crate::proto::device::CreateDeviceAssignmentRequest;
use crate::proto::device::CreateDeviceRequest;
use crate::proto::device::Device as ProtoDevice;
use crate::proto::device::DeviceAssignment as ProtoDeviceAssignment;
use crate::proto::device::DeviceAssignmentResponse;
use crate::proto::device::DeviceResponse;
use crate::proto::device::GetDeviceByTokenRequest;
use crate::proto::device::ListDevicesRequest;
use crate::proto::device::ListDevicesResponse;
use crate::Device;
use crate::DeviceAssignment;
use crate::DeviceManagementTenantEngine;
use crate::NewDevice;
use crate::TenantEngineManager;
use crate::TenantId;

type EngineManager = TenantEngineManager<dyn DeviceManagementTenantEngine>;

/// `DeviceManagement` handlers. Every call is routed to the Started engine of
/// the tenant named in the request metadata.
pub struct DeviceManagementService {
    manager: Arc<EngineManager>,
    tenant_metadata_key: String,
}

impl DeviceManagementService {
    pub fn new(
        manager: Arc<EngineManager>,
        tenant_metadata_key: impl Into<String>,
    ) -> Self {
        Self {
            manager,
            tenant_metadata_key: tenant_metadata_key.into(),
        }
    }

    pub fn tenant_metadata_key(&self) -> &str {
        &self.tenant_metadata_key
    }

    fn tenant_id<T>(
        &self,
        request: &Request<T>,
    ) -> Result<TenantId, Status> {
        let value = request
            .metadata()
            .get(self.tenant_metadata_key.as_str())
            .ok_or_else(|| {
                Status::invalid_argument(format!("missing {} request metadata", self.tenant_metadata_key))
            })?;
        let tenant = value.to_str().map_err(|_| {
            Status::invalid_argument(format!("{} metadata is not valid ASCII", self.tenant_metadata_key))
        })?;
        Ok(TenantId::new(tenant)?)
    }

    fn engine<T>(
        &self,
        request: &Request<T>,
    ) -> Result<Arc<dyn DeviceManagementTenantEngine>, Status> {
        let tenant_id = self.tenant_id(request)?;
        self.manager.get_engine(&tenant_id).map_err(|e| {
            debug!(tenant = %tenant_id, "rejecting request: {}", e);
            Status::from(e)
        })
    }
}

#[tonic::async_trait]
impl DeviceManagement for DeviceManagementService {
    async fn create_device(
        &self,
        request: Request<CreateDeviceRequest>,
    ) -> Result<Response<DeviceResponse>, Status> {
        let engine = self.engine(&request)?;
        let req = request.into_inner();
        let device = engine.create_device(NewDevice {
            token: req.token,
            name: req.name,
            device_type: req.device_type,
            metadata: req.metadata,
        })?;

        Ok(Response::new(DeviceResponse {
            device: Some(device.into()),
        }))
    }

    async fn get_device_by_token(
        &self,
        request: Request<GetDeviceByTokenRequest>,
    ) -> Result<Response<DeviceResponse>, Status> {
        let engine = self.engine(&request)?;
        let device = engine.get_device(&request.get_ref().token)?;

        Ok(Response::new(DeviceResponse {
            device: Some(device.into()),
        }))
    }

    async fn list_devices(
        &self,
        request: Request<ListDevicesRequest>,
    ) -> Result<Response<ListDevicesResponse>, Status> {
        let engine = self.engine(&request)?;
        let device_type = request.get_ref().device_type.as_str();
        let filter = (!device_type.is_empty()).then_some(device_type);
        let devices = engine.list_devices(filter)?;

        Ok(Response::new(ListDevicesResponse {
            devices: devices.into_iter().map(ProtoDevice::from).collect(),
        }))
    }

    async fn create_device_assignment(
        &self,
        request: Request<CreateDeviceAssignmentRequest>,
    ) -> Result<Response<DeviceAssignmentResponse>, Status> {
        let engine = self.engine(&request)?;
        let req = request.into_inner();
        let assignment = engine.create_assignment(&req.device_token, &req.asset_token).await?;

        Ok(Response::new(DeviceAssignmentResponse {
            assignment: Some(assignment.into()),
        }))
    }
}

impl From<Device> for ProtoDevice {
    fn from(device: Device) -> Self {
        ProtoDevice {
            token: device.token,
            name: device.name,
            device_type: device.device_type,
            metadata: device.metadata,
            created_at_ms: device.created_at_ms,
        }
    }
}

impl From<DeviceAssignment> for ProtoDeviceAssignment {
    fn from(assignment: DeviceAssignment) -> Self {
        ProtoDeviceAssignment {
            token: assignment.token,
            device_token: assignment.device_token,
            asset_token: assignment.asset_token,
            asset_name: assignment.asset_name,
            assigned_at_ms: assignment.assigned_at_ms,
        }
    }
}
