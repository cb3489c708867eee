use std::collections::HashMap;

#[cfg(test)]
use mockall::automock;
use tonic::async_trait;
use tonic::codec::CompressionEncoding;
use tonic::transport::Channel;
use tracing::debug;

use crate::proto::event::device_event_management_client::DeviceEventManagementClient;
use crate::proto::event::AddDeviceEventRequest;
use crate::ApiChannel;
use crate::GrpcConnector;
use crate::Result;
use crate::TenantId;

/// Event recorded against a device in the event-management service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEvent {
    pub tenant_id: TenantId,
    pub device_token: String,
    pub event_type: String,
    pub occurred_at_ms: i64,
    pub metadata: HashMap<String, String>,
}

/// Destination of device events emitted by tenant engines.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DeviceEventSink: Send + Sync {
    /// Returns the id the sink assigned to the event.
    async fn emit(
        &self,
        event: DeviceEvent,
    ) -> Result<String>;
}

#[async_trait]
impl DeviceEventSink for ApiChannel<GrpcConnector> {
    async fn emit(
        &self,
        event: DeviceEvent,
    ) -> Result<String> {
        let request = AddDeviceEventRequest {
            tenant_id: event.tenant_id.to_string(),
            device_token: event.device_token,
            event_type: event.event_type,
            occurred_at_ms: event.occurred_at_ms,
            metadata: event.metadata,
        };

        let response = self
            .send(|channel: Channel| async move {
                let mut client = DeviceEventManagementClient::new(channel)
                    .send_compressed(CompressionEncoding::Gzip)
                    .accept_compressed(CompressionEncoding::Gzip);
                client.add_device_event(tonic::Request::new(request)).await
            })
            .await?
            .into_inner();

        debug!(event_id = %response.event_id, "device event recorded");
        Ok(response.event_id)
    }
}
