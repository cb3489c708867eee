use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tonic::codec::CompressionEncoding;
use tonic::Request;
use tonic::Response;
use tonic::Status;
use tonic_health::server::health_reporter;
use tracing::debug;

use crate::proto::asset::asset_management_server::AssetManagement;
use crate::proto::asset::asset_management_server::AssetManagementServer;
use crate::proto::asset::Asset;
use crate::proto::asset::GetAssetByTokenRequest;
use crate::proto::asset::GetAssetByTokenResponse;
use crate::proto::event::device_event_management_server::DeviceEventManagement;
use crate::proto::event::device_event_management_server::DeviceEventManagementServer;
use crate::proto::event::AddDeviceEventRequest;
use crate::proto::event::AddDeviceEventResponse;
use crate::Result;

/// Asset and event management backend answering from memory
#[derive(Debug, Default)]
pub struct MockBackend {
    assets: DashMap<(String, String), Asset>,
    events: Mutex<Vec<AddDeviceEventRequest>>,
    asset_failure: Mutex<Option<Status>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_asset(
        self,
        tenant_id: &str,
        asset: Asset,
    ) -> Self {
        self.assets.insert((tenant_id.to_string(), asset.token.clone()), asset);
        self
    }

    pub fn fail_assets_with(
        &self,
        status: Option<Status>,
    ) {
        *self.asset_failure.lock() = status;
    }

    pub fn events(&self) -> Vec<AddDeviceEventRequest> {
        self.events.lock().clone()
    }

    /// Serves both services plus grpc.health.v1 on an ephemeral port until
    /// `rx` fires.
    pub async fn mock_listener(
        self: Arc<Self>,
        rx: oneshot::Receiver<()>,
    ) -> Result<SocketAddr> {
        let (mut health_reporter, health_service) = health_reporter();
        health_reporter.set_serving::<AssetManagementServer<MockBackend>>().await;
        health_reporter
            .set_serving::<DeviceEventManagementServer<MockBackend>>()
            .await;

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        debug!("starting mock backend: addr={addr}");

        tokio::spawn(async move {
            let result = tonic::transport::Server::builder()
                .add_service(health_service)
                .add_service(
                    AssetManagementServer::from_arc(self.clone())
                        .accept_compressed(CompressionEncoding::Gzip)
                        .send_compressed(CompressionEncoding::Gzip),
                )
                .add_service(
                    DeviceEventManagementServer::from_arc(self)
                        .accept_compressed(CompressionEncoding::Gzip)
                        .send_compressed(CompressionEncoding::Gzip),
                )
                .serve_with_incoming_shutdown(tokio_stream::wrappers::TcpListenerStream::new(listener), async {
                    rx.await.ok();
                })
                .await;
            if let Err(e) = result {
                debug!("mock backend stopped: {:?}", e);
            }
        });

        Ok(addr)
    }
}

pub fn mock_asset(
    token: &str,
    name: &str,
) -> Asset {
    Asset {
        token: token.to_string(),
        name: name.to_string(),
        asset_type: "equipment".to_string(),
        metadata: Default::default(),
    }
}

#[tonic::async_trait]
impl AssetManagement for MockBackend {
    async fn get_asset_by_token(
        &self,
        request: Request<GetAssetByTokenRequest>,
    ) -> std::result::Result<Response<GetAssetByTokenResponse>, Status> {
        if let Some(status) = self.asset_failure.lock().clone() {
            return Err(status);
        }
        let request = request.into_inner();
        let asset = self
            .assets
            .get(&(request.tenant_id, request.token))
            .map(|a| a.value().clone());
        Ok(Response::new(GetAssetByTokenResponse { asset }))
    }
}

#[tonic::async_trait]
impl DeviceEventManagement for MockBackend {
    async fn add_device_event(
        &self,
        request: Request<AddDeviceEventRequest>,
    ) -> std::result::Result<Response<AddDeviceEventResponse>, Status> {
        let mut events = self.events.lock();
        events.push(request.into_inner());
        Ok(Response::new(AddDeviceEventResponse {
            event_id: format!("evt-{}", events.len()),
        }))
    }
}
