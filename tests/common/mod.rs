use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Once;
use std::time::Duration;

use dashmap::DashMap;
use devmgmt::proto::asset::asset_management_server::AssetManagement;
use devmgmt::proto::asset::asset_management_server::AssetManagementServer;
use devmgmt::proto::asset::Asset;
use devmgmt::proto::asset::GetAssetByTokenRequest;
use devmgmt::proto::asset::GetAssetByTokenResponse;
use devmgmt::proto::device::device_management_client::DeviceManagementClient;
use devmgmt::proto::event::device_event_management_server::DeviceEventManagement;
use devmgmt::proto::event::device_event_management_server::DeviceEventManagementServer;
use devmgmt::proto::event::AddDeviceEventRequest;
use devmgmt::proto::event::AddDeviceEventResponse;
use devmgmt::BackoffPolicy;
use devmgmt::DeviceSeedConfig;
use devmgmt::MicroserviceConfig;
use devmgmt::TenantConfig;
use devmgmt::DEFAULT_TENANT_METADATA_KEY;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::codec::CompressionEncoding;
use tonic::transport::Channel;
use tonic::Request;
use tonic::Response;
use tonic::Status;
use tonic_health::server::health_reporter;
use tracing_subscriber::EnvFilter;

pub const WAIT_FOR_HEALTHY: Duration = Duration::from_secs(3);

static LOGGER_INIT: Once = Once::new();

pub fn enable_logger() {
    LOGGER_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
            .with_test_writer()
            .try_init();
    });
}

/// In-process asset and event management service.
#[derive(Default)]
pub struct Backend {
    assets: DashMap<(String, String), Asset>,
    events: Mutex<Vec<AddDeviceEventRequest>>,
    asset_calls: Mutex<usize>,
}

impl Backend {
    pub fn with_asset(
        self,
        tenant_id: &str,
        token: &str,
        name: &str,
    ) -> Self {
        self.assets.insert(
            (tenant_id.to_string(), token.to_string()),
            Asset {
                token: token.to_string(),
                name: name.to_string(),
                asset_type: "equipment".to_string(),
                metadata: Default::default(),
            },
        );
        self
    }

    pub fn events(&self) -> Vec<AddDeviceEventRequest> {
        self.events.lock().clone()
    }

    pub fn asset_calls(&self) -> usize {
        *self.asset_calls.lock()
    }
}

#[tonic::async_trait]
impl AssetManagement for Backend {
    async fn get_asset_by_token(
        &self,
        request: Request<GetAssetByTokenRequest>,
    ) -> Result<Response<GetAssetByTokenResponse>, Status> {
        *self.asset_calls.lock() += 1;
        let request = request.into_inner();
        let asset = self
            .assets
            .get(&(request.tenant_id, request.token))
            .map(|a| a.value().clone());
        Ok(Response::new(GetAssetByTokenResponse { asset }))
    }
}

#[tonic::async_trait]
impl DeviceEventManagement for Backend {
    async fn add_device_event(
        &self,
        request: Request<AddDeviceEventRequest>,
    ) -> Result<Response<AddDeviceEventResponse>, Status> {
        let mut events = self.events.lock();
        events.push(request.into_inner());
        Ok(Response::new(AddDeviceEventResponse {
            event_id: format!("evt-{}", events.len()),
        }))
    }
}

/// Running backend; dropping it shuts the server down.
pub struct BackendHandle {
    pub backend: Arc<Backend>,
    pub addr: SocketAddr,
    _shutdown: oneshot::Sender<()>,
}

pub async fn start_backend(backend: Backend) -> BackendHandle {
    let backend = Arc::new(backend);
    let (mut health, health_service) = health_reporter();
    health.set_serving::<AssetManagementServer<Backend>>().await;
    health.set_serving::<DeviceEventManagementServer<Backend>>().await;

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind backend");
    let addr = listener.local_addr().expect("backend addr");
    let (tx, rx) = oneshot::channel::<()>();

    let service = backend.clone();
    tokio::spawn(async move {
        let _ = tonic::transport::Server::builder()
            .add_service(health_service)
            .add_service(
                AssetManagementServer::from_arc(service.clone())
                    .accept_compressed(CompressionEncoding::Gzip)
                    .send_compressed(CompressionEncoding::Gzip),
            )
            .add_service(
                DeviceEventManagementServer::from_arc(service)
                    .accept_compressed(CompressionEncoding::Gzip)
                    .send_compressed(CompressionEncoding::Gzip),
            )
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async {
                rx.await.ok();
            })
            .await;
    });

    BackendHandle {
        backend,
        addr,
        _shutdown: tx,
    }
}

/// Microservice on an ephemeral port with one tenant `acme` owning `dev-1`.
pub fn microservice_config(
    event_backend: SocketAddr,
    asset_backends: &[SocketAddr],
) -> MicroserviceConfig {
    let mut config = MicroserviceConfig::default();
    config.service.listen_address = SocketAddr::from(([127, 0, 0, 1], 0));
    config.event_management.target = event_backend.to_string();
    config.asset_management.targets = asset_backends.iter().map(|a| a.to_string()).collect();
    config.retry.reconnect = BackoffPolicy {
        max_retries: 0,
        timeout_ms: 200,
        base_delay_ms: 10,
        max_delay_ms: 50,
    };
    config.tenants.entries = vec![TenantConfig {
        devices: vec![DeviceSeedConfig {
            token: "dev-1".to_string(),
            name: "Sensor 1".to_string(),
            device_type: "sensor".to_string(),
        }],
        ..TenantConfig::new("acme")
    }];
    config
}

pub async fn client(addr: SocketAddr) -> DeviceManagementClient<Channel> {
    DeviceManagementClient::connect(format!("http://{addr}"))
        .await
        .expect("connect to microservice")
        .send_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Gzip)
}

pub fn with_tenant<T>(
    tenant_id: &str,
    message: T,
) -> Request<T> {
    let mut request = Request::new(message);
    request
        .metadata_mut()
        .insert(DEFAULT_TENANT_METADATA_KEY, tenant_id.parse().expect("ascii tenant id"));
    request
}

pub async fn wait_until<F>(
    within: Duration,
    check: F,
) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
