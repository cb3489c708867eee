use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use parking_lot::RwLock;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::async_trait;
use tonic::codec::CompressionEncoding;
use tonic_health::server::health_reporter;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::proto::device::device_management_server::DeviceManagementServer;
use crate::utils::async_task::spawn_task;
use crate::ConnectionParams;
use crate::DeviceManagementService;
use crate::Lifecycle;
use crate::LifecycleComponent;
use crate::NetworkError;
use crate::Result;

struct RunningServer {
    shutdown_tx: watch::Sender<()>,
    handle: JoinHandle<()>,
}

/// Serves [`DeviceManagementService`] and `grpc.health.v1.Health`.
///
/// Start binds the listener and spawns the serve loop; a bind failure leaves
/// the server Errored. If the serve loop dies on its own the server reports a
/// runtime failure.
pub struct GrpcServer {
    lifecycle: Arc<Lifecycle>,
    listen_address: SocketAddr,
    params: ConnectionParams,
    tcp_nodelay: bool,
    service: Arc<DeviceManagementService>,
    local_addr: RwLock<Option<SocketAddr>>,
    running: Mutex<Option<RunningServer>>,
}

impl GrpcServer {
    pub fn new(
        listen_address: SocketAddr,
        params: ConnectionParams,
        tcp_nodelay: bool,
        service: Arc<DeviceManagementService>,
    ) -> Self {
        Self {
            lifecycle: Arc::new(Lifecycle::new("grpc-server")),
            listen_address,
            params,
            tcp_nodelay,
            service,
            local_addr: RwLock::new(None),
            running: Mutex::new(None),
        }
    }

    pub fn listen_address(&self) -> SocketAddr {
        self.listen_address
    }

    /// Address actually bound while the server runs (resolves port 0)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read()
    }
}

#[async_trait]
impl LifecycleComponent for GrpcServer {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    async fn initialize(&self) -> Result<()> {
        let listener = TcpListener::bind(self.listen_address)
            .await
            .map_err(|source| NetworkError::BindFailed {
                address: self.listen_address.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let (mut health_reporter, health_service) = health_reporter();
        health_reporter
            .set_serving::<DeviceManagementServer<DeviceManagementService>>()
            .await;

        let params = &self.params;
        let mut builder = tonic::transport::Server::builder()
            .concurrency_limit_per_connection(params.concurrency_limit)
            .tcp_keepalive(Some(Duration::from_secs(params.tcp_keepalive_in_secs)))
            .http2_keepalive_interval(Some(Duration::from_secs(
                params.http2_keep_alive_interval_in_secs,
            )))
            .http2_keepalive_timeout(Some(Duration::from_secs(
                params.http2_keep_alive_timeout_in_secs,
            )))
            .initial_stream_window_size(params.stream_window_size)
            .initial_connection_window_size(params.connection_window_size)
            .http2_adaptive_window(Some(params.adaptive_window))
            .max_concurrent_streams(Some(params.max_concurrent_streams))
            .max_frame_size(Some(params.max_frame_size))
            .tcp_nodelay(self.tcp_nodelay);
        if let Some(request_timeout) = params.request_timeout() {
            builder = builder.timeout(request_timeout);
        }

        let router = builder.add_service(health_service).add_service(
            DeviceManagementServer::from_arc(self.service.clone())
                .accept_compressed(CompressionEncoding::Gzip)
                .send_compressed(CompressionEncoding::Gzip),
        );

        let (shutdown_tx, mut shutdown_rx) = watch::channel(());
        let lifecycle = self.lifecycle.clone();
        let handle = spawn_task("grpc-server", async move {
            let shutdown = async move {
                let _ = shutdown_rx.changed().await;
                debug!(%local_addr, "gRPC server received shutdown signal");
            };
            if let Err(e) = router
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
                .await
            {
                lifecycle.record_failure(format!("serve loop on {local_addr} ended: {e}"));
                return Err(e.into());
            }
            Ok(())
        });

        *self.local_addr.write() = Some(local_addr);
        *self.running.lock() = Some(RunningServer { shutdown_tx, handle });
        info!(%local_addr, "device management gRPC server listening");
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        let running = self.running.lock().take();
        *self.local_addr.write() = None;

        let Some(RunningServer { shutdown_tx, handle }) = running else {
            return Ok(());
        };
        if shutdown_tx.send(()).is_err() {
            warn!("gRPC server task already gone");
        }
        handle.await?;
        Ok(())
    }
}
