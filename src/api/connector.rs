use std::time::Duration;

use tonic::async_trait;
use tonic::transport::Channel;
use tonic::transport::Endpoint;
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;
use tracing::debug;

use crate::utils::net::normalize_target;
use crate::ApiError;
use crate::ConnectionParams;
use crate::Result;

/// Establishes transports to remote endpoints for an [`ApiChannel`].
///
/// [`ApiChannel`]: crate::ApiChannel
#[async_trait]
pub trait ApiConnector: Send + Sync + 'static {
    /// Handle passed to RPC closures; cloned per call.
    type Transport: Clone + Send + Sync + 'static;

    /// Returns the dialable endpoint for `target` or `ApiError::InvalidTarget`.
    fn validate_target(
        &self,
        target: &str,
    ) -> Result<String>;

    async fn connect(
        &self,
        endpoint: &str,
    ) -> Result<Self::Transport>;

    /// Application-level health check over an established transport.
    async fn probe(
        &self,
        transport: &Self::Transport,
    ) -> Result<()>;
}

/// tonic implementation of [`ApiConnector`].
#[derive(Debug, Clone)]
pub struct GrpcConnector {
    params: ConnectionParams,
    health_service: String,
}

impl GrpcConnector {
    pub fn new(
        params: ConnectionParams,
        health_service: impl Into<String>,
    ) -> Self {
        Self {
            params,
            health_service: health_service.into(),
        }
    }
}

#[async_trait]
impl ApiConnector for GrpcConnector {
    type Transport = Channel;

    fn validate_target(
        &self,
        target: &str,
    ) -> Result<String> {
        normalize_target(target)
    }

    async fn connect(
        &self,
        endpoint: &str,
    ) -> Result<Channel> {
        let params = &self.params;
        debug!(endpoint, "Establishing new gRPC connection");

        Endpoint::from_shared(endpoint.to_string())
            .map_err(|e| ApiError::InvalidTarget {
                target: endpoint.to_string(),
                reason: e.to_string(),
            })?
            .connect_timeout(params.connect_timeout())
            .concurrency_limit(params.concurrency_limit)
            .tcp_nodelay(true)
            .tcp_keepalive(Some(Duration::from_secs(params.tcp_keepalive_in_secs)))
            .http2_keep_alive_interval(Duration::from_secs(
                params.http2_keep_alive_interval_in_secs,
            ))
            .keep_alive_timeout(Duration::from_secs(
                params.http2_keep_alive_timeout_in_secs,
            ))
            .initial_connection_window_size(params.connection_window_size)
            .initial_stream_window_size(params.stream_window_size)
            .http2_adaptive_window(params.adaptive_window)
            .connect()
            .await
            .map_err(|e| ApiError::Unavailable(format!("connect to {endpoint} failed: {e}")).into())
    }

    async fn probe(
        &self,
        transport: &Channel,
    ) -> Result<()> {
        let mut client = HealthClient::new(transport.clone());
        let request = tonic::Request::new(HealthCheckRequest {
            service: self.health_service.clone(),
        });

        let response = client
            .check(request)
            .await
            .map_err(|status| {
                ApiError::Unavailable(format!("health check failed: {}", status.message()))
            })?
            .into_inner();

        if response.status == ServingStatus::Serving as i32 {
            Ok(())
        } else {
            Err(ApiError::Unavailable(format!(
                "service {} is not serving",
                self.health_service
            ))
            .into())
        }
    }
}
