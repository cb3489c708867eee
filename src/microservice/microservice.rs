use std::net::SocketAddr;
use std::sync::Arc;

use tonic::async_trait;
use tracing::info;
use tracing::warn;

use crate::ApiChannel;
use crate::ApiDemux;
use crate::AssetResolver;
use crate::DeviceManagementTenantEngine;
use crate::GrpcConnector;
use crate::GrpcServer;
use crate::Lifecycle;
use crate::LifecycleComponent;
use crate::MicroserviceConfig;
use crate::Result;
use crate::SystemError;
use crate::TenantEngineManager;

/// The running device management service.
///
/// Owns every long-lived component. Start order is event channel, asset
/// demux, asset resolver, tenant engine manager, gRPC server; a failed start
/// stops what already started. Stop runs in reverse and keeps going past
/// individual failures.
pub struct DeviceManagementMicroservice {
    lifecycle: Lifecycle,
    config: MicroserviceConfig,
    event_channel: Arc<ApiChannel<GrpcConnector>>,
    asset_demux: Arc<ApiDemux<GrpcConnector>>,
    asset_resolver: Arc<AssetResolver>,
    tenant_engine_manager: Arc<TenantEngineManager<dyn DeviceManagementTenantEngine>>,
    grpc_server: Arc<GrpcServer>,
}

impl DeviceManagementMicroservice {
    pub(crate) fn new(
        config: MicroserviceConfig,
        event_channel: Arc<ApiChannel<GrpcConnector>>,
        asset_demux: Arc<ApiDemux<GrpcConnector>>,
        asset_resolver: Arc<AssetResolver>,
        tenant_engine_manager: Arc<TenantEngineManager<dyn DeviceManagementTenantEngine>>,
        grpc_server: Arc<GrpcServer>,
    ) -> Self {
        Self {
            lifecycle: Lifecycle::new(format!("microservice[{}]", config.service.instance_id)),
            config,
            event_channel,
            asset_demux,
            asset_resolver,
            tenant_engine_manager,
            grpc_server,
        }
    }

    pub fn config(&self) -> &MicroserviceConfig {
        &self.config
    }

    pub fn event_management_api_channel(&self) -> &Arc<ApiChannel<GrpcConnector>> {
        &self.event_channel
    }

    pub fn asset_management_api_demux(&self) -> &Arc<ApiDemux<GrpcConnector>> {
        &self.asset_demux
    }

    pub fn asset_resolver(&self) -> &Arc<AssetResolver> {
        &self.asset_resolver
    }

    pub fn tenant_engine_manager(&self) -> &Arc<TenantEngineManager<dyn DeviceManagementTenantEngine>> {
        &self.tenant_engine_manager
    }

    pub fn grpc_server(&self) -> &Arc<GrpcServer> {
        &self.grpc_server
    }

    /// Bound address of the gRPC server while it runs
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.grpc_server.local_addr()
    }

    /// Components in start order
    fn components(&self) -> Vec<Arc<dyn LifecycleComponent>> {
        vec![
            self.event_channel.clone() as Arc<dyn LifecycleComponent>,
            self.asset_demux.clone() as Arc<dyn LifecycleComponent>,
            self.asset_resolver.clone() as Arc<dyn LifecycleComponent>,
            self.tenant_engine_manager.clone() as Arc<dyn LifecycleComponent>,
            self.grpc_server.clone() as Arc<dyn LifecycleComponent>,
        ]
    }

    /// Stops `components` last to first; returns the names that failed.
    async fn stop_in_reverse(components: &[Arc<dyn LifecycleComponent>]) -> Vec<String> {
        let mut failed = vec![];
        for component in components.iter().rev() {
            if let Err(e) = component.stop().await {
                warn!(component = component.component_name(), "stop failed: {}", e);
                failed.push(component.component_name().to_string());
            }
        }
        failed
    }
}

#[async_trait]
impl LifecycleComponent for DeviceManagementMicroservice {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    async fn initialize(&self) -> Result<()> {
        let components = self.components();
        for (started, component) in components.iter().enumerate() {
            if let Err(e) = component.start().await {
                warn!(
                    component = component.component_name(),
                    "start failed, stopping {} started component(s)",
                    started
                );
                Self::stop_in_reverse(&components[..=started]).await;
                return Err(e);
            }
        }

        info!(
            instance = %self.config.service.instance_id,
            addr = ?self.local_addr(),
            tenants = self.tenant_engine_manager.len(),
            "device management microservice started"
        );
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        let failed = Self::stop_in_reverse(&self.components()).await;
        if !failed.is_empty() {
            return Err(SystemError::GeneralServer(format!("failed to stop {}", failed.join(", "))).into());
        }
        Ok(())
    }
}
