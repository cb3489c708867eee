use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::constants::ASSET_DEMUX_NAME;
use crate::constants::EVENT_HEALTH_SERVICE;
use crate::ApiChannel;
use crate::ApiDemux;
use crate::AssetCache;
use crate::AssetResolver;
use crate::AssetSource;
use crate::ChannelSettings;
use crate::DeviceEventSink;
use crate::DeviceManagementEngineFactory;
use crate::DeviceManagementMicroservice;
use crate::DeviceManagementService;
use crate::DeviceManagementTenantEngine;
use crate::GrpcConnector;
use crate::GrpcServer;
use crate::MicroserviceConfig;
use crate::Result;
use crate::TenantEngineFactory;
use crate::TenantEngineManager;
use crate::TenantId;

/// Assembles a [`DeviceManagementMicroservice`].
///
/// Every collaborator defaults to the gRPC-backed implementation described by
/// the configuration; the `with_*` methods replace one of them.
pub struct MicroserviceBuilder {
    config: MicroserviceConfig,
    engine_factory: Option<Arc<dyn TenantEngineFactory<dyn DeviceManagementTenantEngine>>>,
    asset_source: Option<Arc<dyn AssetSource>>,
    event_sink: Option<Arc<dyn DeviceEventSink>>,
}

impl MicroserviceBuilder {
    pub fn new(config: MicroserviceConfig) -> Self {
        Self {
            config,
            engine_factory: None,
            asset_source: None,
            event_sink: None,
        }
    }

    /// Builder over the validated configuration of the environment
    /// (`CONFIG_PATH` file and `DEVMGMT__*` variables).
    pub fn from_env() -> Result<Self> {
        let config = MicroserviceConfig::new()?.validate()?;
        Ok(Self::new(config))
    }

    /// Factory of tenant engines; replaces [`DeviceManagementEngineFactory`]
    pub fn with_engine_factory(
        mut self,
        factory: Arc<dyn TenantEngineFactory<dyn DeviceManagementTenantEngine>>,
    ) -> Self {
        self.engine_factory = Some(factory);
        self
    }

    /// Source the asset resolver reads through instead of the asset demux
    pub fn with_asset_source(
        mut self,
        source: Arc<dyn AssetSource>,
    ) -> Self {
        self.asset_source = Some(source);
        self
    }

    /// Destination of device events instead of the event management channel
    pub fn with_event_sink(
        mut self,
        sink: Arc<dyn DeviceEventSink>,
    ) -> Self {
        self.event_sink = Some(sink);
        self
    }

    pub fn build(self) -> Result<DeviceManagementMicroservice> {
        let config = self.config;
        let api = &config.network.api;

        let event_channel = Arc::new(ApiChannel::new(
            config.event_management.target.as_str(),
            Arc::new(GrpcConnector::new(api.clone(), EVENT_HEALTH_SERVICE)),
            ChannelSettings::new(api, &config.retry, 0),
        ));

        let asset_demux = Arc::new(ApiDemux::from_config(
            ASSET_DEMUX_NAME,
            Arc::new(GrpcConnector::new(
                api.clone(),
                config.asset_management.health_service.as_str(),
            )),
            ChannelSettings::new(
                api,
                &config.retry,
                config.asset_management.health_probe_interval_ms,
            ),
            &config.asset_management,
        )?);

        let asset_source = self
            .asset_source
            .unwrap_or_else(|| asset_demux.clone() as Arc<dyn AssetSource>);
        let asset_resolver = Arc::new(AssetResolver::new(
            asset_source,
            AssetCache::from_config(&config.asset_cache),
        ));

        let event_sink = self
            .event_sink
            .unwrap_or_else(|| event_channel.clone() as Arc<dyn DeviceEventSink>);
        let engine_factory: Arc<dyn TenantEngineFactory<dyn DeviceManagementTenantEngine>> = match self.engine_factory {
            Some(factory) => factory,
            None => Arc::new(DeviceManagementEngineFactory::new(
                config.tenants.clone(),
                asset_resolver.clone(),
                event_sink,
            )),
        };

        let bootstrap = config
            .tenants
            .bootstrap_ids()
            .into_iter()
            .map(TenantId::new)
            .collect::<Result<Vec<_>>>()?;
        debug!(?bootstrap, "tenants started with the microservice");

        let tenant_engine_manager = Arc::new(
            TenantEngineManager::new(
                engine_factory,
                Duration::from_millis(config.tenants.stop_timeout_ms),
            )
            .with_bootstrap_tenants(bootstrap),
        );

        let grpc_server = Arc::new(GrpcServer::new(
            config.service.listen_address,
            config.network.server.clone(),
            config.network.tcp_nodelay,
            Arc::new(DeviceManagementService::new(
                tenant_engine_manager.clone(),
                config.service.tenant_metadata_key.as_str(),
            )),
        ));

        Ok(DeviceManagementMicroservice::new(
            config,
            event_channel,
            asset_demux,
            asset_resolver,
            tenant_engine_manager,
            grpc_server,
        ))
    }
}
