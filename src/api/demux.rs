use std::future::Future;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use tonic::async_trait;
use tonic::Status;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::ApiChannel;
use crate::ApiConnector;
use crate::ApiError;
use crate::AssetManagementConfig;
use crate::ChannelSettings;
use crate::Error;
use crate::Lifecycle;
use crate::LifecycleComponent;
use crate::Result;
use crate::SelectionPolicy;
use crate::TenantId;

/// Key of a routing entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoutingKey {
    Tenant(TenantId),
    Default,
}

/// Targets a routing key resolves to, and how to dispatch over them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub targets: Vec<String>,
    pub policy: SelectionPolicy,
}

/// Outcome of a broadcast: the merged successful responses plus the targets
/// that failed or timed out.
#[derive(Debug)]
pub struct FanOutResult<V> {
    pub value: V,
    pub failed: Vec<(String, Error)>,
}

/// Single API surface over channels to equivalent backends.
pub struct ApiDemux<C: ApiConnector> {
    lifecycle: Lifecycle,
    connector: Arc<C>,
    settings: ChannelSettings,
    default_policy: SelectionPolicy,
    channels: DashMap<String, Arc<ApiChannel<C>>>,
    routes: DashMap<RoutingKey, RouteEntry>,
    cursor: AtomicUsize,
    initial_targets: Vec<String>,
    initial_routes: Vec<(RoutingKey, RouteEntry)>,
}

impl<C: ApiConnector> ApiDemux<C> {
    pub fn new(
        name: impl Into<String>,
        connector: Arc<C>,
        settings: ChannelSettings,
        default_policy: SelectionPolicy,
    ) -> Self {
        Self {
            lifecycle: Lifecycle::new(name),
            connector,
            settings,
            default_policy,
            channels: DashMap::new(),
            routes: DashMap::new(),
            cursor: AtomicUsize::new(0),
            initial_targets: vec![],
            initial_routes: vec![],
        }
    }

    /// Demux whose start adds the configured targets and tenant routes.
    pub fn from_config(
        name: impl Into<String>,
        connector: Arc<C>,
        settings: ChannelSettings,
        config: &AssetManagementConfig,
    ) -> Result<Self> {
        let mut demux = Self::new(name, connector, settings, config.selection)
            .with_targets(config.targets.clone());
        for route in &config.routes {
            demux = demux.with_route(
                RoutingKey::Tenant(TenantId::new(route.tenant_id.as_str())?),
                RouteEntry {
                    targets: route.targets.clone(),
                    policy: route.selection,
                },
            );
        }
        Ok(demux)
    }

    /// Targets added when the demux starts
    pub fn with_targets(
        mut self,
        targets: Vec<String>,
    ) -> Self {
        self.initial_targets = targets;
        self
    }

    /// Route installed when the demux starts
    pub fn with_route(
        mut self,
        key: RoutingKey,
        entry: RouteEntry,
    ) -> Self {
        self.initial_routes.push((key, entry));
        self
    }

    /// Constructs and starts a channel to `target`.
    ///
    /// A channel whose start fails is removed again and the failure returned.
    pub async fn add_channel(
        &self,
        target: &str,
    ) -> Result<Arc<ApiChannel<C>>> {
        let channel = Arc::new(ApiChannel::new(
            target,
            self.connector.clone(),
            self.settings.clone(),
        ));

        match self.channels.entry(target.to_string()) {
            Entry::Occupied(_) => return Err(ApiError::DuplicateTarget(target.to_string()).into()),
            Entry::Vacant(entry) => {
                entry.insert(channel.clone());
            }
        }

        if let Err(e) = channel.start().await {
            warn!(demux = %self.lifecycle.name(), channel = target, "channel failed to start: {}", e);
            self.channels.remove_if(target, |_, c| Arc::ptr_eq(c, &channel));
            return Err(e);
        }

        info!(demux = %self.lifecycle.name(), channel = target, healthy = channel.is_healthy(), "channel added");
        Ok(channel)
    }

    /// Removes the channel to `target` from selection, then stops it.
    pub async fn remove_channel(
        &self,
        target: &str,
    ) -> Result<()> {
        let (_, channel) = self
            .channels
            .remove(target)
            .ok_or_else(|| ApiError::ChannelNotFound(target.to_string()))?;

        for mut route in self.routes.iter_mut() {
            route.targets.retain(|t| t != target);
        }

        channel.stop().await?;
        info!(demux = %self.lifecycle.name(), channel = target, "channel removed");
        Ok(())
    }

    pub fn get_channel_by_target(
        &self,
        target: &str,
    ) -> Option<Arc<ApiChannel<C>>> {
        self.channels.get(target).map(|c| c.value().clone())
    }

    /// Channel serving `key`: its route if present, else the default route,
    /// else any healthy channel.
    pub fn get_channel(
        &self,
        key: &RoutingKey,
    ) -> Result<Arc<ApiChannel<C>>> {
        let (targets, _) = self.resolve_route(key);
        self.healthy_channels(targets.as_deref())
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::NoHealthyChannel.into())
    }

    pub fn set_route(
        &self,
        key: RoutingKey,
        targets: Vec<String>,
        policy: SelectionPolicy,
    ) -> Result<()> {
        if let Some(unknown) = targets.iter().find(|t| !self.channels.contains_key(t.as_str())) {
            return Err(ApiError::ChannelNotFound(unknown.clone()).into());
        }
        debug!(demux = %self.lifecycle.name(), ?key, ?targets, ?policy, "route set");
        self.routes.insert(key, RouteEntry { targets, policy });
        Ok(())
    }

    pub fn clear_route(
        &self,
        key: &RoutingKey,
    ) -> bool {
        self.routes.remove(key).is_some()
    }

    pub fn route(
        &self,
        key: &RoutingKey,
    ) -> Option<RouteEntry> {
        self.routes.get(key).map(|r| r.value().clone())
    }

    /// Registered targets, sorted
    pub fn targets(&self) -> Vec<String> {
        let mut targets: Vec<String> = self.channels.iter().map(|c| c.key().clone()).collect();
        targets.sort();
        targets
    }

    /// Targets currently eligible for selection, sorted
    pub fn healthy_targets(&self) -> Vec<String> {
        self.healthy_channels(None)
            .iter()
            .map(|c| c.target().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Sends `call` to one healthy channel, round-robin.
    ///
    /// Fails fast with `NoHealthyChannel` when none is healthy. A transport
    /// `UNAVAILABLE` fails over to the next healthy channel.
    pub async fn invoke<F, Fut, R>(
        &self,
        call: F,
    ) -> Result<R>
    where
        F: Fn(C::Transport) -> Fut + Send + Sync,
        Fut: Future<Output = std::result::Result<R, Status>> + Send,
        R: Send,
    {
        let candidates = self.healthy_channels(None);
        self.dispatch_single(candidates, &call).await.map(|(_, response)| response)
    }

    /// Broadcasts `call` to every healthy channel concurrently and merges the
    /// successful responses, in target order.
    pub async fn invoke_all<F, Fut, R, M, V>(
        &self,
        call: F,
        merge: M,
    ) -> Result<FanOutResult<V>>
    where
        F: Fn(C::Transport) -> Fut + Send + Sync,
        Fut: Future<Output = std::result::Result<R, Status>> + Send,
        R: Send,
        M: FnOnce(Vec<(String, R)>) -> V + Send,
    {
        let candidates = self.healthy_channels(None);
        self.broadcast(candidates, &call, merge).await
    }

    /// Dispatches `call` over the channels routed for `key`, honouring the
    /// route's selection policy.
    pub async fn invoke_routed<F, Fut, R, M, V>(
        &self,
        key: &RoutingKey,
        call: F,
        merge: M,
    ) -> Result<FanOutResult<V>>
    where
        F: Fn(C::Transport) -> Fut + Send + Sync,
        Fut: Future<Output = std::result::Result<R, Status>> + Send,
        R: Send,
        M: FnOnce(Vec<(String, R)>) -> V + Send,
    {
        let (targets, policy) = self.resolve_route(key);
        let candidates = self.healthy_channels(targets.as_deref());
        trace!(?key, ?policy, candidates = candidates.len(), "routing request");

        match policy {
            SelectionPolicy::SingleTarget => {
                let (target, response) = self.dispatch_single(candidates, &call).await?;
                Ok(FanOutResult {
                    value: merge(vec![(target, response)]),
                    failed: vec![],
                })
            }
            SelectionPolicy::FanOut => self.broadcast(candidates, &call, merge).await,
        }
    }

    fn resolve_route(
        &self,
        key: &RoutingKey,
    ) -> (Option<Vec<String>>, SelectionPolicy) {
        let entry = self.route(key).or_else(|| self.route(&RoutingKey::Default));
        match entry {
            Some(entry) => (Some(entry.targets), entry.policy),
            None => (None, self.default_policy),
        }
    }

    /// Healthy channels, optionally restricted to `targets`, sorted by target
    fn healthy_channels(
        &self,
        targets: Option<&[String]>,
    ) -> Vec<Arc<ApiChannel<C>>> {
        let mut healthy: Vec<Arc<ApiChannel<C>>> = self
            .channels
            .iter()
            .filter(|c| targets.map_or(true, |t| t.iter().any(|t| t == c.key())))
            .filter(|c| c.value().is_healthy())
            .map(|c| c.value().clone())
            .collect();
        healthy.sort_by(|a, b| a.target().cmp(b.target()));
        healthy
    }

    async fn dispatch_single<F, Fut, R>(
        &self,
        candidates: Vec<Arc<ApiChannel<C>>>,
        call: &F,
    ) -> Result<(String, R)>
    where
        F: Fn(C::Transport) -> Fut + Send + Sync,
        Fut: Future<Output = std::result::Result<R, Status>> + Send,
        R: Send,
    {
        if candidates.is_empty() {
            return Err(ApiError::NoHealthyChannel.into());
        }

        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
        for i in 0..candidates.len() {
            let channel = &candidates[(start + i) % candidates.len()];
            // health is re-evaluated lazily; an earlier attempt may have
            // taken this channel down
            if !channel.is_healthy() {
                continue;
            }

            trace!(channel = channel.target(), "selected channel");
            match channel.send(|transport| call(transport)).await {
                Ok(response) => return Ok((channel.target().to_string(), response)),
                Err(e) if e.is_unavailable() => {
                    debug!(channel = channel.target(), "failing over: {}", e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(ApiError::NoHealthyChannel.into())
    }

    async fn broadcast<F, Fut, R, M, V>(
        &self,
        candidates: Vec<Arc<ApiChannel<C>>>,
        call: &F,
        merge: M,
    ) -> Result<FanOutResult<V>>
    where
        F: Fn(C::Transport) -> Fut + Send + Sync,
        Fut: Future<Output = std::result::Result<R, Status>> + Send,
        R: Send,
        M: FnOnce(Vec<(String, R)>) -> V + Send,
    {
        if candidates.is_empty() {
            return Err(ApiError::NoHealthyChannel.into());
        }

        let results = join_all(candidates.iter().map(|channel| async move {
            let outcome = channel.send(|transport| call(transport)).await;
            (channel.target().to_string(), outcome)
        }))
        .await;

        let mut responses = Vec::with_capacity(results.len());
        let mut failed = vec![];
        for (target, outcome) in results {
            match outcome {
                Ok(response) => responses.push((target, response)),
                Err(e) => {
                    debug!(channel = %target, "fan-out target failed: {}", e);
                    failed.push((target, e));
                }
            }
        }

        Ok(FanOutResult {
            value: merge(responses),
            failed,
        })
    }
}

#[async_trait]
impl<C: ApiConnector> LifecycleComponent for ApiDemux<C> {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    async fn initialize(&self) -> Result<()> {
        for target in &self.initial_targets {
            self.add_channel(target).await?;
        }
        for (key, entry) in &self.initial_routes {
            self.set_route(key.clone(), entry.targets.clone(), entry.policy)?;
        }
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        let channels: Vec<Arc<ApiChannel<C>>> = self.channels.iter().map(|c| c.value().clone()).collect();
        self.channels.clear();
        self.routes.clear();

        for (channel, result) in channels.iter().zip(join_all(channels.iter().map(|c| c.stop())).await) {
            if let Err(e) = result {
                warn!(channel = channel.target(), "failed to stop channel: {}", e);
            }
        }
        Ok(())
    }
}
