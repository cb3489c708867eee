use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use parking_lot::RwLock;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tonic::async_trait;
use tonic::Code;
use tonic::Status;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::utils::async_task::spawn_task;
use crate::utils::async_task::task_with_timeout_and_exponential_backoff;
use crate::ApiConnector;
use crate::ApiError;
use crate::BackoffPolicy;
use crate::ConnectionParams;
use crate::Lifecycle;
use crate::LifecycleComponent;
use crate::LifecycleStatus;
use crate::Result;
use crate::RetryPolicies;

/// Per-channel behaviour shared by every channel of a demux
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    /// Deadline of a single `send`; `None` waits indefinitely
    pub request_timeout: Option<Duration>,
    /// Reconnect policy after a dropped connection
    pub reconnect: BackoffPolicy,
    /// Interval of health probes; `None` disables probing
    pub probe_interval: Option<Duration>,
}

impl ChannelSettings {
    pub fn new(
        params: &ConnectionParams,
        retry: &RetryPolicies,
        probe_interval_ms: u64,
    ) -> Self {
        Self {
            request_timeout: params.request_timeout(),
            reconnect: retry.reconnect,
            probe_interval: (probe_interval_ms > 0).then(|| Duration::from_millis(probe_interval_ms)),
        }
    }
}

/// One logical connection to one remote endpoint.
///
/// Started channels stay Started while the connection is down: they report
/// `is_healthy() == false` and reconnect in the background.
pub struct ApiChannel<C: ApiConnector> {
    lifecycle: Lifecycle,
    shared: Arc<ChannelShared<C>>,
}

struct ChannelShared<C: ApiConnector> {
    target: String,
    endpoint: RwLock<Option<String>>,
    connector: Arc<C>,
    settings: ChannelSettings,
    transport: ArcSwapOption<C::Transport>,
    connected: AtomicBool,
    probe_ok: AtomicBool,
    reconnecting: AtomicBool,
    cancel: Mutex<CancellationToken>,
}

impl<C: ApiConnector> ApiChannel<C> {
    pub fn new(
        target: impl Into<String>,
        connector: Arc<C>,
        settings: ChannelSettings,
    ) -> Self {
        let target = target.into();
        Self {
            lifecycle: Lifecycle::new(format!("api-channel[{target}]")),
            shared: Arc::new(ChannelShared {
                target,
                endpoint: RwLock::new(None),
                connector,
                settings,
                transport: ArcSwapOption::empty(),
                connected: AtomicBool::new(false),
                probe_ok: AtomicBool::new(true),
                reconnecting: AtomicBool::new(false),
                cancel: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    /// Target as registered, e.g. `asset1:9200`
    pub fn target(&self) -> &str {
        &self.shared.target
    }

    /// Normalized endpoint, known once the channel has been started
    pub fn endpoint(&self) -> Option<String> {
        self.shared.endpoint.read().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Started, connected and passing its last probe. Never blocks.
    pub fn is_healthy(&self) -> bool {
        self.lifecycle.status() == LifecycleStatus::Started
            && self.shared.connected.load(Ordering::Acquire)
            && self.shared.probe_ok.load(Ordering::Acquire)
            && self.shared.transport.load().is_some()
    }

    /// Runs `call` against the live transport under the request deadline.
    ///
    /// Transport-level `UNAVAILABLE` marks the channel unhealthy and starts a
    /// reconnect; other statuses are returned as `ApiError::Rpc`.
    pub async fn send<F, Fut, R>(
        &self,
        call: F,
    ) -> Result<R>
    where
        F: FnOnce(C::Transport) -> Fut + Send,
        Fut: Future<Output = std::result::Result<R, Status>> + Send,
        R: Send,
    {
        let target = self.target();
        let status = self.lifecycle.status();
        if status != LifecycleStatus::Started {
            return Err(ApiError::Unavailable(format!("channel {target} is {status}")).into());
        }

        let transport = match self.shared.transport.load_full() {
            Some(transport) if self.is_connected() => transport,
            _ => {
                self.shared.ensure_reconnecting();
                return Err(ApiError::Unavailable(format!("channel {target} is disconnected")).into());
            }
        };

        trace!(channel = target, "sending request");
        let fut = call((*transport).clone());
        let outcome = match self.shared.settings.request_timeout {
            Some(deadline) => match timeout(deadline, fut).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(ApiError::Timeout {
                        target: target.to_string(),
                        duration: deadline,
                    }
                    .into());
                }
            },
            None => fut.await,
        };

        match outcome {
            Ok(response) => Ok(response),
            Err(status) if status.code() == Code::Unavailable => {
                self.shared.mark_disconnected(status.message());
                Err(ApiError::Unavailable(format!("{target}: {}", status.message())).into())
            }
            Err(status) => Err(ApiError::Rpc {
                target: target.to_string(),
                status: Box::new(status),
            }
            .into()),
        }
    }
}

impl<C: ApiConnector> ChannelShared<C> {
    fn mark_disconnected(
        self: &Arc<Self>,
        reason: &str,
    ) {
        if self.connected.swap(false, Ordering::AcqRel) {
            warn!(channel = %self.target, reason, "connection lost");
        }
        self.ensure_reconnecting();
    }

    /// Starts the reconnect loop unless one is already running.
    fn ensure_reconnecting(self: &Arc<Self>) {
        let Some(endpoint) = self.endpoint.read().clone() else {
            return;
        };
        let cancel = self.cancel.lock().clone();
        if cancel.is_cancelled() {
            return;
        }
        if self
            .reconnecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let shared = self.clone();
        spawn_task(
            &format!("reconnect[{}]", self.target),
            shared.reconnect(endpoint, cancel),
        );
    }

    async fn reconnect(
        self: Arc<Self>,
        endpoint: String,
        cancel: CancellationToken,
    ) -> Result<()> {
        info!(channel = %self.target, "reconnecting");
        let connector = self.connector.clone();
        let result = task_with_timeout_and_exponential_backoff(
            || connector.connect(&endpoint),
            self.settings.reconnect,
            &cancel,
        )
        .await;

        let outcome = match result {
            Ok(transport) if !cancel.is_cancelled() => {
                self.transport.store(Some(Arc::new(transport)));
                self.connected.store(true, Ordering::Release);
                info!(channel = %self.target, "reconnected");
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(_) if cancel.is_cancelled() => Ok(()),
            Err(e) => {
                warn!(channel = %self.target, "giving up reconnecting: {:?}", e);
                Err(e)
            }
        };
        self.reconnecting.store(false, Ordering::Release);
        outcome
    }

    async fn probe_once(&self) -> bool {
        let Some(transport) = self.transport.load_full() else {
            return false;
        };
        let probe = self.connector.probe(&transport);
        let result = match self.settings.request_timeout {
            Some(deadline) => timeout(deadline, probe)
                .await
                .unwrap_or_else(|_| Err(ApiError::Unavailable("health probe timed out".into()).into())),
            None => probe.await,
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                debug!(channel = %self.target, "health probe failed: {:?}", e);
                false
            }
        }
    }

    async fn probe_loop(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }
            if self.reconnecting.load(Ordering::Acquire) {
                continue;
            }

            let healthy = self.probe_once().await;
            let was_healthy = self.probe_ok.swap(healthy, Ordering::AcqRel);
            if healthy && !was_healthy {
                info!(channel = %self.target, "health probe recovered");
            } else if !healthy {
                self.mark_disconnected("health probe failed");
            }
        }
    }
}

#[async_trait]
impl<C: ApiConnector> LifecycleComponent for ApiChannel<C> {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    async fn initialize(&self) -> Result<()> {
        let shared = &self.shared;
        let endpoint = shared.connector.validate_target(&shared.target)?;
        *shared.endpoint.write() = Some(endpoint.clone());

        let cancel = CancellationToken::new();
        *shared.cancel.lock() = cancel.clone();
        shared.probe_ok.store(true, Ordering::Release);

        let connect = shared.connector.connect(&endpoint);
        match timeout(shared.settings.reconnect.timeout(), connect).await {
            Ok(Ok(transport)) => {
                shared.transport.store(Some(Arc::new(transport)));
                shared.connected.store(true, Ordering::Release);
                if shared.settings.probe_interval.is_some() {
                    let healthy = shared.probe_once().await;
                    shared.probe_ok.store(healthy, Ordering::Release);
                }
                debug!(channel = %shared.target, "connected");
            }
            Ok(Err(e)) => {
                warn!(channel = %shared.target, "initial connect failed, retrying in background: {}", e);
                shared.connected.store(false, Ordering::Release);
                shared.ensure_reconnecting();
            }
            Err(_) => {
                warn!(channel = %shared.target, "initial connect timed out, retrying in background");
                shared.connected.store(false, Ordering::Release);
                shared.ensure_reconnecting();
            }
        }

        if let Some(interval) = shared.settings.probe_interval {
            spawn_task(
                &format!("probe[{}]", shared.target),
                shared.clone().probe_loop(interval, cancel),
            );
        }
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        self.shared.cancel.lock().cancel();
        self.shared.transport.store(None);
        self.shared.connected.store(false, Ordering::Release);
        Ok(())
    }
}
