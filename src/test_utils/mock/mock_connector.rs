use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tonic::async_trait;
use tonic::Status;

use crate::ApiConnector;
use crate::ApiError;
use crate::Result;

/// Simulated remote endpoint
#[derive(Debug)]
pub struct MockEndpoint {
    name: String,
    reachable: AtomicBool,
    healthy: AtomicBool,
    connects: AtomicUsize,
    calls: AtomicUsize,
    delay: Mutex<Duration>,
    failure: Mutex<Option<Status>>,
}

impl MockEndpoint {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            reachable: AtomicBool::new(true),
            healthy: AtomicBool::new(true),
            connects: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            delay: Mutex::new(Duration::ZERO),
            failure: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_reachable(
        &self,
        reachable: bool,
    ) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn set_healthy(
        &self,
        healthy: bool,
    ) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn set_delay(
        &self,
        delay: Duration,
    ) {
        *self.delay.lock() = delay;
    }

    /// Every call answers with `status` until cleared
    pub fn fail_with(
        &self,
        status: Option<Status>,
    ) {
        *self.failure.lock() = status;
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Transport handed to call closures by channels of a [`MockConnector`]
#[derive(Debug, Clone)]
pub struct MockTransport {
    endpoint: Arc<MockEndpoint>,
}

impl MockTransport {
    pub fn endpoint(&self) -> &str {
        &self.endpoint.name
    }

    /// Echoes `payload` prefixed with the endpoint name.
    pub async fn call(
        &self,
        payload: &str,
    ) -> std::result::Result<String, Status> {
        self.endpoint.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.endpoint.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if !self.endpoint.reachable.load(Ordering::SeqCst) {
            return Err(Status::unavailable(format!("{} is unreachable", self.endpoint.name)));
        }
        if let Some(status) = self.endpoint.failure.lock().clone() {
            return Err(status);
        }
        Ok(format!("{}:{}", self.endpoint.name, payload))
    }
}

/// In-memory [`ApiConnector`]. Endpoints are created on first use, reachable
/// and healthy.
#[derive(Debug, Default)]
pub struct MockConnector {
    endpoints: DashMap<String, Arc<MockEndpoint>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn endpoint(
        &self,
        target: &str,
    ) -> Arc<MockEndpoint> {
        self.endpoints
            .entry(target.to_string())
            .or_insert_with(|| Arc::new(MockEndpoint::new(target)))
            .clone()
    }
}

#[async_trait]
impl ApiConnector for MockConnector {
    type Transport = MockTransport;

    fn validate_target(
        &self,
        target: &str,
    ) -> Result<String> {
        let trimmed = target.trim();
        if trimmed.is_empty() || trimmed.contains(char::is_whitespace) {
            return Err(ApiError::InvalidTarget {
                target: target.to_string(),
                reason: "malformed mock target".to_string(),
            }
            .into());
        }
        Ok(trimmed.to_string())
    }

    async fn connect(
        &self,
        endpoint: &str,
    ) -> Result<MockTransport> {
        let endpoint = self.endpoint(endpoint);
        if !endpoint.reachable.load(Ordering::SeqCst) {
            return Err(ApiError::Unavailable(format!("{} is unreachable", endpoint.name)).into());
        }
        endpoint.connects.fetch_add(1, Ordering::SeqCst);
        Ok(MockTransport { endpoint })
    }

    async fn probe(
        &self,
        transport: &MockTransport,
    ) -> Result<()> {
        let endpoint = &transport.endpoint;
        if endpoint.reachable.load(Ordering::SeqCst) && endpoint.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ApiError::Unavailable(format!("{} is not serving", endpoint.name)).into())
        }
    }
}
