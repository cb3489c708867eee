use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::RwLock;
use tokio::time::timeout;
use tonic::async_trait;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::Error;
use crate::Lifecycle;
use crate::LifecycleComponent;
use crate::LifecycleError;
use crate::LifecycleStatus;
use crate::Result;
use crate::TenantEngine;
use crate::TenantEngineFactory;
use crate::TenantError;
use crate::TenantId;

/// Point-in-time view of a tenant record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantEngineSnapshot {
    pub tenant_id: TenantId,
    pub status: LifecycleStatus,
    pub last_error: Option<LifecycleError>,
    /// False when the factory never produced an engine
    pub has_engine: bool,
}

struct TenantRecord<E: ?Sized> {
    engine: Option<Arc<E>>,
    status: LifecycleStatus,
    last_error: Option<LifecycleError>,
}

struct TenantSlot<E: ?Sized + Send + Sync + 'static> {
    /// Serializes lifecycle transitions of this tenant
    transition: tokio::sync::Mutex<()>,
    record: RwLock<TenantRecord<E>>,
    factory: Arc<dyn TenantEngineFactory<E>>,
}

impl<E: TenantEngine + ?Sized + 'static> TenantSlot<E> {
    fn new(factory: Arc<dyn TenantEngineFactory<E>>) -> Self {
        Self {
            transition: tokio::sync::Mutex::new(()),
            record: RwLock::new(TenantRecord {
                engine: None,
                status: LifecycleStatus::Stopped,
                last_error: None,
            }),
            factory,
        }
    }

    /// Record status, or the engine's own status once it was Started so that
    /// runtime failures reported by the engine are visible.
    fn effective_status(&self) -> LifecycleStatus {
        let record = self.record.read();
        match (&record.engine, record.status) {
            (Some(engine), LifecycleStatus::Started) => engine.status(),
            (_, status) => status,
        }
    }

    fn engine(&self) -> Option<Arc<E>> {
        self.record.read().engine.clone()
    }

    fn snapshot(
        &self,
        tenant_id: &TenantId,
    ) -> TenantEngineSnapshot {
        let status = self.effective_status();
        let record = self.record.read();
        let last_error = record
            .last_error
            .clone()
            .or_else(|| record.engine.as_ref().and_then(|e| e.last_error()));
        TenantEngineSnapshot {
            tenant_id: tenant_id.clone(),
            status,
            last_error,
            has_engine: record.engine.is_some(),
        }
    }

    fn update(
        &self,
        status: LifecycleStatus,
        last_error: Option<LifecycleError>,
    ) {
        let mut record = self.record.write();
        record.status = status;
        record.last_error = last_error;
    }
}

/// Owns the `TenantId -> engine` mapping and mediates every lifecycle
/// transition of tenant engines.
///
/// Transitions of one tenant are serialized; distinct tenants proceed
/// concurrently. A tenant whose engine fails to start keeps its record in
/// Errored until it is restarted or removed.
pub struct TenantEngineManager<E: TenantEngine + ?Sized + 'static> {
    lifecycle: Lifecycle,
    slots: DashMap<TenantId, Arc<TenantSlot<E>>>,
    default_factory: Arc<dyn TenantEngineFactory<E>>,
    bootstrap: Vec<TenantId>,
    stop_timeout: Duration,
}

impl<E: TenantEngine + ?Sized + 'static> TenantEngineManager<E> {
    pub fn new(
        default_factory: Arc<dyn TenantEngineFactory<E>>,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            lifecycle: Lifecycle::new("tenant-engine-manager"),
            slots: DashMap::new(),
            default_factory,
            bootstrap: vec![],
            stop_timeout,
        }
    }

    /// Tenants started through the default factory when the manager starts
    pub fn with_bootstrap_tenants(
        mut self,
        tenants: Vec<TenantId>,
    ) -> Self {
        self.bootstrap = tenants;
        self
    }

    /// Creates the engine of `tenant_id` with `factory` and starts it.
    ///
    /// Factory and start failures are contained: the record is kept in
    /// Errored and `Ok(LifecycleStatus::Errored)` is returned.
    ///
    /// # Errors
    /// `TenantError::AlreadyExists` if a non-Terminated record exists.
    pub async fn create_and_start_engine(
        &self,
        tenant_id: &TenantId,
        factory: Arc<dyn TenantEngineFactory<E>>,
    ) -> Result<LifecycleStatus> {
        let slot = Arc::new(TenantSlot::new(factory));
        // Publish the slot already locked: callers that find it wait for the
        // start to settle.
        let _guard = slot.transition.lock().await;

        match self.slots.entry(tenant_id.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().effective_status() != LifecycleStatus::Terminated {
                    return Err(TenantError::AlreadyExists(tenant_id.to_string()).into());
                }
                debug!(tenant = %tenant_id, "replacing terminated tenant record");
                occupied.insert(slot.clone());
            }
            Entry::Vacant(vacant) => {
                vacant.insert(slot.clone());
            }
        }

        Ok(self.construct_and_start(tenant_id, &slot).await)
    }

    /// [`Self::create_and_start_engine`] through the default factory
    pub async fn create_and_start_default_engine(
        &self,
        tenant_id: &TenantId,
    ) -> Result<LifecycleStatus> {
        self.create_and_start_engine(tenant_id, self.default_factory.clone()).await
    }

    /// Returns the running engine of `tenant_id`. Never blocks.
    ///
    /// # Errors
    /// - `TenantError::NotFound` if there is no record
    /// - `TenantError::NotReady` unless the engine is Started
    pub fn get_engine(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Arc<E>> {
        let slot = self.slot(tenant_id)?;
        let status = slot.effective_status();
        match (slot.engine(), status) {
            (Some(engine), LifecycleStatus::Started) => Ok(engine),
            _ => Err(TenantError::NotReady {
                tenant_id: tenant_id.to_string(),
                status,
            }
            .into()),
        }
    }

    /// Stops the engine of `tenant_id`; idempotent.
    pub async fn stop_engine(
        &self,
        tenant_id: &TenantId,
    ) -> Result<LifecycleStatus> {
        let slot = self.slot(tenant_id)?;
        let _guard = slot.transition.lock().await;
        self.stop_slot(tenant_id, &slot).await
    }

    /// Tears the engine of `tenant_id` down, then deletes its record.
    ///
    /// A stop that fails or exceeds the stop timeout falls back to terminate.
    pub async fn remove_engine(
        &self,
        tenant_id: &TenantId,
    ) -> Result<()> {
        let slot = self.slot(tenant_id)?;
        let _guard = slot.transition.lock().await;

        match timeout(self.stop_timeout, self.stop_slot(tenant_id, &slot)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                warn!(tenant = %tenant_id, "stop failed, terminating: {}", e);
                self.terminate_slot(tenant_id, &slot).await;
            }
            Err(_) => {
                warn!(tenant = %tenant_id, timeout = ?self.stop_timeout, "stop timed out, terminating");
                self.terminate_slot(tenant_id, &slot).await;
            }
        }

        self.slots.remove_if(tenant_id, |_, s| Arc::ptr_eq(s, &slot));
        info!(tenant = %tenant_id, "tenant engine removed");
        Ok(())
    }

    /// Explicit recovery: stops the engine if needed and starts it again.
    ///
    /// Re-runs the record's factory when no engine was ever constructed.
    /// Start failures are contained as for [`Self::create_and_start_engine`].
    pub async fn restart_engine(
        &self,
        tenant_id: &TenantId,
    ) -> Result<LifecycleStatus> {
        let slot = self.slot(tenant_id)?;
        let _guard = slot.transition.lock().await;

        let Some(engine) = slot.engine() else {
            return Ok(self.construct_and_start(tenant_id, &slot).await);
        };

        slot.update(LifecycleStatus::Starting, None);
        match engine.restart().await {
            Ok(status) => {
                slot.update(status, None);
                info!(tenant = %tenant_id, "tenant engine restarted");
                Ok(status)
            }
            Err(Error::Lifecycle(failure @ LifecycleError::InitializationFailure { .. })) => {
                warn!(tenant = %tenant_id, "tenant engine failed to restart: {}", failure);
                slot.update(LifecycleStatus::Errored, Some(failure));
                Ok(LifecycleStatus::Errored)
            }
            Err(e) => {
                slot.update(engine.status(), engine.last_error());
                Err(e)
            }
        }
    }

    /// Irreversibly shuts the engine of `tenant_id` down, keeping the record.
    pub async fn terminate_engine(
        &self,
        tenant_id: &TenantId,
    ) -> Result<LifecycleStatus> {
        let slot = self.slot(tenant_id)?;
        let _guard = slot.transition.lock().await;
        self.terminate_slot(tenant_id, &slot).await;
        Ok(LifecycleStatus::Terminated)
    }

    pub fn snapshot(
        &self,
        tenant_id: &TenantId,
    ) -> Result<TenantEngineSnapshot> {
        Ok(self.slot(tenant_id)?.snapshot(tenant_id))
    }

    /// Snapshots of every tenant, ordered by tenant id
    pub fn snapshots(&self) -> Vec<TenantEngineSnapshot> {
        let mut snapshots: Vec<TenantEngineSnapshot> = self
            .slots
            .iter()
            .map(|entry| entry.value().snapshot(entry.key()))
            .collect();
        snapshots.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));
        snapshots
    }

    pub fn tenant_ids(&self) -> Vec<TenantId> {
        let mut ids: Vec<TenantId> = self.slots.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn last_error(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Option<LifecycleError>> {
        Ok(self.snapshot(tenant_id)?.last_error)
    }

    pub fn contains(
        &self,
        tenant_id: &TenantId,
    ) -> bool {
        self.slots.contains_key(tenant_id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Arc<TenantSlot<E>>> {
        self.slots
            .get(tenant_id)
            .map(|s| s.value().clone())
            .ok_or_else(|| TenantError::NotFound(tenant_id.to_string()).into())
    }

    /// Runs the slot's factory and starts the new engine. Caller holds the
    /// slot's transition lock.
    async fn construct_and_start(
        &self,
        tenant_id: &TenantId,
        slot: &TenantSlot<E>,
    ) -> LifecycleStatus {
        slot.update(LifecycleStatus::Starting, None);

        let engine = match slot.factory.create_engine(tenant_id).await {
            Ok(engine) => engine,
            Err(e) => {
                let failure = LifecycleError::InitializationFailure {
                    component: format!("tenant-engine[{tenant_id}]"),
                    reason: e.to_string(),
                };
                error!(tenant = %tenant_id, "tenant engine construction failed: {}", e);
                slot.update(LifecycleStatus::Errored, Some(failure));
                return LifecycleStatus::Errored;
            }
        };
        slot.record.write().engine = Some(engine.clone());

        match engine.start().await {
            Ok(status) => {
                slot.update(status, None);
                info!(tenant = %tenant_id, "tenant engine started");
                status
            }
            Err(e) => {
                error!(tenant = %tenant_id, "tenant engine failed to start: {}", e);
                let failure = engine.last_error().unwrap_or(LifecycleError::InitializationFailure {
                    component: engine.component_name().to_string(),
                    reason: e.to_string(),
                });
                slot.update(LifecycleStatus::Errored, Some(failure));
                LifecycleStatus::Errored
            }
        }
    }

    /// Caller holds the slot's transition lock.
    async fn stop_slot(
        &self,
        tenant_id: &TenantId,
        slot: &TenantSlot<E>,
    ) -> Result<LifecycleStatus> {
        let Some(engine) = slot.engine() else {
            let mut record = slot.record.write();
            if record.status != LifecycleStatus::Terminated {
                record.status = LifecycleStatus::Stopped;
            }
            return Ok(record.status);
        };

        let last_error = slot.record.read().last_error.clone();
        slot.update(LifecycleStatus::Stopping, last_error);
        match engine.stop().await {
            Ok(status) => {
                slot.update(status, engine.last_error());
                debug!(tenant = %tenant_id, %status, "tenant engine stopped");
                Ok(status)
            }
            Err(e) => {
                slot.update(engine.status(), engine.last_error());
                Err(e)
            }
        }
    }

    /// Caller holds the slot's transition lock.
    async fn terminate_slot(
        &self,
        tenant_id: &TenantId,
        slot: &TenantSlot<E>,
    ) {
        if let Some(engine) = slot.engine() {
            if let Err(e) = engine.terminate().await {
                warn!(tenant = %tenant_id, "terminate failed: {}", e);
            }
        }
        let last_error = slot.snapshot(tenant_id).last_error;
        slot.update(LifecycleStatus::Terminated, last_error);
        info!(tenant = %tenant_id, "tenant engine terminated");
    }

    async fn bootstrap_tenant(
        &self,
        tenant_id: &TenantId,
    ) -> Result<LifecycleStatus> {
        if self.contains(tenant_id) {
            self.restart_engine(tenant_id).await
        } else {
            self.create_and_start_default_engine(tenant_id).await
        }
    }
}

#[async_trait]
impl<E: TenantEngine + ?Sized + 'static> LifecycleComponent for TenantEngineManager<E> {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    async fn initialize(&self) -> Result<()> {
        let results = join_all(self.bootstrap.iter().map(|id| self.bootstrap_tenant(id))).await;
        for (tenant_id, result) in self.bootstrap.iter().zip(results) {
            match result {
                Ok(LifecycleStatus::Started) => {}
                Ok(status) => warn!(tenant = %tenant_id, %status, "bootstrap tenant is not running"),
                Err(e) => warn!(tenant = %tenant_id, "failed to bootstrap tenant: {}", e),
            }
        }
        info!(tenants = self.len(), "tenant engines bootstrapped");
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        let slots: Vec<(TenantId, Arc<TenantSlot<E>>)> = self
            .slots
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        join_all(slots.iter().map(|(tenant_id, slot)| async move {
            let Ok(_guard) = timeout(self.stop_timeout, slot.transition.lock()).await else {
                let status = slot.effective_status();
                warn!(tenant = %tenant_id, %status, "tenant still transitioning, skipping stop");
                return;
            };
            match timeout(self.stop_timeout, self.stop_slot(tenant_id, slot)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    warn!(tenant = %tenant_id, "stop failed, terminating: {}", e);
                    self.terminate_slot(tenant_id, slot).await;
                }
                Err(_) => {
                    warn!(tenant = %tenant_id, "stop timed out, terminating");
                    self.terminate_slot(tenant_id, slot).await;
                }
            }
        }))
        .await;
        Ok(())
    }
}
