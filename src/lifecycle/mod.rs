//! Component lifecycle state machine.
//!
//! Every long-lived part of the runtime (API channels, the asset demux and
//! resolver, tenant engines, the tenant engine manager, the gRPC server and
//! the microservice itself) embeds a [`Lifecycle`] and implements
//! [`LifecycleComponent`]. Status only changes through validated transitions:
//!
//! ```text
//! Stopped -> Starting -> Started -> Stopping -> Stopped
//!    any non-terminal state -> Errored -> Stopping (explicit stop/restart)
//!    any non-terminal state -> Terminated
//! ```
//!
//! Transitions of one component are serialized by an async lock; status and
//! last-error reads never take it.

#[cfg(test)]
mod lifecycle_test;

use std::fmt;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::sync::MutexGuard;
use tonic::async_trait;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::LifecycleError;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleStatus {
    Stopped,
    Starting,
    Started,
    Stopping,
    Errored,
    Terminated,
}

impl LifecycleStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleStatus::Terminated)
    }

    /// Transition table of the state machine
    pub fn can_transition_to(
        &self,
        next: LifecycleStatus,
    ) -> bool {
        use LifecycleStatus::*;
        match (self, next) {
            (Terminated, _) => false,
            (_, Terminated) => true,
            (Errored, Errored) => false,
            (_, Errored) => true,
            (Stopped, Starting)
            | (Starting, Started)
            | (Started, Stopping)
            | (Errored, Stopping)
            | (Stopping, Stopped) => true,
            _ => false,
        }
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let s = match self {
            LifecycleStatus::Stopped => "Stopped",
            LifecycleStatus::Starting => "Starting",
            LifecycleStatus::Started => "Started",
            LifecycleStatus::Stopping => "Stopping",
            LifecycleStatus::Errored => "Errored",
            LifecycleStatus::Terminated => "Terminated",
        };
        f.write_str(s)
    }
}

/// Status holder embedded in every component.
pub struct Lifecycle {
    name: String,
    status: watch::Sender<LifecycleStatus>,
    last_error: Mutex<Option<LifecycleError>>,
    transition_lock: tokio::sync::Mutex<()>,
}

impl fmt::Debug for Lifecycle {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("name", &self.name)
            .field("status", &self.status())
            .finish()
    }
}

impl Lifecycle {
    pub fn new(name: impl Into<String>) -> Self {
        let (status, _) = watch::channel(LifecycleStatus::Stopped);
        Self {
            name: name.into(),
            status,
            last_error: Mutex::new(None),
            transition_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> LifecycleStatus {
        *self.status.borrow()
    }

    pub fn last_error(&self) -> Option<LifecycleError> {
        self.last_error.lock().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleStatus> {
        self.status.subscribe()
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, ()> {
        self.transition_lock.lock().await
    }

    /// Moves to `next` if the transition table allows it.
    pub(crate) fn transition(
        &self,
        next: LifecycleStatus,
    ) -> Result<()> {
        let mut from = next;
        let changed = self.status.send_if_modified(|current| {
            from = *current;
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                false
            }
        });

        if !changed {
            return Err(self.invalid_transition(from, next).into());
        }
        debug!(component = %self.name, %from, to = %next, "lifecycle transition");
        Ok(())
    }

    pub(crate) fn invalid_transition(
        &self,
        from: LifecycleStatus,
        to: LifecycleStatus,
    ) -> LifecycleError {
        LifecycleError::InvalidTransition {
            component: self.name.clone(),
            from,
            to,
        }
    }

    pub(crate) fn set_last_error(
        &self,
        error: Option<LifecycleError>,
    ) {
        *self.last_error.lock() = error;
    }

    /// Runtime self-report: any non-terminal state moves to Errored.
    ///
    /// Returns false when the component is already Terminated.
    pub fn record_failure(
        &self,
        reason: impl Into<String>,
    ) -> bool {
        let failure = LifecycleError::RuntimeFailure {
            component: self.name.clone(),
            reason: reason.into(),
        };
        if self.status().is_terminal() {
            return false;
        }
        warn!(component = %self.name, "{}", failure);
        self.set_last_error(Some(failure));
        self.status.send_if_modified(|current| {
            if current.can_transition_to(LifecycleStatus::Errored) {
                *current = LifecycleStatus::Errored;
                true
            } else {
                false
            }
        });
        true
    }

    fn mark_errored(
        &self,
        failure: LifecycleError,
    ) {
        self.set_last_error(Some(failure));
        if self.status() != LifecycleStatus::Errored {
            let _ = self.transition(LifecycleStatus::Errored);
        }
    }
}

/// A component with a validated Stopped/Started lifecycle.
///
/// Implementors provide the `initialize` and `release` hooks; the provided
/// methods drive the state machine around them.
#[async_trait]
pub trait LifecycleComponent: Send + Sync {
    fn lifecycle(&self) -> &Lifecycle;

    /// Acquires the component's resources. Runs inside `start`.
    async fn initialize(&self) -> Result<()>;

    /// Releases the component's resources. Must tolerate partially
    /// initialized state.
    async fn release(&self) -> Result<()>;

    fn component_name(&self) -> &str {
        self.lifecycle().name()
    }

    fn status(&self) -> LifecycleStatus {
        self.lifecycle().status()
    }

    fn last_error(&self) -> Option<LifecycleError> {
        self.lifecycle().last_error()
    }

    fn subscribe(&self) -> watch::Receiver<LifecycleStatus> {
        self.lifecycle().subscribe()
    }

    fn record_failure(
        &self,
        reason: String,
    ) -> bool {
        self.lifecycle().record_failure(reason)
    }

    /// Stopped -> Starting -> Started, or Errored if `initialize` fails.
    ///
    /// No-op when already Started.
    async fn start(&self) -> Result<LifecycleStatus> {
        let lifecycle = self.lifecycle();
        let _guard = lifecycle.lock().await;

        match lifecycle.status() {
            LifecycleStatus::Started => return Ok(LifecycleStatus::Started),
            LifecycleStatus::Stopped => {}
            other => {
                return Err(lifecycle.invalid_transition(other, LifecycleStatus::Starting).into());
            }
        }

        lifecycle.transition(LifecycleStatus::Starting)?;
        match self.initialize().await {
            Ok(()) => {
                lifecycle.transition(LifecycleStatus::Started)?;
                lifecycle.set_last_error(None);
                info!(component = %lifecycle.name(), "started");
                Ok(LifecycleStatus::Started)
            }
            Err(e) => {
                let failure = LifecycleError::InitializationFailure {
                    component: lifecycle.name().to_string(),
                    reason: e.to_string(),
                };
                warn!(component = %lifecycle.name(), "{}", failure);
                lifecycle.mark_errored(failure.clone());
                Err(failure.into())
            }
        }
    }

    /// Started|Errored -> Stopping -> Stopped.
    ///
    /// A failing `release` still ends in Stopped and is kept as the last
    /// error. No-op when already Stopped or Terminated.
    async fn stop(&self) -> Result<LifecycleStatus> {
        let lifecycle = self.lifecycle();
        let _guard = lifecycle.lock().await;

        match lifecycle.status() {
            status @ (LifecycleStatus::Stopped | LifecycleStatus::Terminated) => return Ok(status),
            LifecycleStatus::Started | LifecycleStatus::Errored => {}
            other => {
                return Err(lifecycle.invalid_transition(other, LifecycleStatus::Stopping).into());
            }
        }

        lifecycle.transition(LifecycleStatus::Stopping)?;
        if let Err(e) = self.release().await {
            let failure = LifecycleError::ReleaseFailure {
                component: lifecycle.name().to_string(),
                reason: e.to_string(),
            };
            warn!(component = %lifecycle.name(), "{}", failure);
            lifecycle.set_last_error(Some(failure));
        }

        // Stopping -> Stopped can only fail if a runtime failure raced in
        if lifecycle.transition(LifecycleStatus::Stopped).is_err() {
            lifecycle.transition(LifecycleStatus::Stopping)?;
            lifecycle.transition(LifecycleStatus::Stopped)?;
        }
        info!(component = %lifecycle.name(), "stopped");
        Ok(LifecycleStatus::Stopped)
    }

    /// Explicit recovery path: stop (if needed) then start.
    async fn restart(&self) -> Result<LifecycleStatus> {
        self.stop().await?;
        self.start().await
    }

    /// Irreversible shutdown from any state, releasing acquired resources.
    ///
    /// Anything but Stopped may hold resources, including a Starting or
    /// Stopping state left behind by a cancelled start or stop.
    async fn terminate(&self) -> Result<LifecycleStatus> {
        let lifecycle = self.lifecycle();
        let _guard = lifecycle.lock().await;

        let status = lifecycle.status();
        if status.is_terminal() {
            return Ok(LifecycleStatus::Terminated);
        }

        if status != LifecycleStatus::Stopped {
            if let Err(e) = self.release().await {
                let failure = LifecycleError::ReleaseFailure {
                    component: lifecycle.name().to_string(),
                    reason: e.to_string(),
                };
                warn!(component = %lifecycle.name(), "{}", failure);
                lifecycle.set_last_error(Some(failure));
            }
        }

        lifecycle.transition(LifecycleStatus::Terminated)?;
        info!(component = %lifecycle.name(), "terminated");
        Ok(LifecycleStatus::Terminated)
    }
}
