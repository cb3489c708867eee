use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tonic::async_trait;

use super::*;
use crate::Error;

struct TestComponent {
    lifecycle: Lifecycle,
    fail_init: AtomicBool,
    fail_release: AtomicBool,
    init_calls: AtomicUsize,
    release_calls: AtomicUsize,
    init_delay: Duration,
}

impl TestComponent {
    fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    fn with_delay(init_delay: Duration) -> Self {
        Self {
            lifecycle: Lifecycle::new("test-component"),
            fail_init: AtomicBool::new(false),
            fail_release: AtomicBool::new(false),
            init_calls: AtomicUsize::new(0),
            release_calls: AtomicUsize::new(0),
            init_delay,
        }
    }
}

#[async_trait]
impl LifecycleComponent for TestComponent {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    async fn initialize(&self) -> Result<()> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        if !self.init_delay.is_zero() {
            tokio::time::sleep(self.init_delay).await;
        }
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(Error::Fatal("boom".to_string()));
        }
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_release.load(Ordering::SeqCst) {
            return Err(Error::Fatal("release boom".to_string()));
        }
        Ok(())
    }
}

#[test]
fn test_transition_table() {
    use LifecycleStatus::*;

    assert!(Stopped.can_transition_to(Starting));
    assert!(Starting.can_transition_to(Started));
    assert!(Started.can_transition_to(Stopping));
    assert!(Stopping.can_transition_to(Stopped));
    assert!(Errored.can_transition_to(Stopping));
    assert!(Started.can_transition_to(Errored));
    assert!(Stopped.can_transition_to(Terminated));

    assert!(!Stopped.can_transition_to(Started));
    assert!(!Errored.can_transition_to(Starting));
    assert!(!Errored.can_transition_to(Errored));
    assert!(!Started.can_transition_to(Starting));
    for next in [Stopped, Starting, Started, Stopping, Errored, Terminated] {
        assert!(!Terminated.can_transition_to(next));
    }
}

#[tokio::test]
async fn test_start_and_stop_happy_path() {
    let component = TestComponent::new();
    let mut rx = component.subscribe();
    assert_eq!(component.status(), LifecycleStatus::Stopped);

    assert_eq!(component.start().await.unwrap(), LifecycleStatus::Started);
    assert_eq!(component.status(), LifecycleStatus::Started);
    assert!(rx.has_changed().unwrap());
    assert_eq!(*rx.borrow_and_update(), LifecycleStatus::Started);

    assert_eq!(component.stop().await.unwrap(), LifecycleStatus::Stopped);
    assert_eq!(component.status(), LifecycleStatus::Stopped);
    assert_eq!(component.release_calls.load(Ordering::SeqCst), 1);
    assert!(component.last_error().is_none());
}

#[tokio::test]
async fn test_start_is_idempotent_when_started() {
    let component = TestComponent::new();
    component.start().await.unwrap();
    assert_eq!(component.start().await.unwrap(), LifecycleStatus::Started);
    assert_eq!(component.init_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stop_is_idempotent_when_stopped() {
    let component = TestComponent::new();
    assert_eq!(component.stop().await.unwrap(), LifecycleStatus::Stopped);
    assert_eq!(component.release_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failed_initialize_moves_to_errored() {
    let component = TestComponent::new();
    component.fail_init.store(true, Ordering::SeqCst);

    let err = component.start().await.unwrap_err();
    assert!(matches!(
        err,
        Error::Lifecycle(LifecycleError::InitializationFailure { .. })
    ));
    assert_eq!(component.status(), LifecycleStatus::Errored);
    assert!(matches!(
        component.last_error(),
        Some(LifecycleError::InitializationFailure { ref reason, .. }) if reason.contains("boom")
    ));
}

#[tokio::test]
async fn test_start_from_errored_is_invalid_transition() {
    let component = TestComponent::new();
    component.fail_init.store(true, Ordering::SeqCst);
    let _ = component.start().await;

    let err = component.start().await.unwrap_err();
    assert!(matches!(
        err,
        Error::Lifecycle(LifecycleError::InvalidTransition {
            from: LifecycleStatus::Errored,
            to: LifecycleStatus::Starting,
            ..
        })
    ));
}

#[tokio::test]
async fn test_restart_recovers_from_errored() {
    let component = TestComponent::new();
    component.fail_init.store(true, Ordering::SeqCst);
    let _ = component.start().await;

    component.fail_init.store(false, Ordering::SeqCst);
    assert_eq!(component.restart().await.unwrap(), LifecycleStatus::Started);
    assert_eq!(component.release_calls.load(Ordering::SeqCst), 1);
    assert!(component.last_error().is_none());
}

#[tokio::test]
async fn test_failed_release_still_stops() {
    let component = TestComponent::new();
    component.start().await.unwrap();
    component.fail_release.store(true, Ordering::SeqCst);

    assert_eq!(component.stop().await.unwrap(), LifecycleStatus::Stopped);
    assert!(matches!(
        component.last_error(),
        Some(LifecycleError::ReleaseFailure { .. })
    ));
}

#[tokio::test]
async fn test_terminate_is_final_and_idempotent() {
    let component = TestComponent::new();
    component.start().await.unwrap();
    component.fail_release.store(true, Ordering::SeqCst);

    assert_eq!(component.terminate().await.unwrap(), LifecycleStatus::Terminated);
    assert_eq!(component.terminate().await.unwrap(), LifecycleStatus::Terminated);
    assert_eq!(component.release_calls.load(Ordering::SeqCst), 1);

    assert!(component.start().await.is_err());
    assert_eq!(component.stop().await.unwrap(), LifecycleStatus::Terminated);
    assert!(!component.record_failure("late".to_string()));
    assert_eq!(component.status(), LifecycleStatus::Terminated);
}

#[tokio::test]
async fn test_terminate_from_stopped_skips_release() {
    let component = TestComponent::new();
    assert_eq!(component.terminate().await.unwrap(), LifecycleStatus::Terminated);
    assert_eq!(component.release_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_terminate_releases_after_cancelled_start() {
    let component = TestComponent::with_delay(Duration::from_secs(10));

    let cancelled = tokio::time::timeout(Duration::from_millis(10), component.start()).await;
    assert!(cancelled.is_err());
    assert_eq!(component.status(), LifecycleStatus::Starting);

    assert_eq!(component.terminate().await.unwrap(), LifecycleStatus::Terminated);
    assert_eq!(component.release_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_record_failure_moves_started_to_errored() {
    let component = TestComponent::new();
    component.start().await.unwrap();

    assert!(component.record_failure("connection lost".to_string()));
    assert_eq!(component.status(), LifecycleStatus::Errored);
    assert!(matches!(
        component.last_error(),
        Some(LifecycleError::RuntimeFailure { .. })
    ));

    assert_eq!(component.stop().await.unwrap(), LifecycleStatus::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_stop_waits_for_in_flight_start() {
    let component = Arc::new(TestComponent::with_delay(Duration::from_millis(100)));

    let starter = {
        let component = component.clone();
        tokio::spawn(async move { component.start().await })
    };
    while component.status() != LifecycleStatus::Starting {
        tokio::task::yield_now().await;
    }

    assert_eq!(component.stop().await.unwrap(), LifecycleStatus::Stopped);
    assert_eq!(starter.await.unwrap().unwrap(), LifecycleStatus::Started);
    assert_eq!(component.release_calls.load(Ordering::SeqCst), 1);
}
