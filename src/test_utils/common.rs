use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use crate::BackoffPolicy;
use crate::ChannelSettings;
use crate::TenantId;

static LOGGER_INIT: Once = Once::new();

pub fn enable_logger() {
    LOGGER_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
            .with_test_writer()
            .try_init();
    });
}

pub fn tenant(id: &str) -> TenantId {
    TenantId::new(id).expect("valid tenant id")
}

/// Reconnects quickly and forever, no probing
pub fn fast_reconnect() -> BackoffPolicy {
    BackoffPolicy {
        max_retries: 0,
        timeout_ms: 200,
        base_delay_ms: 10,
        max_delay_ms: 50,
    }
}

pub fn test_channel_settings() -> ChannelSettings {
    ChannelSettings {
        request_timeout: Some(Duration::from_millis(500)),
        reconnect: fast_reconnect(),
        probe_interval: None,
    }
}

pub fn probing_channel_settings(interval: Duration) -> ChannelSettings {
    ChannelSettings {
        probe_interval: Some(interval),
        ..test_channel_settings()
    }
}

/// Polls `check` every few milliseconds until it holds or `within` elapses.
pub async fn wait_until<F>(
    within: Duration,
    check: F,
) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
