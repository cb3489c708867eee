use std::future::Future;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::warn;

use crate::BackoffPolicy;
use crate::Error;
use crate::NetworkError;
use crate::Result;

/// Runs `task` until it succeeds, each attempt bounded by the policy timeout.
///
/// Delays double after each failure up to `max_delay_ms`. `max_retries == 0`
/// retries until `cancel` fires.
pub(crate) async fn task_with_timeout_and_exponential_backoff<F, T, P>(
    task: F,
    policy: BackoffPolicy,
    cancel: &CancellationToken,
) -> Result<P>
where
    F: Fn() -> T,                   // The type of the async function
    T: Future<Output = Result<P>>, // The future returned by the async function
{
    let mut retries = 0;
    let mut delay = policy.base_delay();
    loop {
        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        let e = match timeout(policy.timeout(), task()).await {
            Ok(Ok(r)) => {
                return Ok(r);
            }
            Ok(Err(error)) => {
                warn!(retries, "attempt failed with error: {:?}", &error);
                error
            }
            Err(_) => {
                warn!(retries, "attempt timed out after {:?}", policy.timeout());
                NetworkError::RetryTimeoutError(policy.timeout()).into()
            }
        };

        retries += 1;
        if !policy.is_unlimited() && retries >= policy.max_retries {
            warn!("Task failed after {} retries", retries);
            return Err(e);
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(cancelled()),
            _ = sleep(delay) => {}
        }
        delay = (delay * 2).min(policy.max_delay());
    }
}

fn cancelled() -> Error {
    NetworkError::TaskBackoffFailed("task cancelled".to_string()).into()
}

/// Spawns a named background task, logging the error it ends with
pub(crate) fn spawn_task<Fut>(
    name: &str,
    task: Fut,
) -> JoinHandle<()>
where
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let name = name.to_string();
    tokio::spawn(async move {
        if let Err(e) = task.await {
            error!("spawned task: {name} stopped or encountered an error: {:?}", e);
        }
    })
}
