use std::path::Path;

use devmgmt::DeviceManagementMicroservice;
use devmgmt::LifecycleComponent;
use devmgmt::MicroserviceBuilder;
use devmgmt::NetworkError;
use devmgmt::Result;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tracing::error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let builder = MicroserviceBuilder::from_env()?;
    let microservice = builder.build()?;

    // Initializing Logs
    let config = microservice.config();
    let _guard = init_observability(&config.service.instance_id, config.service.log_dir.as_deref());

    if let Err(e) = microservice.start().await {
        error!("microservice failed to start: {}", e);
        stop(&microservice).await;
        return Err(e);
    }

    info!("Application started. Waiting for shutdown signal...");
    if let Err(e) = wait_for_shutdown_signal().await {
        error!("Failed to listen for shutdown signals: {:?}", e);
    }

    stop(&microservice).await;
    info!("Exiting program.");
    Ok(())
}

async fn stop(microservice: &DeviceManagementMicroservice) {
    if let Err(e) = microservice.stop().await {
        error!("microservice stopped with errors: {}", e);
    }
}

async fn wait_for_shutdown_signal() -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| NetworkError::SignalSetupFailed(format!("SIGINT handler: {e}")))?;
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| NetworkError::SignalSetupFailed(format!("SIGTERM handler: {e}")))?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C detected.");
        },
    }
    Ok(())
}

/// Logs to a daily rolling file under `log_dir`, or to stdout.
fn init_observability(
    instance_id: &str,
    log_dir: Option<&Path>,
) -> WorkerGuard {
    let (non_blocking, guard) = match log_dir {
        Some(dir) => tracing_appender::non_blocking(tracing_appender::rolling::daily(
            dir,
            format!("{instance_id}.log"),
        )),
        None => tracing_appender::non_blocking(std::io::stdout()),
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let base_subscriber = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_filter(filter);
    tracing_subscriber::registry().with(base_subscriber).init();

    guard
}
