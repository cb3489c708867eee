//! Device Management Runtime Error Hierarchy
//!
//! Errors are grouped by the layer that raises them: component lifecycle,
//! tenant engine management, outbound API channels, asset resolution and the
//! device registry. Request-path errors are translated to gRPC statuses at the
//! server boundary through `From<Error> for tonic::Status`.

use std::time::Duration;

use config::ConfigError;
use tokio::task::JoinError;
use tonic::Code;
use tonic::Status;

use crate::LifecycleStatus;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Infrastructure-level failures (network, sockets, background tasks)
    #[error(transparent)]
    System(#[from] SystemError),

    /// Configuration loading and validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Component state machine failures
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// Tenant engine registry failures
    #[error(transparent)]
    Tenant(#[from] TenantError),

    /// Outbound API channel and demux failures
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Asset resolution failures
    #[error(transparent)]
    Asset(#[from] AssetError),

    /// Device registry failures inside a tenant engine
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

/// Failures raised by a `LifecycleComponent` transition.
///
/// Cloneable so that the last failure can be kept on the component and handed
/// out to observers without consuming it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("{component} failed to initialize: {reason}")]
    InitializationFailure { component: String, reason: String },

    #[error("{component} failed to release resources: {reason}")]
    ReleaseFailure { component: String, reason: String },

    #[error("{component} cannot transition from {from} to {to}")]
    InvalidTransition {
        component: String,
        from: LifecycleStatus,
        to: LifecycleStatus,
    },

    #[error("{component} reported a runtime failure: {reason}")]
    RuntimeFailure { component: String, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum TenantError {
    #[error("Tenant {0} already has an engine")]
    AlreadyExists(String),

    #[error("Tenant {0} not found")]
    NotFound(String),

    #[error("Tenant {tenant_id} is not ready (status: {status})")]
    NotReady {
        tenant_id: String,
        status: LifecycleStatus,
    },

    #[error("No configuration found for tenant {0}")]
    MissingConfiguration(String),

    #[error("Invalid tenant id: {0:?}")]
    InvalidId(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Channel not started or connection down
    #[error("API channel unavailable: {0}")]
    Unavailable(String),

    /// Per-call deadline elapsed
    #[error("Request to {target} timed out after {duration:?}")]
    Timeout { target: String, duration: Duration },

    #[error("Channel for target {0} already exists")]
    DuplicateTarget(String),

    #[error("No channel registered for target {0}")]
    ChannelNotFound(String),

    #[error("No healthy channel available")]
    NoHealthyChannel,

    #[error("Invalid target {target:?}: {reason}")]
    InvalidTarget { target: String, reason: String },

    /// Non-transport status returned by the remote service
    #[error("Remote call to {target} failed: {status}")]
    Rpc { target: String, status: Box<Status> },
}

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("Asset {token} not found for tenant {tenant_id}")]
    AssetNotFound { tenant_id: String, token: String },

    #[error("Asset resolution unavailable: {0}")]
    ResolutionUnavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Device {0} not found")]
    NotFound(String),

    #[error("Device {0} already exists")]
    AlreadyExists(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// Listener could not be bound
    #[error("Failed to bind {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// gRPC transport layer errors
    #[error(transparent)]
    TonicError(#[from] Box<tonic::transport::Error>),

    /// Retry policy exhaustion
    #[error("Retry timeout after {0:?}")]
    RetryTimeoutError(Duration),

    #[error("{0}")]
    TaskBackoffFailed(String),

    /// OS signal handlers could not be installed
    #[error("Signal handler setup failed: {0}")]
    SignalSetupFailed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    // Network layer
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Background task failed: {0}")]
    TaskFailed(#[from] JoinError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("General server error: {0}")]
    GeneralServer(String),
}

// ============== Conversion Implementations ============== //
impl From<NetworkError> for Error {
    fn from(e: NetworkError) -> Self {
        Error::System(SystemError::Network(e))
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(err: tonic::transport::Error) -> Self {
        NetworkError::TonicError(Box::new(err)).into()
    }
}

impl From<JoinError> for Error {
    fn from(err: JoinError) -> Self {
        Error::System(SystemError::TaskFailed(err))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::System(SystemError::Io(err))
    }
}

impl Error {
    /// True when the failure means "try another backend", as opposed to an
    /// answer from the backend itself.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Error::Api(ApiError::Unavailable(_)) | Error::Api(ApiError::NoHealthyChannel)
        )
    }
}

// ============== gRPC boundary ============== //
impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::Tenant(e) => match e {
                TenantError::NotFound(ref id) | TenantError::NotReady { tenant_id: ref id, .. } => {
                    Status::unavailable(format!("tenant {id} unavailable"))
                }
                TenantError::AlreadyExists(_) => Status::already_exists(e.to_string()),
                TenantError::InvalidId(_) => Status::invalid_argument(e.to_string()),
                TenantError::MissingConfiguration(_) => Status::internal(e.to_string()),
            },
            Error::Api(e) => match e {
                ApiError::Unavailable(_) | ApiError::NoHealthyChannel => {
                    Status::unavailable(e.to_string())
                }
                ApiError::Timeout { .. } => Status::deadline_exceeded(e.to_string()),
                ApiError::Rpc { status, .. } => match status.code() {
                    Code::NotFound => Status::not_found(status.message().to_string()),
                    Code::InvalidArgument => Status::invalid_argument(status.message().to_string()),
                    Code::DeadlineExceeded => Status::deadline_exceeded(status.message().to_string()),
                    Code::Unavailable => Status::unavailable(status.message().to_string()),
                    _ => Status::internal(status.message().to_string()),
                },
                _ => Status::internal(e.to_string()),
            },
            Error::Asset(e) => match e {
                AssetError::AssetNotFound { .. } => Status::not_found(e.to_string()),
                AssetError::ResolutionUnavailable(_) => Status::unavailable(e.to_string()),
            },
            Error::Device(e) => match e {
                DeviceError::NotFound(_) => Status::not_found(e.to_string()),
                DeviceError::AlreadyExists(_) => Status::already_exists(e.to_string()),
                DeviceError::InvalidRequest(_) => Status::invalid_argument(e.to_string()),
            },
            other => Status::internal(other.to_string()),
        }
    }
}
