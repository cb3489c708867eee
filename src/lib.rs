//! Multi-tenant device management microservice runtime.
//!
//! One process hosts many tenants. Each tenant is served by an isolated
//! tenant engine owned by the [`TenantEngineManager`]; outbound calls go
//! through lifecycled [`ApiChannel`]s, grouped behind an [`ApiDemux`] when
//! several equivalent backends exist. Everything long-lived implements
//! [`LifecycleComponent`] and is assembled by [`MicroserviceBuilder`].

mod api;
mod asset;
mod config;
mod errors;
mod grpc;
mod lifecycle;
mod microservice;
mod tenant;

pub(crate) mod constants;
pub mod proto;
pub(crate) mod utils;

pub use api::*;
pub use asset::*;
pub use config::*;
pub use constants::DEFAULT_TENANT_METADATA_KEY;
pub use errors::*;
pub use grpc::*;
pub use lifecycle::*;
pub use microservice::*;
pub use tenant::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
