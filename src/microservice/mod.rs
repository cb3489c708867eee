//! Composition root of the device management runtime.
//!
//! [`MicroserviceBuilder`] wires the outbound API channels, the asset
//! resolver, the tenant engine manager and the gRPC server from a
//! [`MicroserviceConfig`]; the resulting [`DeviceManagementMicroservice`]
//! starts them in dependency order and stops them in reverse.
//!
//! ## Example
//! ```ignore
//! let config = MicroserviceConfig::new()?.validate()?;
//! let microservice = MicroserviceBuilder::new(config).build()?;
//! microservice.start().await?;
//! ```
//!
//! [`MicroserviceConfig`]: crate::MicroserviceConfig

mod builder;
mod microservice;

pub use builder::*;
pub use microservice::*;
