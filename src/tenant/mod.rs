//! Tenant engines and their manager.
//!
//! A tenant engine is the isolated unit serving one tenant. The
//! [`TenantEngineManager`] owns every engine, drives its lifecycle, and is the
//! only way request handlers reach one: it never hands out an engine that is
//! not Started.

mod device_engine;
mod engine;
mod manager;

pub use device_engine::*;
pub use engine::*;
pub use manager::*;
