//! Shared helpers for unit tests: an in-memory [`ApiConnector`] and mock
//! gRPC backends for the asset and event management services.
//!
//! [`ApiConnector`]: crate::ApiConnector
mod common;
mod mock;

pub use common::*;
pub use mock::*;
