//! Test doubles for outbound APIs.
//!
//! - [`MockConnector`] simulates endpoints in memory: reachability, health
//!   probes, response delays and injected statuses are switchable per target,
//!   so channel and demux behaviour can be tested without binding ports.
//! - [`MockBackend`] serves the asset and event management gRPC services on
//!   an ephemeral local port for end-to-end tests of the gRPC bindings.

mod mock_backend;
mod mock_connector;

pub use mock_backend::*;
pub use mock_connector::*;
