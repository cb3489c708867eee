//! Inbound gRPC surface.
//!
//! [`DeviceManagementService`] turns `devmgmt.device.DeviceManagement` calls
//! into tenant engine operations; [`GrpcServer`] owns the listener and serves
//! it together with `grpc.health.v1.Health`.

mod server;
mod service;

pub use server::*;
pub use service::*;
