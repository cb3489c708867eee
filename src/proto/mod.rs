//! Protocol Buffer definitions and generated code for RPC services.
//!
//! The generated code is checked in under `src/generated`; set
//! `DEVMGMT_REGENERATE_PROTO` to rebuild it from `proto/` with `tonic-build`.

pub mod device {
    include!("../generated/devmgmt.device.rs");
}

pub mod asset {
    include!("../generated/devmgmt.asset.rs");
}

pub mod event {
    include!("../generated/devmgmt.event.rs");
}
