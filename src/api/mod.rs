//! Outbound API plumbing.
//!
//! An [`ApiChannel`] is one lifecycled connection to one remote endpoint. An
//! [`ApiDemux`] presents many channels to equivalent backends as a single API
//! surface, selecting healthy channels per call (round-robin or fan-out).

mod channel;
mod connector;
mod demux;
mod event_sink;

pub use channel::*;
pub use connector::*;
pub use demux::*;
pub use event_sink::*;

#[cfg(test)]
mod demux_test;
