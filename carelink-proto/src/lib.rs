//! Shared protocol definitions for the `CareLink` wire format.

pub mod ack;
pub mod envelope;
pub mod frame;
pub mod types;
