//! Realtime chat: the hub that owns membership and fan-out, and the
//! per-connection read and write loops.

pub mod client;
pub mod hub;

pub use client::PumpSettings;
pub use hub::{ClientInfo, Connection, Hub, HubError};
