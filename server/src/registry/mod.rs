//! Device registry and heartbeat processing

pub mod device;
pub mod registry;
