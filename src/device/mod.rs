// src/device/mod.rs
//
// Device layer: open devices, their channel operations, and the registry
// mapping vendor device indices to them.

mod channel;
mod registry;

pub use channel::{CanDevice, CHANNEL_0};
pub use registry::DeviceRegistry;
