// src/lib.rs
//
// Drop-in replacement for the ControlCAN / ECanFDVci vendor libraries,
// driving a CAN-to-serial adapter that speaks the binary "AT" protocol.
//
// Layout:
//   io       - frame types, AT codec, serial line, receive pipeline
//   device   - open devices and the index -> device registry
//   abi      - the exported C functions and vendor struct layouts
//   settings - optional TOML settings for the line

#[macro_use]
mod logging;

pub mod abi;
pub mod device;
pub mod io;
pub mod settings;

pub use device::{CanDevice, DeviceRegistry};
pub use io::{CanError, CanFrame, ChannelConfig, Filter, Timeout};
pub use settings::Settings;
