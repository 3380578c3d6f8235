// src/io/mod.rs
//
// Adapter-facing half of the driver: frame types, the codec seam, errors and
// the AT serial driver. Nothing here knows about the vendor ABI.

// Core modules
pub mod codec; // Frame codec trait and implementations
pub mod error;
pub mod types;

// Serial driver
pub mod at;

// Re-export core types
pub use codec::FrameCodec;
pub use error::{CanError, Result};
pub use types::{BoardInfo, CanFrame, ChannelConfig, Filter, Timeout};
