// src/io/at/mod.rs
//
// Driver for the serial "AT" USB-CAN adapter: a binary frame mode bracketed
// by "AT" ... CR LF, plus an ASCII command mode used for configuration.

pub mod codec;
pub mod command;
pub mod line;
pub mod pipeline;

#[cfg(test)]
pub(crate) mod mock;

// Re-export public items
pub use codec::AtCodec;
pub use line::{LineConnector, LineIo, SerialConnector, SerialLine};
pub use pipeline::{parse_at_frames, FrameQueue};
