// src/io/codec.rs
//
// Frame codec trait.
//
// The codec is designed for single-frame operations: `decode` takes exactly
// one wire frame, already delimited. Stream resynchronization lives in the
// receive pipeline, which slices frames out of the byte stream before
// handing them here.

use crate::io::error::Result;
use crate::io::CanFrame;

/// Trait for CAN frame codecs.
///
/// The associated types define the protocol-specific raw frame formats.
pub trait FrameCodec {
    /// The raw frame type for decoding (e.g., byte slice, ASCII string)
    type RawFrame: ?Sized;

    /// The encoded frame type for transmission
    type EncodedFrame;

    /// Decode one complete raw frame into a CanFrame.
    ///
    /// The returned frame carries no timestamp; the caller stamps it on arrival.
    fn decode(raw: &Self::RawFrame) -> Result<CanFrame>;

    /// Encode a frame for transmission.
    ///
    /// Returns `Err` if the frame cannot be represented on the wire.
    fn encode(frame: &CanFrame) -> Result<Self::EncodedFrame>;
}

pub use super::at::codec::AtCodec;
