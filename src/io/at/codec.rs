// src/io/at/codec.rs
//
// AT-framed binary CAN codec.
//
// Frame format (both directions):
//   ['A']['T'][Packed-4bytes-BE][Length-1byte][Data...]['\r']['\n']
//
// Packed word:
//   bits 31..21  standard id (11 bits)      shift 21
//   bits 31..3   extended id (29 bits)      shift 3
//   bit 2        1 = extended
//   bit 1        1 = remote
//   bit 0        unused
//
// Remote frames carry a length byte of 0 and no data.

use crate::io::codec::FrameCodec;
use crate::io::error::{CanError, Result};
use crate::io::types::MAX_DATA_LEN;
use crate::io::CanFrame;

/// AT codec constants
pub mod consts {
    /// Frame marker
    pub const MARKER: [u8; 2] = *b"AT";
    /// Frame terminator
    pub const TERMINATOR: [u8; 2] = *b"\r\n";
    /// Marker + packed word
    pub const LENGTH_OFFSET: usize = 6;
    /// Marker + packed word + length byte
    pub const HEADER_LEN: usize = 7;
    /// Shortest frame on the wire (no data)
    pub const MIN_FRAME_LEN: usize = HEADER_LEN + 2;
    /// Id shift for standard frames
    pub const STD_SHIFT: u32 = 21;
    /// Id shift for extended frames
    pub const EXT_SHIFT: u32 = 3;
    /// Extended flag in the packed word
    pub const EXT_FLAG: u32 = 1 << 2;
    /// Remote flag in the packed word
    pub const RTR_FLAG: u32 = 1 << 1;
}

/// Total wire length of a frame whose length byte is `len`
pub fn frame_len(len: u8) -> usize {
    consts::HEADER_LEN + len as usize + consts::TERMINATOR.len()
}

/// Pack id and flags into the adapter's 32-bit field.
pub fn pack_word(id: u32, extended: bool, remote: bool) -> u32 {
    let shift = if extended { consts::EXT_SHIFT } else { consts::STD_SHIFT };
    let mut word = id << shift;
    if extended {
        word |= consts::EXT_FLAG;
    }
    if remote {
        word |= consts::RTR_FLAG;
    }
    word
}

/// Split a packed word back into `(id, extended, remote)`.
pub fn unpack_word(word: u32) -> (u32, bool, bool) {
    let extended = word & consts::EXT_FLAG != 0;
    let remote = word & consts::RTR_FLAG != 0;
    let shift = if extended { consts::EXT_SHIFT } else { consts::STD_SHIFT };
    (word >> shift, extended, remote)
}

/// AT-framed binary codec.
pub struct AtCodec;

impl FrameCodec for AtCodec {
    /// One complete frame, marker through CR LF
    type RawFrame = [u8];
    type EncodedFrame = Vec<u8>;

    fn decode(raw: &[u8]) -> Result<CanFrame> {
        use consts::*;

        if raw.len() < MIN_FRAME_LEN {
            return Err(CanError::protocol(
                "at",
                format!(
                    "frame too short: {} bytes, need at least {}",
                    raw.len(),
                    MIN_FRAME_LEN
                ),
            ));
        }

        if raw[..2] != MARKER {
            return Err(CanError::protocol(
                "at",
                format!("invalid marker: {:02X} {:02X}", raw[0], raw[1]),
            ));
        }

        let len = raw[LENGTH_OFFSET];
        if len as usize > MAX_DATA_LEN {
            return Err(CanError::protocol(
                "at",
                format!("invalid length: {} (max {})", len, MAX_DATA_LEN),
            ));
        }

        if raw.len() < frame_len(len) {
            return Err(CanError::protocol(
                "at",
                format!("incomplete frame: {} bytes, need {}", raw.len(), frame_len(len)),
            ));
        }

        let word = u32::from_be_bytes([raw[2], raw[3], raw[4], raw[5]]);
        let (id, extended, remote) = unpack_word(word);

        let mut payload = [0u8; MAX_DATA_LEN];
        payload[..len as usize].copy_from_slice(&raw[HEADER_LEN..HEADER_LEN + len as usize]);

        Ok(CanFrame {
            id,
            extended,
            remote,
            data_length: len,
            payload,
            timestamp: None,
        })
    }

    /// Encode a frame, rejecting ids wider than their frame format and
    /// lengths above 8.
    fn encode(frame: &CanFrame) -> Result<Vec<u8>> {
        use consts::*;

        if !frame.id_in_range() {
            return Err(CanError::protocol(
                "at",
                format!(
                    "id 0x{:X} does not fit a {} frame",
                    frame.id,
                    if frame.extended { "29-bit" } else { "11-bit" }
                ),
            ));
        }

        if frame.data_length as usize > MAX_DATA_LEN {
            return Err(CanError::protocol(
                "at",
                format!("data too long: {} bytes (max {})", frame.data_length, MAX_DATA_LEN),
            ));
        }

        let len = if frame.remote { 0 } else { frame.data_length };
        let mut buf = Vec::with_capacity(frame_len(len));

        buf.extend_from_slice(&MARKER);
        buf.extend_from_slice(&pack_word(frame.id, frame.extended, frame.remote).to_be_bytes());
        buf.push(len);
        buf.extend_from_slice(&frame.payload[..len as usize]);
        buf.extend_from_slice(&TERMINATOR);

        Ok(buf)
    }
}
