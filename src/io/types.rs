// src/io/types.rs
//
// Shared types passed between the codec, the receive pipeline, the channel
// layer and the ABI marshalling code.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

// ============================================================================
// Frames
// ============================================================================

/// Maximum payload of a classic CAN frame
pub const MAX_DATA_LEN: usize = 8;

/// Logical CAN frame as seen by the channel layer.
///
/// `payload` bytes beyond `data_length` are always zero. `timestamp` is only
/// set on frames that came off the wire.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct CanFrame {
    /// 11-bit standard or 29-bit extended identifier
    pub id: u32,
    pub extended: bool,
    pub remote: bool,
    pub data_length: u8,
    pub payload: [u8; MAX_DATA_LEN],
    pub timestamp: Option<Instant>,
}

impl CanFrame {
    /// Build a data frame. `data` longer than 8 bytes is truncated.
    pub fn new(id: u32, extended: bool, data: &[u8]) -> Self {
        let len = data.len().min(MAX_DATA_LEN);
        let mut payload = [0u8; MAX_DATA_LEN];
        payload[..len].copy_from_slice(&data[..len]);
        Self {
            id,
            extended,
            remote: false,
            data_length: len as u8,
            payload,
            timestamp: None,
        }
    }

    /// Build a remote (RTR) frame.
    pub fn remote(id: u32, extended: bool) -> Self {
        Self {
            id,
            extended,
            remote: true,
            ..Self::default()
        }
    }

    /// Payload bytes actually carried by the frame
    pub fn data(&self) -> &[u8] {
        &self.payload[..(self.data_length as usize).min(MAX_DATA_LEN)]
    }

    /// Whether `id` fits the nominal bit width of its frame format
    pub fn id_in_range(&self) -> bool {
        if self.extended {
            self.id <= 0x1FFF_FFFF
        } else {
            self.id <= 0x7FF
        }
    }
}

// ============================================================================
// Channel Configuration
// ============================================================================

/// Acceptance filter slot (0-13 on the adapter)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub number: u8,
    pub enabled: bool,
    /// 0 = mask, 1 = list
    pub mode: u8,
    pub filter_value: u32,
    pub mask_value: u32,
}

/// Settings applied to channel 0 by the command-mode handshake
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// CAN bitrate in bits/second
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// 0 = normal, 1 = loopback
    #[serde(default)]
    pub mode: u8,
    #[serde(default)]
    pub filters: Vec<Filter>,
}

fn default_baud_rate() -> u32 { 1_000_000 }

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            mode: 0,
            filters: Vec::new(),
        }
    }
}

/// Channel modes understood by `AT+CAN_MODE`
pub mod mode {
    pub const NORMAL: u8 = 0;
    pub const LOOPBACK: u8 = 1;
}

// ============================================================================
// Board Information
// ============================================================================

/// Identification record reported through ReadBoardInfo / GetReference.
/// The adapter has no such query, so the values are synthesized per device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoardInfo {
    pub hw_version: u16,
    pub fw_version: u16,
    pub dr_version: u16,
    pub in_version: u16,
    pub irq_num: u16,
    pub can_num: u8,
    pub serial_num: String,
    pub hw_type: String,
}

impl BoardInfo {
    pub fn for_port(port_name: &str) -> Self {
        Self {
            hw_version: 5,
            fw_version: 4,
            dr_version: 3,
            in_version: 0,
            irq_num: 0,
            can_num: 1,
            serial_num: format!("Serial_{}", port_name),
            hw_type: format!("Serial_{}", port_name),
        }
    }
}

// ============================================================================
// Timeouts
// ============================================================================

/// How long `receive` may wait for the first frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Timeout {
    /// Wait until a frame arrives or the device is closed
    Infinite,
    /// Wait at most this long; zero never waits
    After(Duration),
}

impl Timeout {
    pub fn millis(ms: u64) -> Self {
        Timeout::After(Duration::from_millis(ms))
    }

    /// Legacy `WaitTime` convention: any negative value means infinite
    pub fn from_wait_time(wait_time: i32) -> Self {
        if wait_time < 0 {
            Timeout::Infinite
        } else {
            Timeout::millis(wait_time as u64)
        }
    }
}
