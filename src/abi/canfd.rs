// src/abi/canfd.rs
//
// ECanFDVci exports.
//
// The adapter is classic CAN only: CANFD_OBJ records are accepted and
// produced, records carrying more than 8 data bytes are refused with
// ERR_DATA_LEN and received frames are always reported as classic (proto = 0). Status 0 = ok; failures are the
// vendor's bit-flag codes.

#![allow(non_snake_case)]

use std::time::Instant;

use chrono::{DateTime, Datelike, Local, Timelike};

use super::classic::write_board_info;
use super::layout::{board_info, canfd_obj, canfd_status, err_frame, init_config, timestamp};
use super::{guarded, records, records_mut, registry};
use crate::device::{CanDevice, DeviceRegistry};
use crate::io::error::CanError;
use crate::io::types::MAX_DATA_LEN;
use crate::io::{CanFrame, ChannelConfig, Timeout};

pub const STATUS_OK: u32 = 0;
pub const ERR_CAN_NOINIT: u32 = 0x0001;
pub const ERR_DATA_LEN: u32 = 0x0010;
pub const ERR_USB_WRITE: u32 = 0x0020;
pub const ERR_DEVICEOPENED: u32 = 0x0100;
pub const ERR_DEVICEOPEN: u32 = 0x0200;
pub const ERR_DEVICENOTOPEN: u32 = 0x0400;
pub const ERR_DEVICENOTEXIST: u32 = 0x1000;
pub const ERR_DEVICECLOSE: u32 = 0x2000;

/// Frames returned by ReceiveFD when the caller passes a length of 0
pub const DEFAULT_RECEIVE_BATCH: usize = 100;

/// NominalBitRateSelect -> CAN bitrate (BAUDRATE_1M = 0 ... BAUDRATE_5K = 15)
pub const BAUD_RATE: [u32; 16] = [
    1_000_000, 800_000, 500_000, 400_000, 250_000, 200_000, 125_000, 100_000, 80_000, 62_500,
    50_000, 40_000, 25_000, 20_000, 10_000, 5_000,
];

// ============================================================================
// Bit-packed Registers
// ============================================================================

/// CanORCanfdType byte: proto bit0, format bit1, type bit2, bitratemode bit3
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameType(pub u8);

impl FrameType {
    const PROTO: u8 = 1 << 0;
    const FORMAT: u8 = 1 << 1;
    const TYPE: u8 = 1 << 2;
    const BITRATEMODE: u8 = 1 << 3;

    /// Classic frame with the given format and type bits
    pub fn classic(extended: bool, remote: bool) -> Self {
        let mut bits = 0;
        if extended {
            bits |= Self::FORMAT;
        }
        if remote {
            bits |= Self::TYPE;
        }
        Self(bits)
    }

    /// 0 = CAN, 1 = CAN-FD
    pub fn proto(self) -> u8 {
        self.0 & Self::PROTO
    }

    /// 0 = standard, 1 = extended
    pub fn format(self) -> u8 {
        (self.0 & Self::FORMAT) >> 1
    }

    /// 0 = data, 1 = remote
    pub fn frame_type(self) -> u8 {
        (self.0 & Self::TYPE) >> 2
    }

    /// Bitrate switch
    pub fn bitratemode(self) -> u8 {
        (self.0 & Self::BITRATEMODE) >> 3
    }
}

/// Error counter register
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ecr(pub u32);

impl Ecr {
    pub fn tec(self) -> u8 {
        (self.0 & 0xFF) as u8
    }

    pub fn rec(self) -> u8 {
        ((self.0 >> 8) & 0x7F) as u8
    }

    pub fn rp(self) -> u8 {
        ((self.0 >> 15) & 0x01) as u8
    }

    pub fn cel(self) -> u8 {
        ((self.0 >> 16) & 0xFF) as u8
    }
}

/// Protocol status register
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Psr(pub u32);

impl Psr {
    fn bits(self, shift: u32, width: u32) -> u8 {
        ((self.0 >> shift) & ((1 << width) - 1)) as u8
    }

    pub fn lec(self) -> u8 {
        self.bits(0, 3)
    }

    pub fn act(self) -> u8 {
        self.bits(3, 2)
    }

    pub fn ep(self) -> u8 {
        self.bits(5, 1)
    }

    pub fn ew(self) -> u8 {
        self.bits(6, 1)
    }

    pub fn bo(self) -> u8 {
        self.bits(7, 1)
    }

    pub fn dlec(self) -> u8 {
        self.bits(8, 3)
    }

    pub fn resi(self) -> u8 {
        self.bits(11, 1)
    }

    pub fn rbrs(self) -> u8 {
        self.bits(12, 1)
    }

    pub fn rfdf(self) -> u8 {
        self.bits(13, 1)
    }

    pub fn pxe(self) -> u8 {
        self.bits(14, 1)
    }

    pub fn tdcv(self) -> u8 {
        self.bits(16, 7)
    }
}

// ============================================================================
// Record Conversion
// ============================================================================

/// Wall-clock time at which a frame arrived
pub fn arrival_time(frame: &CanFrame) -> DateTime<Local> {
    let now = Local::now();
    let age = frame
        .timestamp
        .map(|t| Instant::now().saturating_duration_since(t))
        .unwrap_or_default();
    match chrono::Duration::from_std(age) {
        Ok(age) => now - age,
        Err(_) => now,
    }
}

/// Fill a TIMESTAMP_TYPE embedded at `base`
pub fn write_timestamp(when: &DateTime<Local>, record: &mut [u8], base: usize) {
    let sub_second = when.nanosecond() % 1_000_000_000;
    timestamp::MDAY.at(base).put_u8(record, when.day() as u8);
    timestamp::HOUR.at(base).put_u8(record, when.hour() as u8);
    timestamp::MINUTE.at(base).put_u8(record, when.minute() as u8);
    timestamp::SECOND.at(base).put_u8(record, when.second() as u8);
    timestamp::MILLISECOND.at(base).put_u16(record, (sub_second / 1_000_000) as u16);
    timestamp::MICROSECOND.at(base).put_u16(record, (sub_second / 1_000 % 1_000) as u16);
}

/// Frame from one CANFD_OBJ record, or None if DataLen exceeds 8
pub fn frame_from_fd_obj(record: &[u8]) -> Option<CanFrame> {
    let kind = FrameType(canfd_obj::TYPE.get_u8(record));
    let len = canfd_obj::DATA_LEN.get_u8(record) as usize;
    if len > MAX_DATA_LEN {
        return None;
    }
    let mut frame = CanFrame::new(
        canfd_obj::ID.get_u32(record),
        kind.format() == 1,
        &canfd_obj::DATA.bytes(record)[..len],
    );
    frame.remote = kind.frame_type() == 1;
    Some(frame)
}

/// Fill one CANFD_OBJ record
pub fn frame_to_fd_obj(frame: &CanFrame, record: &mut [u8]) {
    record.fill(0);
    canfd_obj::TYPE.put_u8(record, FrameType::classic(frame.extended, frame.remote).0);
    canfd_obj::DATA_LEN.put_u8(record, frame.data_length);
    canfd_obj::ID.put_u32(record, frame.id);
    write_timestamp(&arrival_time(frame), record, canfd_obj::TIME_STAMP.offset);
    canfd_obj::DATA.put_bytes(record, frame.data());
}

/// Channel configuration from an INIT_CONFIG record. An out-of-range
/// NominalBitRateSelect keeps the device's previous bitrate.
pub fn config_from_fd_init(record: &[u8], previous: &ChannelConfig) -> ChannelConfig {
    let select = init_config::NOMINAL_BIT_RATE_SELECT.get_u8(record);
    let baud_rate = match BAUD_RATE.get(select as usize) {
        Some(&baud) => baud,
        None => {
            tlog!(
                "[abi] Unknown NominalBitRateSelect {}, keeping {} bps",
                select,
                previous.baud_rate
            );
            previous.baud_rate
        }
    };
    ChannelConfig {
        baud_rate,
        ..previous.clone()
    }
}

// ============================================================================
// Operations
// ============================================================================

fn with_device(reg: &DeviceRegistry, index: u32, op: impl FnOnce(&CanDevice) -> u32) -> u32 {
    match reg.get(index) {
        Ok(device) => op(&device),
        Err(e) => {
            tlog!("[abi] {}", e);
            ERR_DEVICENOTEXIST
        }
    }
}

/// An index that is already open reports ERR_DEVICEOPENED. Legacy builds
/// returned ERR_DEVICEOPEN for that case too, so callers that only test for
/// 0x200 will see a different code.
pub fn open_device(reg: &DeviceRegistry, index: u32) -> u32 {
    match reg.open(index) {
        Ok(_) => STATUS_OK,
        Err(CanError::DeviceAlreadyOpen(_)) => ERR_DEVICEOPENED,
        Err(e) => {
            tlog!("[abi] OpenDeviceFD {} failed: {}", index, e);
            ERR_DEVICEOPEN
        }
    }
}

pub fn close_device(reg: &DeviceRegistry, index: u32) -> u32 {
    if reg.close(index) {
        STATUS_OK
    } else {
        ERR_DEVICECLOSE
    }
}

pub fn init_can(reg: &DeviceRegistry, index: u32, channel: u8, init: &[u8]) -> u32 {
    with_device(reg, index, |device| {
        let config = config_from_fd_init(init, &device.config());
        match device.initialize(channel as u32, config) {
            Ok(()) => STATUS_OK,
            Err(e) => {
                tlog!("[abi] InitCANFD {} failed: {}", index, e);
                ERR_DEVICEOPEN
            }
        }
    })
}

pub fn start_can(reg: &DeviceRegistry, index: u32, channel: u8) -> u32 {
    with_device(reg, index, |device| match device.start(channel as u32) {
        Ok(()) => STATUS_OK,
        Err(e) => {
            tlog!("[abi] StartCANFD {} failed: {}", index, e);
            ERR_DEVICENOTOPEN
        }
    })
}

/// Stopping a device that is not open succeeds
pub fn stop_can(reg: &DeviceRegistry, index: u32, channel: u8) -> u32 {
    match reg.get(index) {
        Ok(device) => match device.clear_buffer(channel as u32) {
            Ok(()) => STATUS_OK,
            Err(_) => ERR_DEVICENOTOPEN,
        },
        Err(_) => STATUS_OK,
    }
}

pub fn reset_can(reg: &DeviceRegistry, index: u32, channel: u8) -> u32 {
    with_device(reg, index, |device| match device.reset(channel as u32) {
        Ok(()) => STATUS_OK,
        Err(_) => ERR_DEVICENOTOPEN,
    })
}

/// All `len` records must be sent for STATUS_OK. Records before one with
/// an invalid DataLen are still sent.
pub fn transmit(reg: &DeviceRegistry, index: u32, channel: u8, send: &[u8], len: usize) -> u32 {
    with_device(reg, index, |device| {
        let frames: Vec<CanFrame> = (0..len)
            .map_while(|i| frame_from_fd_obj(canfd_obj::LAYOUT.record(send, i)))
            .collect();
        let sent = device.transmit(channel as u32, &frames);
        if frames.len() < len {
            tlog!("[abi] TransmitFD {} record {} has DataLen above {}", index, frames.len(), MAX_DATA_LEN);
            ERR_DATA_LEN
        } else if sent == len || channel != 0 {
            STATUS_OK
        } else {
            tlog!("[abi] TransmitFD {} sent {} of {}", index, sent, len);
            ERR_USB_WRITE
        }
    })
}

/// Number of records ReceiveFD may fill for a caller-supplied length
pub fn receive_capacity(device: &CanDevice, channel: u8, len: u32) -> usize {
    if len == 0 {
        device.pending_count(channel as u32).min(DEFAULT_RECEIVE_BATCH)
    } else {
        len as usize
    }
}

/// Waits without limit for the first frame; `len` is updated to the count.
pub fn receive(reg: &DeviceRegistry, index: u32, channel: u8, out: &mut [u8], len: &mut u32) -> u32 {
    with_device(reg, index, |device| {
        let capacity = (out.len() / canfd_obj::LAYOUT.size).min(receive_capacity(device, channel, *len));
        let frames = device.receive(channel as u32, capacity, Timeout::Infinite);
        for (i, frame) in frames.iter().enumerate() {
            frame_to_fd_obj(frame, canfd_obj::LAYOUT.record_mut(out, i));
        }
        *len = frames.len() as u32;
        STATUS_OK
    })
}

pub fn get_reference(reg: &DeviceRegistry, index: u32, out: &mut [u8]) -> u32 {
    with_device(reg, index, |device| {
        write_board_info(device.board_info(), &board_info::FD_LAYOUT, out);
        STATUS_OK
    })
}

/// The adapter reports no bus status
pub fn bus_status(out: &mut [u8]) -> u32 {
    out[..canfd_status::LAYOUT.size].fill(0);
    STATUS_OK
}

// ============================================================================
// Exports
// ============================================================================

#[no_mangle]
pub extern "system" fn OpenDeviceFD(DeviceType: u32, DeviceInd: u32) -> u32 {
    guarded("OpenDeviceFD", ERR_DEVICEOPEN, || {
        tlog!("[abi] OpenDeviceFD DeviceType:{},DeviceInd:{}", DeviceType, DeviceInd);
        open_device(registry(), DeviceInd)
    })
}

#[no_mangle]
pub extern "system" fn CloseDeviceFD(DeviceType: u32, DeviceInd: u32) -> u32 {
    guarded("CloseDeviceFD", ERR_DEVICECLOSE, || {
        tlog!("[abi] CloseDeviceFD DeviceType:{},DeviceInd:{}", DeviceType, DeviceInd);
        close_device(registry(), DeviceInd)
    })
}

/// # Safety
/// `pInitConfig` must be null or point to an INIT_CONFIG.
#[no_mangle]
pub unsafe extern "system" fn InitCANFD(
    DeviceType: u32,
    DeviceInd: u32,
    CANInd: u8,
    pInitConfig: *const u8,
) -> u32 {
    guarded("InitCANFD", ERR_CAN_NOINIT, || {
        tlog!(
            "[abi] InitCANFD DeviceType:{},DeviceInd:{},CANInd:{}",
            DeviceType,
            DeviceInd,
            CANInd
        );
        match records(pInitConfig, &init_config::LAYOUT, 1) {
            Some(init) => init_can(registry(), DeviceInd, CANInd, init),
            None => ERR_CAN_NOINIT,
        }
    })
}

#[no_mangle]
pub extern "system" fn StartCANFD(DeviceType: u32, DeviceInd: u32, CANInd: u8) -> u32 {
    guarded("StartCANFD", ERR_DEVICENOTOPEN, || {
        tlog!(
            "[abi] StartCANFD DeviceType:{},DeviceInd:{},CANInd:{}",
            DeviceType,
            DeviceInd,
            CANInd
        );
        start_can(registry(), DeviceInd, CANInd)
    })
}

#[no_mangle]
pub extern "system" fn StopCANFD(DeviceType: u32, DeviceInd: u32, CANInd: u8) -> u32 {
    guarded("StopCANFD", ERR_DEVICENOTOPEN, || {
        tlog!(
            "[abi] StopCANFD DeviceType:{},DeviceInd:{},CANInd:{}",
            DeviceType,
            DeviceInd,
            CANInd
        );
        stop_can(registry(), DeviceInd, CANInd)
    })
}

#[no_mangle]
pub extern "system" fn ResetCANFD(DeviceType: u32, DeviceInd: u32, CANInd: u8) -> u32 {
    guarded("ResetCANFD", ERR_DEVICENOTOPEN, || {
        tlog!(
            "[abi] ResetCANFD DeviceType:{},DeviceInd:{},CANInd:{}",
            DeviceType,
            DeviceInd,
            CANInd
        );
        reset_can(registry(), DeviceInd, CANInd)
    })
}

/// # Safety
/// `pCanfdMQ` must be null or point to `Len` readable CANFD_OBJ records.
#[no_mangle]
pub unsafe extern "system" fn TransmitFD(
    DeviceType: u32,
    DeviceInd: u32,
    CANInd: u8,
    pCanfdMQ: *const u8,
    Len: u32,
) -> u32 {
    guarded("TransmitFD", ERR_USB_WRITE, || {
        tlog!(
            "[abi] TransmitFD DeviceType:{},DeviceInd:{},CANInd:{},Len:{}",
            DeviceType,
            DeviceInd,
            CANInd,
            Len
        );
        match records(pCanfdMQ, &canfd_obj::LAYOUT, Len as usize) {
            Some(send) => transmit(registry(), DeviceInd, CANInd, send, Len as usize),
            None => ERR_USB_WRITE,
        }
    })
}

/// # Safety
/// `Len` must be null or valid; `pCanfdMQ` must be null or hold enough
/// writable CANFD_OBJ records for `*Len` (or 100 when `*Len` is 0).
#[no_mangle]
pub unsafe extern "system" fn ReceiveFD(
    DeviceType: u32,
    DeviceInd: u32,
    CANInd: u8,
    pCanfdMQ: *mut u8,
    Len: *mut u32,
) -> u32 {
    guarded("ReceiveFD", ERR_DEVICENOTOPEN, || {
        let len = match Len.as_mut() {
            Some(len) => len,
            None => return ERR_DEVICENOTOPEN,
        };
        tlog!(
            "[abi] ReceiveFD DeviceType:{},DeviceInd:{},CANInd:{},Len:{}",
            DeviceType,
            DeviceInd,
            CANInd,
            *len
        );
        let slots = if *len == 0 { DEFAULT_RECEIVE_BATCH } else { *len as usize };
        match records_mut(pCanfdMQ, &canfd_obj::LAYOUT, slots) {
            Some(out) => receive(registry(), DeviceInd, CANInd, out, len),
            None => ERR_DEVICENOTOPEN,
        }
    })
}

/// Frames are received by the per-device reader; nothing to start here.
#[no_mangle]
pub extern "system" fn Receive_buffer_thread(DeviceType: u32, DeviceInd: u32, WaitTime: u32) -> u32 {
    guarded("Receive_buffer_thread", STATUS_OK, || {
        tlog!(
            "[abi] Receive_buffer_thread DeviceType:{},DeviceInd:{},WaitTime:{}",
            DeviceType,
            DeviceInd,
            WaitTime
        );
        STATUS_OK
    })
}

/// # Safety
/// `Len` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "system" fn GetErrFrame(
    DeviceType: u32,
    DeviceInd: u32,
    CANInd: u8,
    _pCanfdErrbuffer: *mut u8,
    Len: *mut u32,
) -> u32 {
    guarded("GetErrFrame", STATUS_OK, || {
        tlog!(
            "[abi] GetErrFrame DeviceType:{},DeviceInd:{},CANInd:{},ErrFrameSize:{}",
            DeviceType,
            DeviceInd,
            CANInd,
            err_frame::LAYOUT.size
        );
        if let Some(len) = Len.as_mut() {
            *len = 0;
        }
        STATUS_OK
    })
}

/// # Safety
/// `p_canfd_status` must be null or point to a writable CANFD_STATUS.
#[no_mangle]
pub unsafe extern "system" fn GetCanfdBusStatus(
    DeviceType: u32,
    DeviceInd: u32,
    p_canfd_status: *mut u8,
) -> u32 {
    guarded("GetCanfdBusStatus", STATUS_OK, || {
        tlog!("[abi] GetCanfdBusStatus DeviceType:{},DeviceInd:{}", DeviceType, DeviceInd);
        match records_mut(p_canfd_status, &canfd_status::LAYOUT, 1) {
            Some(out) => bus_status(out),
            None => STATUS_OK,
        }
    })
}

/// # Safety
/// `pInfo` must be null or point to a writable (packed) BOARD_INFO.
#[no_mangle]
pub unsafe extern "system" fn GetReference(
    DeviceType: u32,
    DeviceInd: u32,
    CANInd: u8,
    RefType: u32,
    pInfo: *mut u8,
) -> u32 {
    guarded("GetReference", ERR_DEVICENOTOPEN, || {
        tlog!(
            "[abi] GetReference DeviceType:{},DeviceInd:{},CANInd:{},RefType:{}",
            DeviceType,
            DeviceInd,
            CANInd,
            RefType
        );
        match records_mut(pInfo, &board_info::FD_LAYOUT, 1) {
            Some(out) => get_reference(registry(), DeviceInd, out),
            None => ERR_DEVICENOTOPEN,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::at::mock::MockConnector;
    use crate::io::at::AtCodec;
    use crate::io::codec::FrameCodec;
    use crate::settings::Settings;
    use chrono::TimeZone;
    use std::sync::Arc;
    use std::time::Duration;

    fn mock_registry() -> (Arc<MockConnector>, DeviceRegistry) {
        let connector = Arc::new(MockConnector::new());
        let settings = Settings {
            port_template: "mock{}".to_string(),
            reply_timeout_ms: 40,
            ..Settings::default()
        };
        (connector.clone(), DeviceRegistry::new(connector, Arc::new(settings)))
    }

    fn fd_init(select: u8) -> Vec<u8> {
        let mut record = vec![0u8; init_config::LAYOUT.size];
        init_config::NOMINAL_BIT_RATE_SELECT.put_u8(&mut record, select);
        record
    }

    fn fd_array(frames: &[CanFrame]) -> Vec<u8> {
        let mut array = vec![0u8; canfd_obj::LAYOUT.size * frames.len()];
        for (i, frame) in frames.iter().enumerate() {
            let record = canfd_obj::LAYOUT.record_mut(&mut array, i);
            canfd_obj::TYPE.put_u8(record, FrameType::classic(frame.extended, frame.remote).0);
            canfd_obj::DATA_LEN.put_u8(record, frame.data_length);
            canfd_obj::ID.put_u32(record, frame.id);
            canfd_obj::DATA.put_bytes(record, frame.data());
        }
        array
    }

    #[test]
    fn test_frame_type_bits() {
        let kind = FrameType(0b1011);
        assert_eq!(kind.proto(), 1);
        assert_eq!(kind.format(), 1);
        assert_eq!(kind.frame_type(), 0);
        assert_eq!(kind.bitratemode(), 1);
        assert_eq!(FrameType::classic(true, true).0, 0b0110);
        assert_eq!(FrameType::classic(false, false).0, 0);
    }

    #[test]
    fn test_register_accessors() {
        let ecr = Ecr(0x00AB_D234);
        assert_eq!(ecr.tec(), 0x34);
        assert_eq!(ecr.rec(), 0x52);
        assert_eq!(ecr.rp(), 1);
        assert_eq!(ecr.cel(), 0xAB);

        let psr = Psr(0x007F_7FFF);
        assert_eq!(psr.lec(), 7);
        assert_eq!(psr.act(), 3);
        assert_eq!(psr.ep(), 1);
        assert_eq!(psr.ew(), 1);
        assert_eq!(psr.bo(), 1);
        assert_eq!(psr.dlec(), 7);
        assert_eq!(psr.resi(), 1);
        assert_eq!(psr.rbrs(), 1);
        assert_eq!(psr.rfdf(), 1);
        assert_eq!(psr.pxe(), 1);
        assert_eq!(psr.tdcv(), 0x7F);
        assert_eq!(Psr(1 << 15).tdcv(), 0);
    }

    #[test]
    fn test_baud_rate_select() {
        let previous = ChannelConfig {
            baud_rate: 33_000,
            mode: 1,
            filters: Vec::new(),
        };
        assert_eq!(config_from_fd_init(&fd_init(0), &previous).baud_rate, 1_000_000);
        assert_eq!(config_from_fd_init(&fd_init(9), &previous).baud_rate, 62_500);
        assert_eq!(config_from_fd_init(&fd_init(15), &previous).baud_rate, 5_000);
        let unknown = config_from_fd_init(&fd_init(16), &previous);
        assert_eq!(unknown.baud_rate, 33_000);
        assert_eq!(unknown.mode, 1);
    }

    #[test]
    fn test_calendar_timestamp_fields() {
        let when = Local.with_ymd_and_hms(2024, 3, 17, 13, 45, 59).unwrap()
            + chrono::Duration::microseconds(123_456);
        let mut record = vec![0u8; canfd_obj::LAYOUT.size];
        write_timestamp(&when, &mut record, canfd_obj::TIME_STAMP.offset);

        assert_eq!(timestamp::MDAY.at(8).get_u8(&record), 17);
        assert_eq!(timestamp::HOUR.at(8).get_u8(&record), 13);
        assert_eq!(timestamp::MINUTE.at(8).get_u8(&record), 45);
        assert_eq!(timestamp::SECOND.at(8).get_u8(&record), 59);
        assert_eq!(timestamp::MILLISECOND.at(8).get_u16(&record), 123);
        assert_eq!(timestamp::MICROSECOND.at(8).get_u16(&record), 456);
    }

    #[test]
    fn test_arrival_time_is_in_the_past() {
        let mut frame = CanFrame::new(1, false, &[]);
        frame.timestamp = Some(Instant::now() - Duration::from_millis(200));
        let age = Local::now() - arrival_time(&frame);
        assert!(age >= chrono::Duration::milliseconds(200));
        assert!(age < chrono::Duration::seconds(5));
    }

    #[test]
    fn test_open_status_codes() {
        let (connector, reg) = mock_registry();
        assert_eq!(open_device(&reg, 0), STATUS_OK);
        assert_eq!(open_device(&reg, 0), ERR_DEVICEOPENED);
        connector.make_unavailable("mock1");
        assert_eq!(open_device(&reg, 1), ERR_DEVICEOPEN);

        assert_eq!(close_device(&reg, 0), STATUS_OK);
        assert_eq!(close_device(&reg, 0), ERR_DEVICECLOSE);
    }

    #[test]
    fn test_missing_device_codes() {
        let (_connector, reg) = mock_registry();
        assert_eq!(start_can(&reg, 4, 0), ERR_DEVICENOTEXIST);
        assert_eq!(reset_can(&reg, 4, 0), ERR_DEVICENOTEXIST);
        assert_eq!(stop_can(&reg, 4, 0), STATUS_OK);
        assert_eq!(init_can(&reg, 4, 0, &fd_init(0)), ERR_DEVICENOTEXIST);
        let mut len = 1;
        let mut out = vec![0u8; canfd_obj::LAYOUT.size];
        assert_eq!(receive(&reg, 4, 0, &mut out, &mut len), ERR_DEVICENOTEXIST);
    }

    #[test]
    fn test_fd_loopback() {
        let (connector, reg) = mock_registry();
        assert_eq!(open_device(&reg, 2), STATUS_OK);
        // Loopback is a classic-only mode; set it through the device first
        reg.get(2)
            .unwrap()
            .initialize(
                0,
                ChannelConfig {
                    mode: 1,
                    ..ChannelConfig::default()
                },
            )
            .unwrap();
        assert_eq!(init_can(&reg, 2, 0, &fd_init(2)), STATUS_OK);
        assert!(connector.adapter("mock2").is_loopback());
        assert_eq!(reg.get(2).unwrap().config().baud_rate, 500_000);
        assert_eq!(start_can(&reg, 2, 0), STATUS_OK);

        let sent = [
            CanFrame::new(0x7FF, false, &[1, 2, 3, 4, 5, 6, 7, 8]),
            CanFrame::remote(0x1000, true),
        ];
        assert_eq!(transmit(&reg, 2, 0, &fd_array(&sent), sent.len()), STATUS_OK);

        let mut out = vec![0u8; canfd_obj::LAYOUT.size * 4];
        let mut got = Vec::new();
        while got.len() < 2 {
            let mut len = 4;
            assert_eq!(receive(&reg, 2, 0, &mut out, &mut len), STATUS_OK);
            for i in 0..len as usize {
                let record = canfd_obj::LAYOUT.record(&out, i);
                assert_eq!(FrameType(canfd_obj::TYPE.get_u8(record)).proto(), 0);
                got.push(frame_from_fd_obj(record).unwrap());
            }
        }
        assert_eq!(got, sent.to_vec());
        assert_eq!(close_device(&reg, 2), STATUS_OK);
    }

    #[test]
    fn test_zero_length_receive_uses_pending() {
        let (connector, reg) = mock_registry();
        open_device(&reg, 3);
        start_can(&reg, 3, 0);
        let device = reg.get(3).unwrap();
        assert_eq!(receive_capacity(&device, 0, 0), 0);

        let adapter = connector.adapter("mock3");
        for id in 0..3 {
            adapter.inject_frame(&CanFrame::new(id, false, &[id as u8]));
        }
        let deadline = Instant::now() + Duration::from_secs(2);
        while device.pending_count(0) < 3 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(receive_capacity(&device, 0, 0), 3);
        assert_eq!(receive_capacity(&device, 0, 7), 7);

        let mut out = vec![0u8; canfd_obj::LAYOUT.size * DEFAULT_RECEIVE_BATCH];
        let mut len = 0;
        assert_eq!(receive(&reg, 3, 0, &mut out, &mut len), STATUS_OK);
        assert_eq!(len, 3);
        close_device(&reg, 3);
    }

    #[test]
    fn test_partial_transmit_is_write_error() {
        let (connector, reg) = mock_registry();
        open_device(&reg, 5);
        connector.adapter("mock5").fail_after_frames(1);
        let frames = [CanFrame::new(1, false, &[1]), CanFrame::new(2, false, &[2])];
        assert_eq!(transmit(&reg, 5, 0, &fd_array(&frames), 2), ERR_USB_WRITE);
    }

    #[test]
    fn test_oversized_data_len_is_refused() {
        let (connector, reg) = mock_registry();
        open_device(&reg, 7);
        let adapter = connector.adapter("mock7");
        let before = adapter.written().len();

        let frames = [
            CanFrame::new(0x21, false, &[1, 2, 3, 4, 5, 6, 7, 8]),
            CanFrame::new(0x22, false, &[1, 2, 3, 4, 5, 6, 7, 8]),
        ];
        let mut array = fd_array(&frames);
        let second = canfd_obj::LAYOUT.record_mut(&mut array, 1);
        canfd_obj::DATA_LEN.put_u8(second, 12);
        canfd_obj::DATA.put_bytes(second, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);

        assert!(frame_from_fd_obj(canfd_obj::LAYOUT.record(&array, 1)).is_none());
        assert_eq!(transmit(&reg, 7, 0, &array, 2), ERR_DATA_LEN);
        assert_eq!(adapter.written()[before..], AtCodec::encode(&frames[0]).unwrap()[..]);
        close_device(&reg, 7);
    }

    #[test]
    fn test_reference_and_status_records() {
        let (_connector, reg) = mock_registry();
        open_device(&reg, 6);
        let mut info = vec![0xFFu8; board_info::FD_LAYOUT.size];
        assert_eq!(get_reference(&reg, 6, &mut info), STATUS_OK);
        assert_eq!(board_info::HW_VERSION.get_u16(&info), 5);
        assert_eq!(&board_info::HW_TYPE.bytes(&info)[..12], b"Serial_mock6");
        assert_eq!(board_info::RESERVED_PACKED.bytes(&info), &[0; 8]);

        let mut status = vec![0xFFu8; canfd_status::LAYOUT.size];
        assert_eq!(bus_status(&mut status), STATUS_OK);
        assert!(status.iter().all(|&b| b == 0));
    }
}
