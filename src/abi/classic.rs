// src/abi/classic.rs
//
// ControlCAN (VCI_*) exports.
//
// Status: 1 = ok, 0 = error. Frame counts are returned directly by
// VCI_Transmit / VCI_Receive / VCI_GetReceiveNum. Receive timestamps count
// 100 us ticks since the device was opened.

#![allow(non_snake_case)]

use std::time::Instant;

use super::layout::{board_info, vci_can_obj, vci_err_info, vci_can_status, vci_init_config, Layout};
use super::{guarded, records, records_mut, registry};
use crate::device::{CanDevice, DeviceRegistry};
use crate::io::types::MAX_DATA_LEN;
use crate::io::{BoardInfo, CanFrame, ChannelConfig, Timeout};

pub const STATUS_OK: u32 = 1;
pub const STATUS_ERR: u32 = 0;

/// `(Timing0 << 8) | Timing1` -> CAN bitrate
pub const TIMINGS: [(u16, u32); 15] = [
    (0xBFFF, 5_000),
    (0x311C, 10_000),
    (0x181C, 20_000),
    (0x87FF, 40_000),
    (0x091C, 50_000),
    (0x83FF, 80_000),
    (0x041C, 100_000),
    (0x031C, 125_000),
    (0x81FA, 200_000),
    (0x011C, 250_000),
    (0x80FA, 400_000),
    (0x001C, 500_000),
    (0x80B6, 666_000),
    (0x0016, 800_000),
    (0x0014, 1_000_000),
];

pub fn baud_from_timing(timing0: u8, timing1: u8) -> Option<u32> {
    let key = ((timing0 as u16) << 8) | timing1 as u16;
    TIMINGS.iter().find(|(k, _)| *k == key).map(|&(_, baud)| baud)
}

fn status(ok: bool) -> u32 {
    if ok {
        STATUS_OK
    } else {
        STATUS_ERR
    }
}

// ============================================================================
// Record Conversion
// ============================================================================

/// Frame from one VCI_CAN_OBJ record, or None if DataLen exceeds 8
pub fn frame_from_obj(record: &[u8]) -> Option<CanFrame> {
    let len = vci_can_obj::DATA_LEN.get_u8(record) as usize;
    if len > MAX_DATA_LEN {
        return None;
    }
    let mut frame = CanFrame::new(
        vci_can_obj::ID.get_u32(record),
        vci_can_obj::EXTERN_FLAG.get_u8(record) != 0,
        &vci_can_obj::DATA.bytes(record)[..len],
    );
    frame.remote = vci_can_obj::REMOTE_FLAG.get_u8(record) != 0;
    Some(frame)
}

/// Elapsed time from `opened_at` to the frame's arrival, in 100 us ticks
pub fn ticks_since(opened_at: Instant, frame: &CanFrame) -> u32 {
    frame
        .timestamp
        .map(|t| (t.saturating_duration_since(opened_at).as_micros() / 100) as u32)
        .unwrap_or(0)
}

/// Fill one VCI_CAN_OBJ record
pub fn frame_to_obj(frame: &CanFrame, opened_at: Instant, record: &mut [u8]) {
    record.fill(0);
    vci_can_obj::ID.put_u32(record, frame.id);
    vci_can_obj::TIME_STAMP.put_u32(record, ticks_since(opened_at, frame));
    vci_can_obj::TIME_FLAG.put_u8(record, 1);
    vci_can_obj::REMOTE_FLAG.put_u8(record, frame.remote as u8);
    vci_can_obj::EXTERN_FLAG.put_u8(record, frame.extended as u8);
    vci_can_obj::DATA_LEN.put_u8(record, frame.data_length);
    vci_can_obj::DATA.put_bytes(record, &frame.payload);
}

/// Channel configuration from a VCI_INIT_CONFIG record. An unknown timing
/// pair keeps the device's previous bitrate.
pub fn config_from_init(record: &[u8], previous: &ChannelConfig) -> ChannelConfig {
    let timing0 = vci_init_config::TIMING0.get_u8(record);
    let timing1 = vci_init_config::TIMING1.get_u8(record);
    let baud_rate = match baud_from_timing(timing0, timing1) {
        Some(baud) => baud,
        None => {
            tlog!(
                "[abi] Unknown timing {:02X}{:02X}, keeping {} bps",
                timing0,
                timing1,
                previous.baud_rate
            );
            previous.baud_rate
        }
    };
    ChannelConfig {
        baud_rate,
        mode: vci_init_config::MODE.get_u8(record),
        filters: previous.filters.clone(),
    }
}

/// Fill a board info record (VCI_BOARD_INFO or the packed CAN-FD variant)
pub fn write_board_info(info: &BoardInfo, layout: &Layout, record: &mut [u8]) {
    record[..layout.size].fill(0);
    board_info::HW_VERSION.put_u16(record, info.hw_version);
    board_info::FW_VERSION.put_u16(record, info.fw_version);
    board_info::DR_VERSION.put_u16(record, info.dr_version);
    board_info::IN_VERSION.put_u16(record, info.in_version);
    board_info::IRQ_NUM.put_u16(record, info.irq_num);
    board_info::CAN_NUM.put_u8(record, info.can_num);
    board_info::SERIAL_NUM.put_c_str(record, &info.serial_num);
    board_info::HW_TYPE.put_c_str(record, &info.hw_type);
}

// ============================================================================
// Operations
// ============================================================================

fn with_device(reg: &DeviceRegistry, index: u32, op: impl FnOnce(&CanDevice) -> u32) -> u32 {
    match reg.get(index) {
        Ok(device) => op(&device),
        Err(e) => {
            tlog!("[abi] {}", e);
            STATUS_ERR
        }
    }
}

pub fn open_device(reg: &DeviceRegistry, index: u32) -> u32 {
    match reg.open(index) {
        Ok(_) => STATUS_OK,
        Err(e) => {
            tlog!("[abi] Open {} failed: {}", index, e);
            STATUS_ERR
        }
    }
}

/// Closing a device that is not open still succeeds
pub fn close_device(reg: &DeviceRegistry, index: u32) -> u32 {
    reg.close(index);
    STATUS_OK
}

pub fn init_can(reg: &DeviceRegistry, index: u32, channel: u32, init: &[u8]) -> u32 {
    with_device(reg, index, |device| {
        let config = config_from_init(init, &device.config());
        match device.initialize(channel, config) {
            Ok(()) => STATUS_OK,
            Err(e) => {
                tlog!("[abi] InitCAN {} failed: {}", index, e);
                STATUS_ERR
            }
        }
    })
}

pub fn read_board_info(reg: &DeviceRegistry, index: u32, out: &mut [u8]) -> u32 {
    with_device(reg, index, |device| {
        write_board_info(device.board_info(), &board_info::VCI_LAYOUT, out);
        STATUS_OK
    })
}

/// The adapter reports no error state
pub fn read_err_info(out: &mut [u8]) -> u32 {
    out[..vci_err_info::LAYOUT.size].fill(0);
    STATUS_OK
}

/// The adapter reports no controller registers
pub fn read_can_status(out: &mut [u8]) -> u32 {
    out[..vci_can_status::LAYOUT.size].fill(0);
    STATUS_OK
}

pub fn get_reference(reg: &DeviceRegistry, index: u32, channel: u32, ref_type: u32) -> u32 {
    with_device(reg, index, |device| status(device.get_reference(channel, ref_type).is_ok()))
}

pub fn set_reference(reg: &DeviceRegistry, index: u32, channel: u32, ref_type: u32) -> u32 {
    with_device(reg, index, |device| status(device.set_reference(channel, ref_type).is_ok()))
}

pub fn get_receive_num(reg: &DeviceRegistry, index: u32, channel: u32) -> u32 {
    with_device(reg, index, |device| device.pending_count(channel) as u32)
}

pub fn clear_buffer(reg: &DeviceRegistry, index: u32, channel: u32) -> u32 {
    with_device(reg, index, |device| status(device.clear_buffer(channel).is_ok()))
}

pub fn start_can(reg: &DeviceRegistry, index: u32, channel: u32) -> u32 {
    with_device(reg, index, |device| match device.start(channel) {
        Ok(()) => STATUS_OK,
        Err(e) => {
            tlog!("[abi] StartCAN {} failed: {}", index, e);
            STATUS_ERR
        }
    })
}

pub fn reset_can(reg: &DeviceRegistry, index: u32, channel: u32) -> u32 {
    with_device(reg, index, |device| status(device.reset(channel).is_ok()))
}

/// Returns the number of records sent. Sending stops at the first record
/// with an invalid DataLen.
pub fn transmit(reg: &DeviceRegistry, index: u32, channel: u32, send: &[u8], len: usize) -> u32 {
    with_device(reg, index, |device| {
        let frames: Vec<CanFrame> = (0..len)
            .map_while(|i| frame_from_obj(vci_can_obj::LAYOUT.record(send, i)))
            .collect();
        if frames.len() < len {
            tlog!("[abi] VCI_Transmit record {} has DataLen above {}", frames.len(), MAX_DATA_LEN);
        }
        device.transmit(channel, &frames) as u32
    })
}

/// Returns the number of records filled
pub fn receive(
    reg: &DeviceRegistry,
    index: u32,
    channel: u32,
    out: &mut [u8],
    len: usize,
    wait_time: i32,
) -> u32 {
    with_device(reg, index, |device| {
        let frames = device.receive(channel, len, Timeout::from_wait_time(wait_time));
        for (i, frame) in frames.iter().enumerate() {
            frame_to_obj(frame, device.opened_at(), vci_can_obj::LAYOUT.record_mut(out, i));
        }
        frames.len() as u32
    })
}

// ============================================================================
// Exports
// ============================================================================

#[no_mangle]
pub extern "system" fn VCI_OpenDevice(DeviceType: u32, DeviceInd: u32, _Reserved: u32) -> u32 {
    guarded("VCI_OpenDevice", STATUS_ERR, || {
        tlog!("[abi] VCI_OpenDevice DeviceType:{},DeviceInd:{}", DeviceType, DeviceInd);
        open_device(registry(), DeviceInd)
    })
}

#[no_mangle]
pub extern "system" fn VCI_CloseDevice(DeviceType: u32, DeviceInd: u32) -> u32 {
    guarded("VCI_CloseDevice", STATUS_ERR, || {
        tlog!("[abi] VCI_CloseDevice DeviceType:{},DeviceInd:{}", DeviceType, DeviceInd);
        close_device(registry(), DeviceInd)
    })
}

/// # Safety
/// `pInitConfig` must be null or point to a VCI_INIT_CONFIG.
#[no_mangle]
pub unsafe extern "system" fn VCI_InitCAN(
    DeviceType: u32,
    DeviceInd: u32,
    CANInd: u32,
    pInitConfig: *const u8,
) -> u32 {
    guarded("VCI_InitCAN", STATUS_ERR, || {
        tlog!(
            "[abi] VCI_InitCAN DeviceType:{},DeviceInd:{},CANInd:{}",
            DeviceType,
            DeviceInd,
            CANInd
        );
        match records(pInitConfig, &vci_init_config::LAYOUT, 1) {
            Some(init) => init_can(registry(), DeviceInd, CANInd, init),
            None => STATUS_ERR,
        }
    })
}

/// # Safety
/// `pInfo` must be null or point to a writable VCI_BOARD_INFO.
#[no_mangle]
pub unsafe extern "system" fn VCI_ReadBoardInfo(DeviceType: u32, DeviceInd: u32, pInfo: *mut u8) -> u32 {
    guarded("VCI_ReadBoardInfo", STATUS_ERR, || {
        tlog!("[abi] VCI_ReadBoardInfo DeviceType:{},DeviceInd:{}", DeviceType, DeviceInd);
        match records_mut(pInfo, &board_info::VCI_LAYOUT, 1) {
            Some(out) => read_board_info(registry(), DeviceInd, out),
            None => STATUS_ERR,
        }
    })
}

/// # Safety
/// `pErrInfo` must be null or point to a writable VCI_ERR_INFO.
#[no_mangle]
pub unsafe extern "system" fn VCI_ReadErrInfo(
    DeviceType: u32,
    DeviceInd: u32,
    CANInd: u32,
    pErrInfo: *mut u8,
) -> u32 {
    guarded("VCI_ReadErrInfo", STATUS_ERR, || {
        tlog!(
            "[abi] VCI_ReadErrInfo DeviceType:{},DeviceInd:{},CANInd:{}",
            DeviceType,
            DeviceInd,
            CANInd
        );
        match records_mut(pErrInfo, &vci_err_info::LAYOUT, 1) {
            Some(out) => read_err_info(out),
            None => STATUS_ERR,
        }
    })
}

/// # Safety
/// `pCANStatus` must be null or point to a writable VCI_CAN_STATUS.
#[no_mangle]
pub unsafe extern "system" fn VCI_ReadCANStatus(
    DeviceType: u32,
    DeviceInd: u32,
    CANInd: u32,
    pCANStatus: *mut u8,
) -> u32 {
    guarded("VCI_ReadCANStatus", STATUS_ERR, || {
        tlog!(
            "[abi] VCI_ReadCANStatus DeviceType:{},DeviceInd:{},CANInd:{}",
            DeviceType,
            DeviceInd,
            CANInd
        );
        match records_mut(pCANStatus, &vci_can_status::LAYOUT, 1) {
            Some(out) => read_can_status(out),
            None => STATUS_ERR,
        }
    })
}

#[no_mangle]
pub extern "system" fn VCI_GetReference(
    DeviceType: u32,
    DeviceInd: u32,
    CANInd: u32,
    RefType: u32,
    _pData: *mut u8,
) -> u32 {
    guarded("VCI_GetReference", STATUS_ERR, || {
        tlog!(
            "[abi] VCI_GetReference DeviceType:{},DeviceInd:{},CANInd:{},RefType:{}",
            DeviceType,
            DeviceInd,
            CANInd,
            RefType
        );
        get_reference(registry(), DeviceInd, CANInd, RefType)
    })
}

#[no_mangle]
pub extern "system" fn VCI_SetReference(
    DeviceType: u32,
    DeviceInd: u32,
    CANInd: u32,
    RefType: u32,
    _pData: *mut u8,
) -> u32 {
    guarded("VCI_SetReference", STATUS_ERR, || {
        tlog!(
            "[abi] VCI_SetReference DeviceType:{},DeviceInd:{},CANInd:{},RefType:{}",
            DeviceType,
            DeviceInd,
            CANInd,
            RefType
        );
        set_reference(registry(), DeviceInd, CANInd, RefType)
    })
}

#[no_mangle]
pub extern "system" fn VCI_GetReceiveNum(DeviceType: u32, DeviceInd: u32, CANInd: u32) -> u32 {
    guarded("VCI_GetReceiveNum", STATUS_ERR, || {
        tlog!(
            "[abi] VCI_GetReceiveNum DeviceType:{},DeviceInd:{},CANInd:{}",
            DeviceType,
            DeviceInd,
            CANInd
        );
        get_receive_num(registry(), DeviceInd, CANInd)
    })
}

#[no_mangle]
pub extern "system" fn VCI_ClearBuffer(DeviceType: u32, DeviceInd: u32, CANInd: u32) -> u32 {
    guarded("VCI_ClearBuffer", STATUS_ERR, || {
        tlog!(
            "[abi] VCI_ClearBuffer DeviceType:{},DeviceInd:{},CANInd:{}",
            DeviceType,
            DeviceInd,
            CANInd
        );
        clear_buffer(registry(), DeviceInd, CANInd)
    })
}

#[no_mangle]
pub extern "system" fn VCI_StartCAN(DeviceType: u32, DeviceInd: u32, CANInd: u32) -> u32 {
    guarded("VCI_StartCAN", STATUS_ERR, || {
        tlog!(
            "[abi] VCI_StartCAN DeviceType:{},DeviceInd:{},CANInd:{}",
            DeviceType,
            DeviceInd,
            CANInd
        );
        start_can(registry(), DeviceInd, CANInd)
    })
}

#[no_mangle]
pub extern "system" fn VCI_ResetCAN(DeviceType: u32, DeviceInd: u32, CANInd: u32) -> u32 {
    guarded("VCI_ResetCAN", STATUS_ERR, || {
        tlog!(
            "[abi] VCI_ResetCAN DeviceType:{},DeviceInd:{},CANInd:{}",
            DeviceType,
            DeviceInd,
            CANInd
        );
        reset_can(registry(), DeviceInd, CANInd)
    })
}

/// # Safety
/// `pSend` must be null or point to `Len` readable VCI_CAN_OBJ records.
#[no_mangle]
pub unsafe extern "system" fn VCI_Transmit(
    DeviceType: u32,
    DeviceInd: u32,
    CANInd: u32,
    pSend: *const u8,
    Len: u32,
) -> u32 {
    guarded("VCI_Transmit", STATUS_ERR, || {
        tlog!(
            "[abi] VCI_Transmit DeviceType:{},DeviceInd:{},CANInd:{},Len:{}",
            DeviceType,
            DeviceInd,
            CANInd,
            Len
        );
        match records(pSend, &vci_can_obj::LAYOUT, Len as usize) {
            Some(send) => transmit(registry(), DeviceInd, CANInd, send, Len as usize),
            None => STATUS_ERR,
        }
    })
}

/// # Safety
/// `pReceive` must be null or point to `Len` writable VCI_CAN_OBJ records.
#[no_mangle]
pub unsafe extern "system" fn VCI_Receive(
    DeviceType: u32,
    DeviceInd: u32,
    CANInd: u32,
    pReceive: *mut u8,
    Len: u32,
    WaitTime: i32,
) -> u32 {
    guarded("VCI_Receive", STATUS_ERR, || {
        tlog!(
            "[abi] VCI_Receive DeviceType:{},DeviceInd:{},CANInd:{},Len:{},WaitTime:{}",
            DeviceType,
            DeviceInd,
            CANInd,
            Len,
            WaitTime
        );
        match records_mut(pReceive, &vci_can_obj::LAYOUT, Len as usize) {
            Some(out) => receive(registry(), DeviceInd, CANInd, out, Len as usize, WaitTime),
            None => STATUS_ERR,
        }
    })
}
