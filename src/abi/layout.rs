// src/abi/layout.rs
//
// Byte layouts of the vendor structs crossing the exported ABI.
//
// Structs are described as tables of (name, offset, size) and read or written
// field by field in native byte order. Exported functions see every struct as
// a plain byte region of `Layout::size` bytes, so nothing depends on Rust's
// own struct layout. The tests check every table against a C-layout mirror.

/// One field inside a vendor struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub offset: usize,
    pub size: usize,
}

impl Field {
    pub const fn new(name: &'static str, offset: usize, size: usize) -> Self {
        Self { name, offset, size }
    }

    /// Same field inside a struct embedded at `base`
    pub const fn at(self, base: usize) -> Self {
        Self {
            name: self.name,
            offset: base + self.offset,
            size: self.size,
        }
    }

    pub const fn end(&self) -> usize {
        self.offset + self.size
    }

    pub fn bytes<'a>(&self, record: &'a [u8]) -> &'a [u8] {
        &record[self.offset..self.end()]
    }

    pub fn bytes_mut<'a>(&self, record: &'a mut [u8]) -> &'a mut [u8] {
        &mut record[self.offset..self.end()]
    }

    pub fn get_u8(&self, record: &[u8]) -> u8 {
        record[self.offset]
    }

    pub fn put_u8(&self, record: &mut [u8], value: u8) {
        record[self.offset] = value;
    }

    pub fn get_u16(&self, record: &[u8]) -> u16 {
        let mut raw = [0u8; 2];
        raw.copy_from_slice(&record[self.offset..self.offset + 2]);
        u16::from_ne_bytes(raw)
    }

    pub fn put_u16(&self, record: &mut [u8], value: u16) {
        record[self.offset..self.offset + 2].copy_from_slice(&value.to_ne_bytes());
    }

    pub fn get_u32(&self, record: &[u8]) -> u32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&record[self.offset..self.offset + 4]);
        u32::from_ne_bytes(raw)
    }

    pub fn put_u32(&self, record: &mut [u8], value: u32) {
        record[self.offset..self.offset + 4].copy_from_slice(&value.to_ne_bytes());
    }

    /// Copy `src` into the field, truncating to fit and zero-filling the rest
    pub fn put_bytes(&self, record: &mut [u8], src: &[u8]) {
        let dst = self.bytes_mut(record);
        let n = src.len().min(dst.len());
        dst[..n].copy_from_slice(&src[..n]);
        dst[n..].fill(0);
    }

    /// Copy a C string into the field, always leaving room for the NUL
    pub fn put_c_str(&self, record: &mut [u8], src: &str) {
        let bytes = src.as_bytes();
        self.put_bytes(record, &bytes[..bytes.len().min(self.size.saturating_sub(1))]);
    }
}

/// A vendor struct: total size plus its fields in declaration order.
#[derive(Debug)]
pub struct Layout {
    pub name: &'static str,
    pub size: usize,
    pub fields: &'static [Field],
}

impl Layout {
    /// Record `index` of an array of these structs
    pub fn record<'a>(&self, array: &'a [u8], index: usize) -> &'a [u8] {
        &array[index * self.size..(index + 1) * self.size]
    }

    pub fn record_mut<'a>(&self, array: &'a mut [u8], index: usize) -> &'a mut [u8] {
        &mut array[index * self.size..(index + 1) * self.size]
    }
}

// ============================================================================
// ControlCAN (classic)
// ============================================================================

pub mod vci_can_obj {
    use super::{Field, Layout};

    pub const ID: Field = Field::new("ID", 0, 4);
    pub const TIME_STAMP: Field = Field::new("TimeStamp", 4, 4);
    pub const TIME_FLAG: Field = Field::new("TimeFlag", 8, 1);
    pub const SEND_TYPE: Field = Field::new("SendType", 9, 1);
    pub const REMOTE_FLAG: Field = Field::new("RemoteFlag", 10, 1);
    pub const EXTERN_FLAG: Field = Field::new("ExternFlag", 11, 1);
    pub const DATA_LEN: Field = Field::new("DataLen", 12, 1);
    pub const DATA: Field = Field::new("Data", 13, 8);
    pub const RESERVED: Field = Field::new("Reserved", 21, 3);

    pub const LAYOUT: Layout = Layout {
        name: "VCI_CAN_OBJ",
        size: 24,
        fields: &[
            ID, TIME_STAMP, TIME_FLAG, SEND_TYPE, REMOTE_FLAG, EXTERN_FLAG, DATA_LEN, DATA,
            RESERVED,
        ],
    };
}

pub mod vci_init_config {
    use super::{Field, Layout};

    pub const ACC_CODE: Field = Field::new("AccCode", 0, 4);
    pub const ACC_MASK: Field = Field::new("AccMask", 4, 4);
    pub const RESERVED: Field = Field::new("Reserved", 8, 4);
    pub const FILTER: Field = Field::new("Filter", 12, 1);
    pub const TIMING0: Field = Field::new("Timing0", 13, 1);
    pub const TIMING1: Field = Field::new("Timing1", 14, 1);
    pub const MODE: Field = Field::new("Mode", 15, 1);

    pub const LAYOUT: Layout = Layout {
        name: "VCI_INIT_CONFIG",
        size: 16,
        fields: &[ACC_CODE, ACC_MASK, RESERVED, FILTER, TIMING0, TIMING1, MODE],
    };
}

/// Shared by VCI_BOARD_INFO and the packed CAN-FD BOARD_INFO: the two only
/// differ in the padding byte before `Reserved`.
pub mod board_info {
    use super::{Field, Layout};

    pub const HW_VERSION: Field = Field::new("hw_Version", 0, 2);
    pub const FW_VERSION: Field = Field::new("fw_Version", 2, 2);
    pub const DR_VERSION: Field = Field::new("dr_Version", 4, 2);
    pub const IN_VERSION: Field = Field::new("in_Version", 6, 2);
    pub const IRQ_NUM: Field = Field::new("irq_Num", 8, 2);
    pub const CAN_NUM: Field = Field::new("can_Num", 10, 1);
    pub const SERIAL_NUM: Field = Field::new("str_Serial_Num", 11, 20);
    pub const HW_TYPE: Field = Field::new("str_hw_Type", 31, 40);

    pub const RESERVED_ALIGNED: Field = Field::new("Reserved", 72, 8);
    pub const RESERVED_PACKED: Field = Field::new("Reserved", 71, 8);

    /// ControlCAN VCI_BOARD_INFO (natural alignment)
    pub const VCI_LAYOUT: Layout = Layout {
        name: "VCI_BOARD_INFO",
        size: 80,
        fields: &[
            HW_VERSION, FW_VERSION, DR_VERSION, IN_VERSION, IRQ_NUM, CAN_NUM, SERIAL_NUM, HW_TYPE,
            RESERVED_ALIGNED,
        ],
    };

    /// ECanFDVci BOARD_INFO (packed)
    pub const FD_LAYOUT: Layout = Layout {
        name: "BOARD_INFO",
        size: 79,
        fields: &[
            HW_VERSION, FW_VERSION, DR_VERSION, IN_VERSION, IRQ_NUM, CAN_NUM, SERIAL_NUM, HW_TYPE,
            RESERVED_PACKED,
        ],
    };
}

pub mod vci_err_info {
    use super::{Field, Layout};

    pub const ERR_CODE: Field = Field::new("ErrCode", 0, 4);
    pub const PASSIVE_ERR_DATA: Field = Field::new("Passive_ErrData", 4, 3);
    pub const AR_LOST_ERR_DATA: Field = Field::new("ArLost_ErrData", 7, 1);

    pub const LAYOUT: Layout = Layout {
        name: "VCI_ERR_INFO",
        size: 8,
        fields: &[ERR_CODE, PASSIVE_ERR_DATA, AR_LOST_ERR_DATA],
    };
}

pub mod vci_can_status {
    use super::{Field, Layout};

    pub const LAYOUT: Layout = Layout {
        name: "VCI_CAN_STATUS",
        size: 12,
        fields: &[
            Field::new("ErrInterrupt", 0, 1),
            Field::new("regMode", 1, 1),
            Field::new("regStatus", 2, 1),
            Field::new("regALCapture", 3, 1),
            Field::new("regECCapture", 4, 1),
            Field::new("regEWLimit", 5, 1),
            Field::new("regRECounter", 6, 1),
            Field::new("regTECounter", 7, 1),
            Field::new("Reserved", 8, 4),
        ],
    };
}

// ============================================================================
// ECanFDVci (CAN-FD)
// ============================================================================

/// TIMESTAMP_TYPE, embedded in several CAN-FD structs
pub mod timestamp {
    use super::{Field, Layout};

    pub const MDAY: Field = Field::new("mday", 0, 1);
    pub const HOUR: Field = Field::new("hour", 1, 1);
    pub const MINUTE: Field = Field::new("minute", 2, 1);
    pub const SECOND: Field = Field::new("second", 3, 1);
    pub const MILLISECOND: Field = Field::new("millisecond", 4, 2);
    pub const MICROSECOND: Field = Field::new("microsecond", 6, 2);

    pub const SIZE: usize = 8;

    pub const LAYOUT: Layout = Layout {
        name: "TIMESTAMP_TYPE",
        size: SIZE,
        fields: &[MDAY, HOUR, MINUTE, SECOND, MILLISECOND, MICROSECOND],
    };
}

pub mod canfd_obj {
    use super::{Field, Layout};

    pub const TYPE: Field = Field::new("CanORCanfdType", 0, 1);
    pub const DATA_LEN: Field = Field::new("DataLen", 1, 1);
    pub const RESERVED: Field = Field::new("Reserved", 2, 2);
    pub const ID: Field = Field::new("ID", 4, 4);
    pub const TIME_STAMP: Field = Field::new("TimeStamp", 8, super::timestamp::SIZE);
    pub const DATA: Field = Field::new("Data", 16, 64);

    pub const LAYOUT: Layout = Layout {
        name: "CANFD_OBJ",
        size: 80,
        fields: &[TYPE, DATA_LEN, RESERVED, ID, TIME_STAMP, DATA],
    };
}

pub mod init_config {
    use super::{Field, Layout};

    pub const CAN_RECE_MODE: Field = Field::new("CanReceMode", 0, 1);
    pub const CAN_SEND_MODE: Field = Field::new("CanSendMode", 1, 1);
    pub const NOMINAL_BIT_RATE: Field = Field::new("NominalBitRate", 4, 4);
    pub const DATA_BIT_RATE: Field = Field::new("DataBitRate", 8, 4);
    pub const FILTER_USED_BITS: Field = Field::new("FilterUsedBits", 12, 1);
    pub const STD_OR_EXD_BITS: Field = Field::new("StdOrExdBits", 13, 1);
    pub const NOMINAL_BIT_RATE_SELECT: Field = Field::new("NominalBitRateSelect", 14, 1);
    pub const DATA_BIT_RATE_SELECT: Field = Field::new("DataBitRateSelect", 15, 1);
    /// Eight (filter, mask) u32 pairs
    pub const FILTERS: Field = Field::new("StandardORExtendedfilter", 16, 64);

    pub const LAYOUT: Layout = Layout {
        name: "INIT_CONFIG",
        size: 80,
        fields: &[
            CAN_RECE_MODE, CAN_SEND_MODE, NOMINAL_BIT_RATE, DATA_BIT_RATE, FILTER_USED_BITS,
            STD_OR_EXD_BITS, NOMINAL_BIT_RATE_SELECT, DATA_BIT_RATE_SELECT, FILTERS,
        ],
    };
}

pub mod err_frame {
    use super::{Field, Layout};

    pub const TIMESTAMP: Field = Field::new("can_timestamp", 0, super::timestamp::SIZE);
    pub const ECR: Field = Field::new("can_ecr_register", 8, 4);
    pub const PSR: Field = Field::new("can_psr_register", 12, 4);

    pub const LAYOUT: Layout = Layout {
        name: "ERR_FRAME",
        size: 16,
        fields: &[TIMESTAMP, ECR, PSR],
    };
}

pub mod canfd_status {
    use super::{Field, Layout};

    pub const LEFT_SEND_BUFFER_NUM: Field = Field::new("LeftSendBufferNum", 0, 2);

    pub const LAYOUT: Layout = Layout {
        name: "CANFD_STATUS",
        size: 60,
        fields: &[
            LEFT_SEND_BUFFER_NUM,
            Field::new("can0_timestamp", 2, super::timestamp::SIZE),
            Field::new("can0_ecr_register", 12, 4),
            Field::new("can0_psr_register", 16, 4),
            Field::new("can0_RxLost_Cnt", 20, 4),
            Field::new("can0_TxFail_Cnt", 24, 4),
            Field::new("can0_Load_Rate", 28, 4),
            Field::new("can1_timestamp", 32, super::timestamp::SIZE),
            Field::new("can1_ecr_register", 40, 4),
            Field::new("can1_psr_register", 44, 4),
            Field::new("can1_RxLost_Cnt", 48, 4),
            Field::new("can1_TxFail_Cnt", 52, 4),
            Field::new("can1_Load_Rate", 56, 4),
        ],
    };
}

/// Every described struct, for layout checks
pub const ALL_LAYOUTS: &[&Layout] = &[
    &vci_can_obj::LAYOUT,
    &vci_init_config::LAYOUT,
    &board_info::VCI_LAYOUT,
    &board_info::FD_LAYOUT,
    &vci_err_info::LAYOUT,
    &vci_can_status::LAYOUT,
    &timestamp::LAYOUT,
    &canfd_obj::LAYOUT,
    &init_config::LAYOUT,
    &err_frame::LAYOUT,
    &canfd_status::LAYOUT,
];
