// src/abi/mod.rs
//
// Exported C ABI.
//
// Two vendor families are exported from the same library:
//   classic  - ControlCAN (VCI_*), status 1 = ok / 0 = error
//   canfd    - ECanFDVci, status 0 = ok / bit-flag error codes
//
// Each family is a thin shell: the `extern "system"` functions only turn raw
// pointers into byte slices and delegate to safe functions that take the
// registry explicitly, so the logic is testable without the process-wide
// instance.

pub mod canfd;
pub mod classic;
pub mod layout;

use std::panic::{catch_unwind, AssertUnwindSafe};

use once_cell::sync::Lazy;

use crate::device::DeviceRegistry;
use crate::settings::Settings;
use layout::Layout;

/// Process-wide registry behind the exported functions. Built on first call.
static REGISTRY: Lazy<DeviceRegistry> = Lazy::new(|| {
    let settings = Settings::load();
    if let Some(ref dir) = settings.log_dir {
        if let Err(e) = crate::logging::init_file_logging(dir) {
            tlog!("[abi] {}", e);
        }
    }
    tlog!(
        "[abi] Driver loaded, ports {}, working line baud {}",
        settings.port_template,
        settings.working_line_baud
    );
    DeviceRegistry::serial(settings)
});

pub(crate) fn registry() -> &'static DeviceRegistry {
    &REGISTRY
}

/// Run an export body; a panic is logged and reported as `fault`.
pub(crate) fn guarded<T>(entry: &str, fault: T, body: impl FnOnce() -> T) -> T {
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(status) => status,
        Err(_) => {
            tlog!("[abi] {} panicked", entry);
            fault
        }
    }
}

/// View `count` caller-owned records of `layout` as bytes.
///
/// # Safety
/// `ptr` must be null or valid for reads of `count * layout.size` bytes.
pub(crate) unsafe fn records<'a>(ptr: *const u8, layout: &Layout, count: usize) -> Option<&'a [u8]> {
    if ptr.is_null() {
        return None;
    }
    Some(std::slice::from_raw_parts(ptr, count * layout.size))
}

/// Mutable counterpart of [`records`].
///
/// # Safety
/// `ptr` must be null or valid for writes of `count * layout.size` bytes.
pub(crate) unsafe fn records_mut<'a>(ptr: *mut u8, layout: &Layout, count: usize) -> Option<&'a mut [u8]> {
    if ptr.is_null() {
        return None;
    }
    Some(std::slice::from_raw_parts_mut(ptr, count * layout.size))
}
