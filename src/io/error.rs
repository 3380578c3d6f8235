// src/io/error.rs
//
// Error type shared by the codec, the serial line and the device layer.
// Nothing here crosses the exported ABI: the abi module folds every variant
// into a vendor status code.

use thiserror::Error;

/// Errors raised inside the adapter core.
#[derive(Debug, Error)]
pub enum CanError {
    /// A live device is already registered under this index
    #[error("device {0} is already open")]
    DeviceAlreadyOpen(u32),

    /// The serial line could not be opened (missing or claimed by another process)
    #[error("failed to open {device}: {reason}")]
    DeviceOpenFailed { device: String, reason: String },

    /// No device is registered under this index
    #[error("device {0} is not open")]
    DeviceNotOpen(u32),

    /// A command-mode handshake step was not acknowledged
    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    /// Transport fault during transmit or configure
    #[error("{device}: {source}")]
    Io {
        device: String,
        #[source]
        source: std::io::Error,
    },

    /// Malformed wire data
    #[error("{source_name}: {message}")]
    Protocol { source_name: String, message: String },

    /// Reserved, the serial adapter never reports it
    #[error("buffer overflow")]
    BufferOverflow,

    /// Settings file could not be read or parsed
    #[error("settings: {0}")]
    Settings(String),
}

impl CanError {
    pub fn protocol(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        CanError::Protocol {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        CanError::ConfigurationFailed(message.into())
    }

    pub fn open_failed(device: impl Into<String>, reason: impl ToString) -> Self {
        CanError::DeviceOpenFailed {
            device: device.into(),
            reason: reason.to_string(),
        }
    }

    pub fn io(device: impl Into<String>, source: std::io::Error) -> Self {
        CanError::Io {
            device: device.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, CanError>;
