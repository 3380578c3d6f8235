// src/io/at/line.rs
//
// Line handle: one serial connection per device, its open/close lifecycle and
// the lock that serializes every operation touching the wire.
//
// The wire is reached through the `LineIo` / `LineConnector` seam so the same
// handle drives a real serial port or an in-memory adapter.

use std::io::{Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serialport::ClearBuffer;

use super::command;
use super::pipeline::{FrameQueue, Reader};
use crate::io::error::{CanError, Result};
use crate::io::ChannelConfig;
use crate::settings::Settings;

/// Serial read timeout for the underlying port
const PORT_TIMEOUT: Duration = Duration::from_millis(50);

// ============================================================================
// Transport Seam
// ============================================================================

/// Byte-level access to an open serial line.
pub trait LineIo: Send {
    /// Bytes waiting in the OS receive buffer
    fn bytes_to_read(&mut self) -> std::io::Result<u32>;
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()>;
    fn flush(&mut self) -> std::io::Result<()>;
    /// Discard OS-level buffers
    fn clear(&mut self, which: ClearBuffer) -> std::io::Result<()>;
    /// Change the host-side UART rate
    fn set_baud_rate(&mut self, baud_rate: u32) -> std::io::Result<()>;
}

/// Opens lines by name.
pub trait LineConnector: Send + Sync {
    fn connect(&self, port_name: &str, baud_rate: u32) -> std::io::Result<Box<dyn LineIo>>;
}

impl LineIo for Box<dyn serialport::SerialPort> {
    fn bytes_to_read(&mut self) -> std::io::Result<u32> {
        Ok((**self).bytes_to_read()?)
    }

    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        Read::read(self, buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        Write::write_all(self, buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Write::flush(self)
    }

    fn clear(&mut self, which: ClearBuffer) -> std::io::Result<()> {
        Ok((**self).clear(which)?)
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> std::io::Result<()> {
        Ok((**self).set_baud_rate(baud_rate)?)
    }
}

/// Connector for real serial ports (8N1, no flow control)
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialConnector;

impl LineConnector for SerialConnector {
    fn connect(&self, port_name: &str, baud_rate: u32) -> std::io::Result<Box<dyn LineIo>> {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .timeout(PORT_TIMEOUT)
            .open()?;
        Ok(Box::new(port))
    }
}

/// Open line shared between callers and the reader thread
pub type SharedIo = Arc<Mutex<Option<Box<dyn LineIo>>>>;

pub(crate) fn lock_io(io: &SharedIo) -> MutexGuard<'_, Option<Box<dyn LineIo>>> {
    io.lock().unwrap_or_else(|e| e.into_inner())
}

// ============================================================================
// Serial Line
// ============================================================================

/// One adapter's serial line.
pub struct SerialLine {
    port_name: String,
    connector: Arc<dyn LineConnector>,
    settings: Arc<Settings>,
    io: SharedIo,
    reader: Mutex<Option<Reader>>,
    /// Host-side UART rate used on the next (re)connect
    line_baud: Mutex<u32>,
}

impl SerialLine {
    pub fn new(port_name: String, connector: Arc<dyn LineConnector>, settings: Arc<Settings>) -> Self {
        let line_baud = settings
            .line_baud_candidates
            .first()
            .copied()
            .unwrap_or(crate::settings::FACTORY_LINE_BAUD);
        Self {
            port_name,
            connector,
            settings,
            io: Arc::new(Mutex::new(None)),
            reader: Mutex::new(None),
            line_baud: Mutex::new(line_baud),
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    fn current_baud(&self) -> u32 {
        *self.line_baud.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn connect(&self) -> Result<Box<dyn LineIo>> {
        self.connector
            .connect(&self.port_name, self.current_baud())
            .map_err(|e| CanError::open_failed(&self.port_name, e))
    }

    /// Make sure the line is open, reconnecting if needed.
    fn ensure_open<'a>(
        &self,
        guard: &'a mut MutexGuard<'_, Option<Box<dyn LineIo>>>,
    ) -> Result<&'a mut Box<dyn LineIo>> {
        if guard.is_none() {
            **guard = Some(self.connect()?);
        }
        match guard.as_mut() {
            Some(io) => Ok(io),
            None => Err(CanError::DeviceOpenFailed {
                device: self.port_name.clone(),
                reason: "line not open".to_string(),
            }),
        }
    }

    /// Reachability probe: open then immediately close the port.
    pub fn open(&self) -> Result<()> {
        tlog!("[line] Open {} start", self.port_name);
        let _guard = lock_io(&self.io);
        match self.connect() {
            Ok(io) => {
                drop(io);
                tlog!("[line] Open {} success", self.port_name);
                Ok(())
            }
            Err(e) => {
                tlog!("[line] Open {} error: {}", self.port_name, e);
                Err(e)
            }
        }
    }

    /// Stop the reader and release the port. Closing a closed line succeeds.
    pub fn close(&self) -> Result<()> {
        tlog!("[line] Close {} start", self.port_name);
        let reader = self
            .reader
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(reader) = reader {
            reader.stop();
        }
        lock_io(&self.io).take();
        tlog!("[line] Close {} success", self.port_name);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        lock_io(&self.io).is_some()
    }

    /// Run the command-mode handshake for `config`.
    pub fn configure(&self, config: &ChannelConfig) -> Result<()> {
        let mut guard = lock_io(&self.io);
        let io = self.ensure_open(&mut guard)?;
        let _ = io.clear(ClearBuffer::All);

        let line_baud = command::run_handshake(&mut **io, config, &self.settings, &self.port_name)?;
        *self.line_baud.lock().unwrap_or_else(|e| e.into_inner()) = line_baud;
        Ok(())
    }

    /// Open the line if needed and attach the reader feeding `queue`.
    /// A second call while the reader runs is a no-op.
    pub fn start(&self, queue: Arc<FrameQueue>) -> Result<()> {
        {
            let mut guard = lock_io(&self.io);
            self.ensure_open(&mut guard)?;
        }

        let mut reader = self.reader.lock().unwrap_or_else(|e| e.into_inner());
        if reader.as_ref().map_or(false, |r| r.is_running()) {
            return Ok(());
        }
        if let Some(stale) = reader.take() {
            stale.stop();
        }
        *reader = Some(
            Reader::spawn(&self.port_name, self.io.clone(), queue)
                .map_err(|e| CanError::io(&self.port_name, e))?,
        );
        Ok(())
    }

    pub fn is_reading(&self) -> bool {
        self.reader
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map_or(false, |r| r.is_running())
    }

    /// Write one encoded frame
    pub fn write_frame(&self, bytes: &[u8]) -> Result<()> {
        let mut guard = lock_io(&self.io);
        let io = self.ensure_open(&mut guard)?;
        io.write_all(bytes)
            .and_then(|_| io.flush())
            .map_err(|e| CanError::io(&self.port_name, e))
    }

    /// Discard OS-level output and input buffers
    pub fn clear(&self) -> Result<()> {
        let mut guard = lock_io(&self.io);
        let io = self.ensure_open(&mut guard)?;
        io.clear(ClearBuffer::Output)
            .and_then(|_| io.clear(ClearBuffer::Input))
            .map_err(|e| CanError::io(&self.port_name, e))
    }
}

impl Drop for SerialLine {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
