// src/device/channel.rs
//
// One open adapter and its single CAN channel.
//
// The adapter exposes exactly one channel (index 0). Calls naming any other
// channel are accepted and do nothing: no frames, zero pending, zero sent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::io::at::{AtCodec, FrameQueue, LineConnector, SerialLine};
use crate::io::codec::FrameCodec;
use crate::io::error::Result;
use crate::io::{BoardInfo, CanFrame, ChannelConfig, Timeout};
use crate::settings::Settings;

/// The only channel the adapter has
pub const CHANNEL_0: u32 = 0;

/// An open device: line handle, receive queue and channel state.
pub struct CanDevice {
    index: u32,
    line: SerialLine,
    queue: Arc<FrameQueue>,
    started: AtomicBool,
    opened_at: Instant,
    /// Last configuration applied (or the default before any InitCAN)
    config: Mutex<ChannelConfig>,
    board_info: BoardInfo,
}

impl CanDevice {
    /// Probe the port for `index` and build the device around it.
    pub fn open(index: u32, connector: Arc<dyn LineConnector>, settings: Arc<Settings>) -> Result<Self> {
        let port_name = settings.port_name(index);
        let line = SerialLine::new(port_name.clone(), connector, settings);
        line.open()?;

        Ok(Self {
            index,
            line,
            queue: Arc::new(FrameQueue::new()),
            started: AtomicBool::new(false),
            opened_at: Instant::now(),
            config: Mutex::new(ChannelConfig::default()),
            board_info: BoardInfo::for_port(&port_name),
        })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn port_name(&self) -> &str {
        self.line.port_name()
    }

    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> ChannelConfig {
        self.config.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Apply `config` to the adapter. The stored configuration is only
    /// replaced once the handshake completes.
    pub fn initialize(&self, channel: u32, config: ChannelConfig) -> Result<()> {
        if channel != CHANNEL_0 {
            return Ok(());
        }
        tlog!(
            "[device] {} init baud={} mode={} filters={}",
            self.index,
            config.baud_rate,
            config.mode,
            config.filters.len()
        );
        self.line.configure(&config)?;
        *self.config.lock().unwrap_or_else(|e| e.into_inner()) = config;
        Ok(())
    }

    /// Attach the reader. Idempotent.
    pub fn start(&self, channel: u32) -> Result<()> {
        if channel != CHANNEL_0 {
            return Ok(());
        }
        self.line.start(self.queue.clone())?;
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Frames waiting to be received
    pub fn pending_count(&self, channel: u32) -> usize {
        if channel != CHANNEL_0 {
            return 0;
        }
        self.queue.len()
    }

    /// Discard OS buffers and every queued frame
    pub fn clear_buffer(&self, channel: u32) -> Result<()> {
        if channel != CHANNEL_0 {
            return Ok(());
        }
        self.line.clear()?;
        let dropped = self.queue.clear();
        tlog!("[device] {} cleared, {} frames dropped", self.index, dropped);
        Ok(())
    }

    /// The adapter has no reset distinct from a buffer clear
    pub fn reset(&self, channel: u32) -> Result<()> {
        self.clear_buffer(channel)
    }

    /// Send frames in order, stopping at the first one that fails.
    ///
    /// Returns how many frames reached the wire.
    pub fn transmit(&self, channel: u32, frames: &[CanFrame]) -> usize {
        if channel != CHANNEL_0 {
            return 0;
        }

        let mut sent = 0;
        for frame in frames {
            let bytes = match AtCodec::encode(frame) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tlog!("[device] {} transmit stopped at frame {}: {}", self.index, sent, e);
                    break;
                }
            };
            if let Err(e) = self.line.write_frame(&bytes) {
                tlog!("[device] {} transmit stopped at frame {}: {}", self.index, sent, e);
                break;
            }
            tlog!("[at] Sent bytes: {}", hex::encode_upper(&bytes));
            sent += 1;
        }
        sent
    }

    /// Take up to `capacity` frames; see `FrameQueue::pop_batch` for waiting.
    pub fn receive(&self, channel: u32, capacity: usize, timeout: Timeout) -> Vec<CanFrame> {
        if channel != CHANNEL_0 {
            return Vec::new();
        }
        self.queue.pop_batch(capacity, timeout)
    }

    pub fn board_info(&self) -> &BoardInfo {
        &self.board_info
    }

    /// Vendor parameter read. Nothing is exposed through it.
    pub fn get_reference(&self, _channel: u32, _ref_type: u32) -> Result<()> {
        Ok(())
    }

    /// Vendor parameter write. Accepted and ignored.
    pub fn set_reference(&self, _channel: u32, _ref_type: u32) -> Result<()> {
        Ok(())
    }

    /// Wake blocked receivers, stop the reader, release the line.
    pub fn close(&self) {
        tlog!("[device] {} closing", self.index);
        self.queue.close();
        let _ = self.line.close();
        self.started.store(false, Ordering::SeqCst);
    }
}
