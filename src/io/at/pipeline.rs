// src/io/at/pipeline.rs
//
// Receive pipeline for the AT adapter.
//
// A reader thread drains the serial line into an accumulator, slices complete
// frames out of it (resynchronizing on the "AT" marker), decodes them and
// pushes them onto a FIFO shared with any number of blocked `receive` callers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::codec::{consts, frame_len, AtCodec};
use super::line::{lock_io, SharedIo};
use crate::io::codec::FrameCodec;
use crate::io::error::Result;
use crate::io::types::{Timeout, MAX_DATA_LEN};
use crate::io::CanFrame;

/// Accumulator is dropped if it grows past this without yielding a frame
const MAX_ACCUMULATOR_LEN: usize = 4096;

/// Reader sleep when the line has nothing to read
const IDLE_POLL: Duration = Duration::from_millis(5);

// ============================================================================
// Frame Extraction
// ============================================================================

/// Result of scanning the accumulator for markers
#[derive(Debug, Default, PartialEq, Eq)]
struct Scan {
    /// `(start, end)` of the first complete frame
    frame: Option<(usize, usize)>,
    /// Earliest marker before that frame still waiting for bytes
    pending: Option<usize>,
}

/// Find the next complete frame in `buffer`.
///
/// Candidate markers whose length byte or terminator is wrong are skipped.
/// A candidate that runs past the end of the buffer is remembered and the
/// scan carries on, so noise resembling a frame header cannot hide a
/// complete frame behind it.
fn locate_frame(buffer: &[u8]) -> Scan {
    let mut scan = Scan::default();
    let mut from = 0;

    while let Some(rel) = buffer[from..].windows(2).position(|w| w == consts::MARKER) {
        let start = from + rel;
        from = start + 1;

        if buffer.len() < start + consts::MIN_FRAME_LEN {
            scan.pending.get_or_insert(start);
            continue;
        }

        let len = buffer[start + consts::LENGTH_OFFSET];
        if len as usize > MAX_DATA_LEN {
            continue;
        }
        let end = start + frame_len(len);
        if buffer.len() < end {
            scan.pending.get_or_insert(start);
            continue;
        }
        if buffer[end - 2..end] == consts::TERMINATOR {
            scan.frame = Some((start, end));
            break;
        }
    }

    scan
}

/// Pull the next frame out of `buffer`.
///
/// Noise before the frame is dropped, except from a pending candidate on:
/// then only the frame's own bytes are cut out.
fn take_frame(buffer: &mut Vec<u8>) -> Result<Option<CanFrame>> {
    let scan = locate_frame(buffer);
    let (start, end) = match scan.frame {
        Some(range) => range,
        None => {
            if let Some(pending) = scan.pending {
                buffer.drain(..pending);
            }
            return Ok(None);
        }
    };

    let frame = AtCodec::decode(&buffer[start..end])?;
    tlog!("[at] Received bytes: {}", hex::encode_upper(&buffer[start..end]));
    match scan.pending {
        Some(pending) => {
            buffer.drain(start..end);
            buffer.drain(..pending);
        }
        None => {
            buffer.drain(..end);
        }
    }
    Ok(Some(frame))
}

/// Parse every complete AT frame in `buffer`, consuming the bytes they occupy.
///
/// Incomplete trailing data stays in the buffer. A decode fault clears the
/// whole buffer; the corrupted frame is lost but later frames are not.
pub fn parse_at_frames(buffer: &mut Vec<u8>) -> Vec<CanFrame> {
    let mut out = Vec::new();

    loop {
        match take_frame(buffer) {
            Ok(Some(mut frame)) => {
                frame.timestamp = Some(Instant::now());
                out.push(frame);
            }
            Ok(None) => break,
            Err(e) => {
                tlog!("[at] Dropping {} buffered bytes: {}", buffer.len(), e);
                buffer.clear();
                break;
            }
        }
    }

    if out.is_empty() && buffer.len() > MAX_ACCUMULATOR_LEN {
        tlog!("[at] No frame in {} bytes, resetting accumulator", buffer.len());
        buffer.clear();
    }

    out
}

// ============================================================================
// Frame Queue
// ============================================================================

struct QueueState {
    frames: VecDeque<CanFrame>,
    closed: bool,
}

/// Unbounded FIFO between the reader (sole producer) and receive callers.
pub struct FrameQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                frames: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push_all(&self, frames: Vec<CanFrame>) {
        if frames.is_empty() {
            return;
        }
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.frames.extend(frames);
        self.available.notify_all();
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discard every queued frame
    pub fn clear(&self) -> usize {
        let mut state = self.lock();
        let dropped = state.frames.len();
        state.frames.clear();
        dropped
    }

    /// Wake every waiter and refuse further frames
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.frames.clear();
        self.available.notify_all();
    }

    /// Pop up to `capacity` frames in arrival order.
    ///
    /// Waits up to `timeout` for the first frame; once one is available,
    /// everything already queued (up to `capacity`) is returned without
    /// further waiting. Returns early, possibly empty, when the queue closes.
    pub fn pop_batch(&self, capacity: usize, timeout: Timeout) -> Vec<CanFrame> {
        if capacity == 0 {
            return Vec::new();
        }

        let mut state = self.lock();
        let deadline = match timeout {
            Timeout::Infinite => None,
            Timeout::After(d) => Some(Instant::now() + d),
        };

        while state.frames.is_empty() && !state.closed {
            match deadline {
                None => {
                    state = self
                        .available
                        .wait(state)
                        .unwrap_or_else(|e| e.into_inner());
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    state = self
                        .available
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(|e| e.into_inner())
                        .0;
                }
            }
        }

        let n = capacity.min(state.frames.len());
        state.frames.drain(..n).collect()
    }
}

// ============================================================================
// Reader Thread
// ============================================================================

/// Running reader: stop flag plus the thread to join.
pub struct Reader {
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Reader {
    /// Spawn the reader for `port_name`, draining `io` into `queue`.
    pub fn spawn(port_name: &str, io: SharedIo, queue: Arc<FrameQueue>) -> std::io::Result<Self> {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_flag_clone = stop_flag.clone();
        let device = port_name.to_string();

        let handle = std::thread::Builder::new()
            .name(format!("at-reader-{}", port_name))
            .spawn(move || run_reader(device, io, queue, stop_flag_clone))?;

        Ok(Self {
            stop_flag,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Signal the thread and wait for it to exit
    pub fn stop(mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tlog!("[at] Reader thread panicked");
            }
        }
    }
}

fn run_reader(device: String, io: SharedIo, queue: Arc<FrameQueue>, stop_flag: Arc<AtomicBool>) {
    tlog!("[at] Reader started on {}", device);

    let mut received: Vec<u8> = Vec::with_capacity(256);
    let mut read_buf = [0u8; 256];

    while !stop_flag.load(Ordering::SeqCst) {
        // Drain under the line lock; never block on the wire while holding it
        let read_result = {
            let mut guard = lock_io(&io);
            match guard.as_mut() {
                Some(line) => match line.bytes_to_read() {
                    Ok(0) => Ok(0),
                    Ok(pending) => {
                        let want = (pending as usize).min(read_buf.len());
                        line.read(&mut read_buf[..want])
                    }
                    Err(e) => Err(e),
                },
                None => break,
            }
        };

        match read_result {
            Ok(n) if n > 0 => {
                received.extend_from_slice(&read_buf[..n]);
                queue.push_all(parse_at_frames(&mut received));
            }
            Ok(_) => std::thread::sleep(IDLE_POLL),
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => {
                tlog!("[at] Read error on {}: {}", device, e);
                break;
            }
        }
    }

    tlog!("[at] Reader stopped on {}", device);
}

// ============================================================================
// Tests
// ============================================================================
