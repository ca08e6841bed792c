//! Capture session state machine.
//!
//! ```text
//! Idle --start()--> Streaming --stop()--> Draining --> Closed
//!   \______________________stop()_________________________/
//! ```
//!
//! Each streaming iteration waits for readiness, dequeues a filled buffer,
//! converts it into the session's scratch image and re-queues the buffer.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::config::CaptureConfig;
use crate::convert::{convert_frame, RgbImage};
use crate::negotiate::{negotiate_format, query_capabilities};
use crate::pool::{BufferPool, CapturedFrame, MappedBuffer};
use crate::traits::{CaptureDevice, CaptureError, Format, Result};
use crate::writer::FrameWriter;

/// Lifecycle state of a [`CaptureSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Buffers allocated, device not streaming.
    Idle,
    /// Buffers queued and streaming on.
    Streaming,
    /// Teardown in progress.
    Draining,
    /// Device released.
    Closed,
}

/// Cooperative cancellation flag shared with a signal handler.
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    /// Create a token with no stop requested.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the session to stop after the current iteration.
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested.
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A frame converted into the session's scratch image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// Sequential frame number, starting at 1.
    pub number: u64,
    /// Wall-clock capture time since the Unix epoch.
    pub timestamp: Duration,
    /// Raw payload size.
    pub bytes_used: usize,
}

/// A frame persisted by [`CaptureSession::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenFrame {
    /// Sequential frame number.
    pub number: u64,
    /// Output file.
    pub path: PathBuf,
    /// Capture time.
    pub timestamp: Duration,
}

/// Owns a device, its buffers and the scratch image for one capture run.
pub struct CaptureSession<D: CaptureDevice> {
    device: D,
    pool: BufferPool<D::Region>,
    format: Format,
    image: RgbImage,
    state: SessionState,
    frame_count: u64,
    timeout: Duration,
    frame_delay: Duration,
    max_frames: Option<u64>,
    stop: StopToken,
}

impl<D: CaptureDevice> CaptureSession<D> {
    /// Check capabilities, negotiate the format and map buffers.
    ///
    /// On failure the device is closed before the error is returned.
    pub fn new(mut device: D, config: &CaptureConfig, stop: StopToken) -> Result<Self> {
        let (format, pool) = match Self::setup(&mut device, config) {
            Ok(parts) => parts,
            Err(err) => {
                if let Err(close_err) = device.close() {
                    warn!(error = %close_err, "close after failed setup");
                }
                return Err(err);
            }
        };

        Ok(Self {
            device,
            image: RgbImage::new(format.width, format.height),
            pool,
            format,
            state: SessionState::Idle,
            frame_count: 0,
            timeout: config.timeout,
            frame_delay: config.frame_delay,
            max_frames: config.max_frames,
            stop,
        })
    }

    fn setup(device: &mut D, config: &CaptureConfig) -> Result<(Format, BufferPool<D::Region>)> {
        query_capabilities(device)?;
        let format = negotiate_format(device, &config.requested_format(), config.force_format)?;
        let pool = BufferPool::allocate(device, config.buffer_count)?;
        Ok((format, pool))
    }

    /// Current state.
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Negotiated format.
    pub const fn format(&self) -> &Format {
        &self.format
    }

    /// Scratch image holding the most recently converted frame.
    pub const fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Frames converted so far.
    pub const fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Number of mapped buffers.
    pub fn buffer_count(&self) -> usize {
        self.pool.len()
    }

    /// Underlying device.
    pub const fn device(&self) -> &D {
        &self.device
    }

    /// Underlying device, mutably.
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Queue every buffer and turn streaming on.
    ///
    /// Only valid from [`SessionState::Idle`]; a second `start()` is rejected.
    pub fn start(&mut self) -> Result<()> {
        self.require(SessionState::Idle, "start")?;

        let indices: Vec<u32> = self.pool.buffers().iter().map(MappedBuffer::index).collect();
        for index in indices {
            self.pool
                .queue(&mut self.device, index)
                .map_err(|source| CaptureError::QueueFailed { index, source })?;
        }
        self.device.stream_on().map_err(CaptureError::StreamOn)?;

        self.state = SessionState::Streaming;
        info!(buffers = self.pool.len(), "streaming started");
        Ok(())
    }

    /// Run one acquisition iteration.
    ///
    /// Returns `Ok(None)` when the device was ready but had no buffer to
    /// hand out. On success the frame is in [`CaptureSession::image`].
    pub fn capture_frame(&mut self) -> Result<Option<FrameInfo>> {
        self.require(SessionState::Streaming, "capture")?;

        let Self {
            device,
            pool,
            format,
            image,
            timeout,
            ..
        } = self;
        let captured = acquire(device, pool, *timeout, |frame| {
            convert_frame(frame.data, format, image)?;
            Ok((frame.timestamp, frame.byte_count()))
        })?;

        Ok(captured.map(|(timestamp, bytes_used)| {
            self.frame_count += 1;
            FrameInfo {
                number: self.frame_count,
                timestamp,
                bytes_used,
            }
        }))
    }

    /// Capture and write frames until the frame limit is reached or a stop
    /// is requested. Returns the number of frames written.
    ///
    /// The stop token is checked between iterations, never during a wait.
    pub fn run<F>(&mut self, writer: &FrameWriter, mut on_frame: F) -> Result<u64>
    where
        F: FnMut(&WrittenFrame),
    {
        self.require(SessionState::Streaming, "run")?;

        let mut written = 0;
        loop {
            if self.stop.is_requested() {
                info!("stop requested");
                break;
            }
            if self.max_frames.is_some_and(|max| written >= max) {
                break;
            }

            let Some(info) = self.capture_frame()? else {
                continue;
            };
            let path = writer.write(&self.image, info.number, info.timestamp)?;
            written += 1;
            on_frame(&WrittenFrame {
                number: info.number,
                path,
                timestamp: info.timestamp,
            });

            if !self.frame_delay.is_zero() {
                thread::sleep(self.frame_delay);
            }
        }

        Ok(written)
    }

    /// Stop streaming, unmap buffers and close the device.
    ///
    /// Every step runs even if an earlier one failed; failures are logged.
    /// Calling this on a closed session does nothing.
    pub fn stop(&mut self) {
        let was_streaming = match self.state {
            SessionState::Draining | SessionState::Closed => return,
            SessionState::Idle => false,
            SessionState::Streaming => true,
        };
        self.state = SessionState::Draining;

        if was_streaming {
            if let Err(err) = self.device.stream_off() {
                warn!(error = %err, "stream off failed");
            }
        }
        self.pool.release(&mut self.device);
        if let Err(err) = self.device.close() {
            warn!(error = %err, "close failed");
        }

        self.state = SessionState::Closed;
        info!(frames = self.frame_count, "capture session closed");
    }

    fn require(&self, expected: SessionState, operation: &'static str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(CaptureError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }
}

impl<D: CaptureDevice> Drop for CaptureSession<D> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Wait for a filled buffer, lend it to `process`, then hand it back.
fn acquire<D, T, F>(
    device: &mut D,
    pool: &mut BufferPool<D::Region>,
    timeout: Duration,
    process: F,
) -> Result<Option<T>>
where
    D: CaptureDevice,
    F: FnOnce(&CapturedFrame<'_>) -> Result<T>,
{
    loop {
        match device.wait_ready(timeout) {
            Ok(true) => break,
            Ok(false) => return Err(CaptureError::CaptureTimeout(timeout)),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                debug!("readiness wait interrupted, retrying");
            }
            Err(err) => return Err(CaptureError::WaitFailed(err)),
        }
    }

    let dequeued = match device.dequeue_buffer() {
        Ok(dequeued) => dequeued,
        Err(err) if is_transient(&err) => {
            debug!(error = %err, "no buffer this iteration");
            return Ok(None);
        }
        Err(err) => return Err(CaptureError::DequeueFailed(err)),
    };

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let Some(frame) = pool.frame(dequeued.index, dequeued.bytes_used, timestamp) else {
        return Err(CaptureError::DequeueFailed(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("device returned unknown buffer {}", dequeued.index),
        )));
    };
    let result = process(&frame);

    if let Err(err) = pool.queue(device, dequeued.index) {
        warn!(index = dequeued.index, error = %err, "re-queue failed");
    }

    result.map(Some)
}

/// `EAGAIN` and `EIO` from a dequeue mean "nothing this time".
fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    ) || err.raw_os_error() == Some(libc::EIO)
}
