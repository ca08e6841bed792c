//! Core traits and types for the capture pipeline.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::session::SessionState;

/// Pixel format representation (e.g., YUYV, MJPG, RGB3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// MJPEG pixel format (Motion JPEG).
    pub const MJPG: Self = Self::new(b"MJPG");
}

impl std::fmt::Display for FourCC {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in self.0 {
            write!(f, "{}", char::from(byte))?;
        }
        Ok(())
    }
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// Video format specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
    /// Bytes per line (stride).
    pub stride: u32,
    /// Total frame size in bytes.
    pub size: u32,
}

impl Format {
    /// Create a new format specification.
    #[must_use]
    pub const fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        let stride = width * 2; // YUYV is 2 bytes per pixel
        let size = stride * height;
        Self {
            width,
            height,
            fourcc,
            stride,
            size,
        }
    }

    /// Raise `stride` and `size` to the smallest values a packed 2-byte
    /// encoding of this geometry can occupy.
    ///
    /// Some drivers report zero or short values here, so the negotiated
    /// format is never trusted as-is.
    #[must_use]
    pub const fn clamped(mut self) -> Self {
        let min_stride = self.width.saturating_mul(2);
        if self.stride < min_stride {
            self.stride = min_stride;
        }
        let min_size = self.stride.saturating_mul(self.height);
        if self.size < min_size {
            self.size = min_size;
        }
        self
    }
}

/// Device capability flags.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Whether the device can capture video.
    pub can_capture: bool,
    /// Whether the device supports streaming.
    pub can_stream: bool,
}

/// A filled buffer handed back by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dequeued {
    /// Index of the buffer in the pool.
    pub index: u32,
    /// Bytes of payload the device wrote.
    pub bytes_used: u32,
}

/// Error type for capture operations.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Path is missing or is not a character device.
    #[error("cannot identify '{}': {reason}", .path.display())]
    NotFound {
        /// Device path that was checked.
        path: PathBuf,
        /// Why the path was rejected.
        reason: String,
    },
    /// The open call itself was rejected.
    #[error("cannot open '{}'", .path.display())]
    OpenFailed {
        /// Device path.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// Device lacks a capability the capture path relies on.
    #[error("unsupported device: {0}")]
    UnsupportedDevice(String),
    /// Device refused the requested (or current) format.
    #[error("format rejected")]
    FormatRejected(#[source] io::Error),
    /// Device does not support memory-mapped streaming.
    #[error("device does not support memory mapping")]
    MappingUnsupported,
    /// Buffer request failed for a reason other than missing mmap support.
    #[error("buffer request failed")]
    RequestBuffers(#[source] io::Error),
    /// Device granted fewer buffers than streaming needs.
    #[error("insufficient buffer memory: {granted} buffer(s) granted")]
    InsufficientBuffers {
        /// Number of buffers the device granted.
        granted: u32,
    },
    /// Mapping buffer memory into the process failed.
    #[error("failed to map buffer {index}")]
    MapFailed {
        /// Index of the buffer that failed to map.
        index: u32,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// Queueing a buffer while starting the stream failed.
    #[error("failed to queue buffer {index}")]
    QueueFailed {
        /// Index of the buffer.
        index: u32,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// Stream-on command failed.
    #[error("failed to start streaming")]
    StreamOn(#[source] io::Error),
    /// Readiness wait failed.
    #[error("readiness wait failed")]
    WaitFailed(#[source] io::Error),
    /// No frame became ready within the wait window.
    #[error("no frame within {0:?}")]
    CaptureTimeout(Duration),
    /// Dequeue failed with an unrecoverable error.
    #[error("failed to dequeue buffer")]
    DequeueFailed(#[source] io::Error),
    /// Converter was handed an encoding it cannot read.
    #[error("unsupported pixel encoding {0}")]
    UnsupportedEncoding(FourCC),
    /// Frame payload is smaller than the negotiated geometry.
    #[error("short frame: expected at least {expected} bytes, got {actual}")]
    ShortFrame {
        /// Minimum byte count for the negotiated geometry.
        expected: usize,
        /// Byte count the device reported.
        actual: usize,
    },
    /// Scratch image geometry does not match the frame.
    #[error("image is {image_width}x{image_height}, frame is {frame_width}x{frame_height}")]
    ImageMismatch {
        /// Scratch image width.
        image_width: u32,
        /// Scratch image height.
        image_height: u32,
        /// Frame width.
        frame_width: u32,
        /// Frame height.
        frame_height: u32,
    },
    /// Writing an output file failed.
    #[error("failed to write '{}'", .path.display())]
    WriteFailed {
        /// Output file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Operation is not valid in the current session state.
    #[error("cannot {operation} while {state:?}")]
    InvalidState {
        /// Rejected operation.
        operation: &'static str,
        /// State the session was in.
        state: SessionState,
    },
}

/// Result type for capture operations.
pub type Result<T> = std::result::Result<T, CaptureError>;

/// Abstraction over the device operations the capture core consumes.
///
/// Methods return raw [`io::Result`]s so callers can tell transient
/// conditions (`WouldBlock`, `Interrupted`) from fatal ones.
pub trait CaptureDevice {
    /// Memory region backing one mapped buffer.
    type Region: AsRef<[u8]>;

    /// Query device capabilities.
    fn query_capabilities(&mut self) -> io::Result<DeviceCapabilities>;

    /// Reset cropping to the default rectangle.
    fn reset_crop(&mut self) -> io::Result<()>;

    /// Get current format.
    fn format(&mut self) -> io::Result<Format>;

    /// Set capture format. Returns the actual format set by the driver.
    fn set_format(&mut self, format: &Format) -> io::Result<Format>;

    /// Request `count` memory-mapped buffers. Returns the number granted.
    fn request_buffers(&mut self, count: u32) -> io::Result<u32>;

    /// Map buffer `index` into process memory.
    fn map_buffer(&mut self, index: u32) -> io::Result<Self::Region>;

    /// Unmap a region returned by [`CaptureDevice::map_buffer`].
    fn unmap_buffer(&mut self, region: Self::Region) -> io::Result<()>;

    /// Hand buffer `index` to the device for filling.
    fn queue_buffer(&mut self, index: u32) -> io::Result<()>;

    /// Take the next filled buffer. Fails with `WouldBlock` when none is ready.
    fn dequeue_buffer(&mut self) -> io::Result<Dequeued>;

    /// Start streaming.
    fn stream_on(&mut self) -> io::Result<()>;

    /// Stop streaming.
    fn stream_off(&mut self) -> io::Result<()>;

    /// Block until a buffer is ready or `timeout` elapses.
    /// Returns `false` on timeout.
    fn wait_ready(&mut self, timeout: Duration) -> io::Result<bool>;

    /// Release the device descriptor.
    fn close(&mut self) -> io::Result<()>;
}
