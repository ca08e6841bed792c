//! Capture configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::traits::{Format, FourCC};

/// Default capture device.
pub const DEFAULT_DEVICE: &str = "/dev/video0";
/// Default horizontal resolution.
pub const DEFAULT_WIDTH: u32 = 320;
/// Default vertical resolution.
pub const DEFAULT_HEIGHT: u32 = 240;
/// Number of buffers requested from the driver.
pub const DEFAULT_BUFFER_COUNT: u32 = 6;
/// Fewest buffers streaming can run with.
pub const MIN_BUFFER_COUNT: u32 = 2;
/// Readiness wait before a capture is declared timed out.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);
/// Pause after each processed frame.
pub const DEFAULT_FRAME_DELAY: Duration = Duration::from_millis(50);
/// Directory frames are written to.
pub const DEFAULT_OUTPUT_DIR: &str = "frames";

/// Settings for one capture session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Path of the capture device.
    pub device: PathBuf,
    /// Requested frame width.
    pub width: u32,
    /// Requested frame height.
    pub height: u32,
    /// Force the requested geometry and YUYV, instead of keeping the
    /// format the device is already configured with.
    pub force_format: bool,
    /// Buffers requested from the driver.
    pub buffer_count: u32,
    /// Readiness wait timeout.
    pub timeout: Duration,
    /// Delay after each processed frame.
    pub frame_delay: Duration,
    /// Frames to capture before stopping; `None` runs until stopped.
    pub max_frames: Option<u64>,
    /// Output directory for PPM files.
    pub output_dir: PathBuf,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from(DEFAULT_DEVICE),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            force_format: true,
            buffer_count: DEFAULT_BUFFER_COUNT,
            timeout: DEFAULT_TIMEOUT,
            frame_delay: DEFAULT_FRAME_DELAY,
            max_frames: Some(1),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
        }
    }
}

impl CaptureConfig {
    /// Format requested from the device when forcing.
    #[must_use]
    pub const fn requested_format(&self) -> Format {
        Format::new(self.width, self.height, FourCC::YUYV)
    }
}
