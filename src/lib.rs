//! Frame-Grabber: a V4L2 still-frame capture library
//!
//! Opens a Video4Linux2 capture device, negotiates a packed YUYV format,
//! streams through memory-mapped buffers and writes each frame as a binary
//! PPM image. Device access sits behind the [`CaptureDevice`] trait so the
//! whole pipeline runs against a mock device in tests.

pub mod config;
pub mod convert;
pub mod device;
pub mod negotiate;
pub mod pool;
pub mod session;
pub mod traits;
pub mod validation;
pub mod writer;

#[cfg(test)]
pub mod mock;

pub use config::CaptureConfig;
pub use convert::{convert_frame, yuv_to_rgb, RgbImage};
pub use device::V4L2Device;
pub use session::{CaptureSession, FrameInfo, SessionState, StopToken, WrittenFrame};
pub use traits::{CaptureDevice, CaptureError, DeviceCapabilities, Format, FourCC};
pub use writer::FrameWriter;
