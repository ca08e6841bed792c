//! YUYV422 to RGB24 conversion.
//!
//! The conversion runs once per captured frame into a scratch [`RgbImage`]
//! owned by the session, so the hot path never allocates.

use crate::traits::{CaptureError, Format, FourCC, Result};

/// Owned RGB24 scratch image, reused across frames.
#[derive(Debug, Clone)]
pub struct RgbImage {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl RgbImage {
    /// Allocate a black image for the given geometry.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        let len = width as usize * height as usize * 3;
        Self {
            data: vec![0; len],
            width,
            height,
        }
    }

    /// Image width in pixels.
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Image height in pixels.
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Number of pixels in the image.
    pub const fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Raw row-major RGB bytes, no padding.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// RGB value at `(x, y)`, or `None` outside the image.
    #[must_use]
    pub fn pixel_at(&self, x: u32, y: u32) -> Option<(u8, u8, u8)> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 3;
        match self.data.get(offset..offset + 3)? {
            &[r, g, b] => Some((r, g, b)),
            _ => None,
        }
    }
}

/// Convert one YUV sample to RGB using BT.601 fixed-point coefficients.
///
/// Studio range input: `Y=16` is black and `Y=235` is white.
#[must_use]
#[allow(clippy::many_single_char_names)]
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let c = i32::from(y) - 16;
    let d = i32::from(u) - 128;
    let e = i32::from(v) - 128;

    let r = (298 * c + 409 * e + 128) >> 8;
    let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
    let b = (298 * c + 516 * d + 128) >> 8;

    (clamp(r), clamp(g), clamp(b))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
const fn clamp(value: i32) -> u8 {
    if value < 0 {
        0
    } else if value > 255 {
        255
    } else {
        value as u8
    }
}

/// Convert one `Y0 U Y1 V` quadruple into two RGB pixels.
///
/// Both pixels use the same chroma pair.
#[must_use]
pub fn convert_pair(yuyv: [u8; 4]) -> [u8; 6] {
    let [y0, u, y1, v] = yuyv;
    let (r0, g0, b0) = yuv_to_rgb(y0, u, v);
    let (r1, g1, b1) = yuv_to_rgb(y1, u, v);
    [r0, g0, b0, r1, g1, b1]
}

/// Convert a raw frame in `format` into `out`.
///
/// Rows are read `format.stride` bytes apart, so drivers that pad lines
/// convert correctly. `out` must already have the frame's geometry.
pub fn convert_frame(raw: &[u8], format: &Format, out: &mut RgbImage) -> Result<()> {
    if format.fourcc != FourCC::YUYV {
        return Err(CaptureError::UnsupportedEncoding(format.fourcc));
    }
    if out.width != format.width || out.height != format.height {
        return Err(CaptureError::ImageMismatch {
            image_width: out.width,
            image_height: out.height,
            frame_width: format.width,
            frame_height: format.height,
        });
    }
    if format.width == 0 || format.height == 0 {
        return Ok(());
    }

    let line = format.width as usize * 2;
    let stride = (format.stride as usize).max(line);
    let expected = stride * (format.height as usize - 1) + line;
    if raw.len() < expected {
        return Err(CaptureError::ShortFrame {
            expected,
            actual: raw.len(),
        });
    }

    let rgb_line = format.width as usize * 3;
    for (src_row, dst_row) in raw
        .chunks(stride)
        .zip(out.data.chunks_exact_mut(rgb_line))
    {
        let src_row = src_row.get(..line).unwrap_or(src_row);
        for (src, dst) in src_row.chunks_exact(4).zip(dst_row.chunks_exact_mut(6)) {
            if let (Ok(quad), Ok(px)) = (<[u8; 4]>::try_from(src), <&mut [u8; 6]>::try_from(dst)) {
                *px = convert_pair(quad);
            }
        }
    }

    Ok(())
}
