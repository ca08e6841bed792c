//! Frame validation utilities for test pattern verification.
//!
//! This module provides functions to validate that converted frames contain
//! expected test patterns. Useful for integration testing with virtual cameras.

use thiserror::Error;

use crate::convert::RgbImage;

/// Expected RGB values for 100% SMPTE color bars (8 bars).
///
/// Colors in order: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
const SMPTE_COLOR_BARS: [(u8, u8, u8); 8] = [
    (255, 255, 255), // White
    (255, 255, 0),   // Yellow
    (0, 255, 255),   // Cyan
    (0, 255, 0),     // Green
    (255, 0, 255),   // Magenta
    (255, 0, 0),     // Red
    (0, 0, 255),     // Blue
    (0, 0, 0),       // Black
];

/// Tolerance for RGB color matching (accounts for YUV->RGB rounding).
const COLOR_TOLERANCE: u8 = 15;

/// Why a frame failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ValidationError(String);

/// Validates that an image contains the SMPTE color bar pattern.
///
/// Checks the center of each of the 8 vertical stripes on the middle row,
/// within [`COLOR_TOLERANCE`] per channel.
pub fn validate_color_bars(image: &RgbImage) -> Result<(), ValidationError> {
    let bar_width = image.width() / 8;
    let center_y = image.height() / 2;

    for (bar_idx, expected_rgb) in SMPTE_COLOR_BARS.iter().enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        let sample_x = (bar_idx as u32 * bar_width) + (bar_width / 2);

        let actual_rgb = image.pixel_at(sample_x, center_y).ok_or_else(|| {
            ValidationError(format!("Failed to get pixel at ({sample_x}, {center_y})"))
        })?;

        if !colors_match(actual_rgb, *expected_rgb, COLOR_TOLERANCE) {
            return Err(ValidationError(format!(
                "Color bar {bar_idx} mismatch at ({sample_x}, {center_y}): \
                 expected RGB{expected_rgb:?}, got RGB{actual_rgb:?}"
            )));
        }
    }

    Ok(())
}

/// Validates that an image contains a horizontal gradient.
///
/// Samples the middle row every 10 pixels; luminance must never drop by
/// more than rounding error and must rise by at least 50 overall.
pub fn validate_gradient(image: &RgbImage) -> Result<(), ValidationError> {
    let center_y = image.height() / 2;

    let mut first_luminance: Option<f32> = None;
    let mut prev_luminance: Option<f32> = None;

    for x in (0..image.width()).step_by(10) {
        let (r, g, b) = image.pixel_at(x, center_y).ok_or_else(|| {
            ValidationError(format!("Failed to get pixel at ({x}, {center_y})"))
        })?;

        // Calculate luminance (Y' in Rec. 601)
        let luminance = 0.114f32.mul_add(
            f32::from(b),
            0.587f32.mul_add(f32::from(g), 0.299 * f32::from(r)),
        );

        first_luminance.get_or_insert(luminance);

        if let Some(prev) = prev_luminance {
            if luminance < prev - 1.0 {
                return Err(ValidationError(format!(
                    "Gradient not monotonically increasing at x={x}: \
                     luminance {luminance} < previous {prev}"
                )));
            }
        }
        prev_luminance = Some(luminance);
    }

    if let (Some(first), Some(last)) = (first_luminance, prev_luminance) {
        let luminance_change = last - first;
        if luminance_change < 50.0 {
            return Err(ValidationError(format!(
                "Insufficient luminance change for gradient: {luminance_change} \
                 (expected at least 50.0)"
            )));
        }
    }

    Ok(())
}

/// Whether all three channels are within `tolerance` of each other.
fn colors_match(actual: (u8, u8, u8), expected: (u8, u8, u8), tolerance: u8) -> bool {
    let (ar, ag, ab) = actual;
    let (er, eg, eb) = expected;

    ar.abs_diff(er) <= tolerance && ag.abs_diff(eg) <= tolerance && ab.abs_diff(eb) <= tolerance
}
