//! Capability checks and format negotiation.

use tracing::{debug, info, warn};

use crate::traits::{CaptureDevice, CaptureError, DeviceCapabilities, Format, Result};

/// Query capabilities and require video capture with streaming I/O.
pub fn query_capabilities<D: CaptureDevice>(device: &mut D) -> Result<DeviceCapabilities> {
    let caps = device
        .query_capabilities()
        .map_err(|err| CaptureError::UnsupportedDevice(format!("not a V4L2 device: {err}")))?;

    if !caps.can_capture {
        return Err(CaptureError::UnsupportedDevice(format!(
            "{} is no video capture device",
            caps.card
        )));
    }
    if !caps.can_stream {
        return Err(CaptureError::UnsupportedDevice(format!(
            "{} does not support streaming i/o",
            caps.card
        )));
    }

    info!(card = %caps.card, driver = %caps.driver, bus = %caps.bus_info, "device capabilities");
    Ok(caps)
}

/// Settle on the capture format.
///
/// With `force` the crop rectangle is reset (best effort) and `desired` is
/// set; otherwise the device's current format is kept. Either way the
/// returned format has `stride` and `size` clamped.
pub fn negotiate_format<D: CaptureDevice>(
    device: &mut D,
    desired: &Format,
    force: bool,
) -> Result<Format> {
    let actual = if force {
        if let Err(err) = device.reset_crop() {
            debug!(error = %err, "crop reset not supported, ignoring");
        }
        let actual = device
            .set_format(desired)
            .map_err(CaptureError::FormatRejected)?;
        if actual.width != desired.width
            || actual.height != desired.height
            || actual.fourcc != desired.fourcc
        {
            warn!(
                requested = %format_args!("{}x{} {}", desired.width, desired.height, desired.fourcc),
                actual = %format_args!("{}x{} {}", actual.width, actual.height, actual.fourcc),
                "driver adjusted the requested format"
            );
        }
        actual
    } else {
        device.format().map_err(CaptureError::FormatRejected)?
    };

    let clamped = actual.clone().clamped();
    if clamped != actual {
        debug!(
            stride = clamped.stride,
            size = clamped.size,
            "clamped misreported stride/size"
        );
    }
    info!(
        width = clamped.width,
        height = clamped.height,
        fourcc = %clamped.fourcc,
        stride = clamped.stride,
        size = clamped.size,
        "negotiated format"
    );
    Ok(clamped)
}
