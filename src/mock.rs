//! Mock device implementation for testing without hardware.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::rc::Rc;
use std::time::Duration;

use crate::traits::{CaptureDevice, Dequeued, DeviceCapabilities, Format, FourCC};

/// Scripted outcome of one readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitEvent {
    /// A buffer is ready.
    Ready,
    /// The wait window elapsed with nothing ready.
    Timeout,
    /// The wait was interrupted by a signal.
    Interrupted,
    /// The wait failed with the given errno.
    Fail(i32),
}

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// SMPTE color bars pattern.
    ColorBars,
    /// Horizontal gradient from dark to light.
    Gradient,
    /// Solid color with specified Y, U, V values.
    Solid(u8, u8, u8),
}

/// Mock device for testing without hardware.
///
/// Every trait call is recorded in a log that outlives the device, so tests
/// can inspect it after the device has been moved into a session.
pub struct MockDevice {
    capabilities: DeviceCapabilities,
    format: Format,
    pattern: TestPattern,
    granted: Option<u32>,
    buffer_count: u32,
    mapped: u32,
    queued: VecDeque<u32>,
    streaming: bool,
    closed: bool,
    wait_script: VecDeque<WaitEvent>,
    dequeue_errors: VecDeque<i32>,
    failures: HashMap<&'static str, i32>,
    map_fail_at: Option<u32>,
    calls: Rc<RefCell<Vec<&'static str>>>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// Create a new mock device with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            capabilities: DeviceCapabilities {
                driver: "mock".to_owned(),
                card: "Mock Camera".to_owned(),
                bus_info: "mock:0".to_owned(),
                can_capture: true,
                can_stream: true,
            },
            format: Format::new(640, 480, FourCC::YUYV),
            pattern: TestPattern::ColorBars,
            granted: None,
            buffer_count: 0,
            mapped: 0,
            queued: VecDeque::new(),
            streaming: false,
            closed: false,
            wait_script: VecDeque::new(),
            dequeue_errors: VecDeque::new(),
            failures: HashMap::new(),
            map_fail_at: None,
            calls: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Set the format for this mock device.
    #[must_use]
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Set the capabilities for this mock device.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: DeviceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Set the pattern written into mapped buffers.
    #[must_use]
    pub const fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Grant `count` buffers regardless of how many are requested.
    #[must_use]
    pub const fn with_granted_buffers(mut self, count: u32) -> Self {
        self.granted = Some(count);
        self
    }

    /// Script readiness waits. Once the script runs out, waits report
    /// ready whenever a buffer is queued while streaming.
    #[must_use]
    pub fn with_wait_script<I: IntoIterator<Item = WaitEvent>>(mut self, events: I) -> Self {
        self.wait_script = events.into_iter().collect();
        self
    }

    /// Fail the next dequeues with these errnos, in order.
    #[must_use]
    pub fn with_dequeue_errors<I: IntoIterator<Item = i32>>(mut self, errnos: I) -> Self {
        self.dequeue_errors = errnos.into_iter().collect();
        self
    }

    /// Make `operation` fail with `EIO`.
    #[must_use]
    pub fn failing(self, operation: &'static str) -> Self {
        self.failing_with(operation, libc::EIO)
    }

    /// Make `operation` fail with `errno`.
    #[must_use]
    pub fn failing_with(mut self, operation: &'static str, errno: i32) -> Self {
        self.failures.insert(operation, errno);
        self
    }

    /// Make mapping buffer `index` fail.
    #[must_use]
    pub const fn failing_map_at(mut self, index: u32) -> Self {
        self.map_fail_at = Some(index);
        self
    }

    /// Make `operation` fail with `EIO` from now on.
    pub fn fail(&mut self, operation: &'static str) {
        self.failures.insert(operation, libc::EIO);
    }

    /// Shared handle to the call log.
    pub fn call_log(&self) -> Rc<RefCell<Vec<&'static str>>> {
        Rc::clone(&self.calls)
    }

    /// Operations called so far, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.borrow().clone()
    }

    /// Buffers currently mapped.
    pub const fn mapped(&self) -> u32 {
        self.mapped
    }

    /// Buffers currently queued to the device.
    pub fn queued(&self) -> usize {
        self.queued.len()
    }

    /// Whether streaming is on.
    pub const fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Whether the device was closed.
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    fn record(&self, operation: &'static str) -> io::Result<()> {
        self.calls.borrow_mut().push(operation);
        match self.failures.get(operation) {
            Some(errno) => Err(io::Error::from_raw_os_error(*errno)),
            None => Ok(()),
        }
    }
}

impl CaptureDevice for MockDevice {
    type Region = Vec<u8>;

    fn query_capabilities(&mut self) -> io::Result<DeviceCapabilities> {
        self.record("query_capabilities")?;
        Ok(self.capabilities.clone())
    }

    fn reset_crop(&mut self) -> io::Result<()> {
        self.record("reset_crop")
    }

    fn format(&mut self) -> io::Result<Format> {
        self.record("format")?;
        Ok(self.format.clone())
    }

    fn set_format(&mut self, format: &Format) -> io::Result<Format> {
        self.record("set_format")?;
        self.format = format.clone();
        Ok(self.format.clone())
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        self.record("request_buffers")?;
        self.buffer_count = self.granted.unwrap_or(count);
        Ok(self.buffer_count)
    }

    fn map_buffer(&mut self, index: u32) -> io::Result<Vec<u8>> {
        self.record("map_buffer")?;
        if self.map_fail_at == Some(index) || index >= self.buffer_count {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        self.mapped += 1;
        Ok(generate_test_frame(&self.format.clone().clamped(), self.pattern))
    }

    fn unmap_buffer(&mut self, _region: Vec<u8>) -> io::Result<()> {
        self.record("unmap_buffer")?;
        self.mapped = self.mapped.saturating_sub(1);
        Ok(())
    }

    fn queue_buffer(&mut self, index: u32) -> io::Result<()> {
        self.record("queue_buffer")?;
        if index >= self.buffer_count || self.queued.contains(&index) {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        self.queued.push_back(index);
        Ok(())
    }

    fn dequeue_buffer(&mut self) -> io::Result<Dequeued> {
        self.record("dequeue_buffer")?;
        if let Some(errno) = self.dequeue_errors.pop_front() {
            return Err(io::Error::from_raw_os_error(errno));
        }
        if !self.streaming {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        let index = self
            .queued
            .pop_front()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EAGAIN))?;
        Ok(Dequeued {
            index,
            bytes_used: self.format.clone().clamped().size,
        })
    }

    fn stream_on(&mut self) -> io::Result<()> {
        self.record("stream_on")?;
        self.streaming = true;
        Ok(())
    }

    fn stream_off(&mut self) -> io::Result<()> {
        self.record("stream_off")?;
        self.streaming = false;
        self.queued.clear();
        Ok(())
    }

    fn wait_ready(&mut self, _timeout: Duration) -> io::Result<bool> {
        self.record("wait_ready")?;
        match self.wait_script.pop_front() {
            Some(WaitEvent::Ready) => Ok(true),
            Some(WaitEvent::Timeout) => Ok(false),
            Some(WaitEvent::Interrupted) => Err(io::Error::from_raw_os_error(libc::EINTR)),
            Some(WaitEvent::Fail(errno)) => Err(io::Error::from_raw_os_error(errno)),
            None => Ok(self.streaming && !self.queued.is_empty()),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        self.closed = true;
        self.record("close")
    }
}

/// Generate test frame data based on pattern.
fn generate_test_frame(format: &Format, pattern: TestPattern) -> Vec<u8> {
    let mut data = vec![0u8; format.size as usize];

    match pattern {
        TestPattern::ColorBars => generate_color_bars(&mut data, format),
        TestPattern::Gradient => generate_gradient(&mut data, format),
        TestPattern::Solid(y, u, v) => fill_rows(&mut data, format, |_| (y, u, v)),
    }

    data
}

/// Write one `(Y, U, V)` per pixel pair, honoring the stride.
fn fill_rows<F: Fn(u32) -> (u8, u8, u8)>(data: &mut [u8], format: &Format, pair_color: F) {
    let line = format.width as usize * 2;
    let stride = (format.stride as usize).max(line).max(1);
    for row in data.chunks_mut(stride).take(format.height as usize) {
        let row_len = row.len().min(line);
        let pixels = row.get_mut(..row_len).unwrap_or_default();
        for (pair, quad) in pixels.chunks_exact_mut(4).enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let (y, u, v) = pair_color(pair as u32 * 2);
            quad.copy_from_slice(&[y, u, y, v]);
        }
    }
}

/// Generate YUYV color bars pattern.
fn generate_color_bars(data: &mut [u8], format: &Format) {
    // 8 color bars: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
    let bars: [(u8, u8, u8); 8] = [
        (235, 128, 128), // White
        (210, 16, 146),  // Yellow
        (170, 166, 16),  // Cyan
        (145, 54, 34),   // Green
        (106, 202, 222), // Magenta
        (81, 90, 240),   // Red
        (41, 240, 110),  // Blue
        (16, 128, 128),  // Black
    ];

    let bar_width = (format.width / 8).max(1);
    fill_rows(data, format, |x| {
        let bar_idx = (x / bar_width).min(7) as usize;
        bars.get(bar_idx).copied().unwrap_or((16, 128, 128))
    });
}

/// Generate YUYV horizontal gradient pattern.
fn generate_gradient(data: &mut [u8], format: &Format) {
    let width = format.width.max(1);
    fill_rows(data, format, |x| {
        #[allow(clippy::cast_possible_truncation)]
        let y_val = ((x * 255) / width) as u8;
        (y_val, 128, 128)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_device_creation() {
        let mut device = MockDevice::new();
        let caps = device.query_capabilities().expect("caps");
        assert_eq!(caps.driver, "mock");
        assert!(caps.can_capture);
        assert!(caps.can_stream);
    }

    #[test]
    fn test_mock_device_format() {
        let mut device = MockDevice::new();
        let format = device.format().expect("format should succeed");
        assert_eq!(format.width, 640);
        assert_eq!(format.height, 480);

        let new_format = Format::new(1280, 720, FourCC::YUYV);
        let actual = device.set_format(&new_format).expect("set_format should succeed");
        assert_eq!(actual.width, 1280);
        assert_eq!(actual.height, 720);
    }

    #[test]
    fn test_mock_queue_cycle() {
        let mut device = MockDevice::new();
        assert_eq!(device.request_buffers(4).expect("request"), 4);
        device.queue_buffer(2).expect("queue");
        device.queue_buffer(0).expect("queue");
        assert!(device.queue_buffer(2).is_err(), "double queue must fail");

        let err = device.dequeue_buffer().expect_err("not streaming yet");
        assert_eq!(err.raw_os_error(), Some(libc::EINVAL));

        device.stream_on().expect("stream on");
        assert!(device.wait_ready(Duration::ZERO).expect("wait"));
        assert_eq!(device.dequeue_buffer().expect("dequeue").index, 2);
        assert_eq!(device.dequeue_buffer().expect("dequeue").index, 0);

        let err = device.dequeue_buffer().expect_err("nothing queued");
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert!(!device.wait_ready(Duration::ZERO).expect("wait"));
    }

    #[test]
    fn test_color_bars_pattern() {
        let format = Format::new(640, 480, FourCC::YUYV);
        let data = generate_test_frame(&format, TestPattern::ColorBars);

        // Check frame size
        assert_eq!(data.len(), (640 * 480 * 2) as usize);

        // First bar should be white (Y=235)
        assert_eq!(data[0], 235);
        // Last bar should be black (Y=16)
        assert_eq!(data[639 * 2], 16);
    }

    #[test]
    fn test_gradient_pattern() {
        let format = Format::new(640, 480, FourCC::YUYV);
        let data = generate_test_frame(&format, TestPattern::Gradient);

        // Left edge should be dark
        assert!(data[0] < 10);

        // Right edge should be bright (check last row, last pixel)
        let last_row_start = (479 * 640 * 2) as usize;
        let last_pixel_y = data[last_row_start + 638 * 2];
        assert!(last_pixel_y > 200);
    }

    #[test]
    fn test_solid_pattern() {
        let format = Format::new(64, 64, FourCC::YUYV);
        let data = generate_test_frame(&format, TestPattern::Solid(128, 64, 192));

        // All Y values should be 128
        assert_eq!(data[0], 128);
        assert_eq!(data[2], 128);

        // U should be 64, V should be 192
        assert_eq!(data[1], 64);
        assert_eq!(data[3], 192);
    }

    #[test]
    fn test_padded_rows_leave_padding_untouched() {
        let mut format = Format::new(4, 2, FourCC::YUYV);
        format.stride = 12;
        format.size = 24;
        let data = generate_test_frame(&format, TestPattern::Solid(200, 1, 2));

        assert_eq!(&data[..8], &[200, 1, 200, 2, 200, 1, 200, 2]);
        assert_eq!(&data[8..12], &[0, 0, 0, 0]);
        assert_eq!(data[12], 200);
    }
}
