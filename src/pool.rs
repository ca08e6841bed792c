//! Memory-mapped buffer pool.
//!
//! The pool is the only owner of buffer memory. Frame views borrow from it,
//! and handing a buffer back to the device needs `&mut` access, so no view
//! can survive a re-queue or [`BufferPool::release`].

use std::io;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::MIN_BUFFER_COUNT;
use crate::traits::{CaptureDevice, CaptureError, Result};

/// One buffer mapped into process memory.
#[derive(Debug)]
pub struct MappedBuffer<R> {
    region: R,
    index: u32,
}

impl<R: AsRef<[u8]>> MappedBuffer<R> {
    /// Mapped length in bytes.
    pub fn len(&self) -> usize {
        self.region.as_ref().len()
    }

    /// Whether the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index the device knows this buffer by.
    pub const fn index(&self) -> u32 {
        self.index
    }
}

/// A filled buffer on loan between dequeue and re-queue.
#[derive(Debug, Clone, Copy)]
pub struct CapturedFrame<'a> {
    /// Payload bytes the device wrote.
    pub data: &'a [u8],
    /// Buffer index.
    pub index: u32,
    /// Wall-clock capture time since the Unix epoch.
    pub timestamp: Duration,
}

impl CapturedFrame<'_> {
    /// Number of payload bytes.
    pub const fn byte_count(&self) -> usize {
        self.data.len()
    }
}

/// Fixed set of buffers shared with the device.
#[derive(Debug)]
pub struct BufferPool<R> {
    buffers: Vec<MappedBuffer<R>>,
}

impl<R: AsRef<[u8]>> BufferPool<R> {
    /// Request `requested` buffers from `device` and map every one granted.
    pub fn allocate<D>(device: &mut D, requested: u32) -> Result<Self>
    where
        D: CaptureDevice<Region = R>,
    {
        let granted = device.request_buffers(requested).map_err(|err| {
            if err.raw_os_error() == Some(libc::EINVAL) {
                CaptureError::MappingUnsupported
            } else {
                CaptureError::RequestBuffers(err)
            }
        })?;

        if granted < MIN_BUFFER_COUNT {
            return Err(CaptureError::InsufficientBuffers { granted });
        }

        let mut pool = Self {
            buffers: Vec::with_capacity(granted as usize),
        };
        for index in 0..granted {
            match device.map_buffer(index) {
                Ok(region) => pool.buffers.push(MappedBuffer { region, index }),
                Err(source) => {
                    pool.release(device);
                    return Err(CaptureError::MapFailed { index, source });
                }
            }
        }

        debug!(requested, granted, "buffers mapped");
        Ok(pool)
    }

    /// Number of mapped buffers.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether the pool holds no buffers (after release).
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Mapped buffers, in index order.
    pub fn buffers(&self) -> &[MappedBuffer<R>] {
        &self.buffers
    }

    /// Hand buffer `index` to the device.
    pub fn queue<D>(&mut self, device: &mut D, index: u32) -> io::Result<()>
    where
        D: CaptureDevice<Region = R>,
    {
        if self.buffer(index).is_none() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("buffer index {index} out of range"),
            ));
        }
        device.queue_buffer(index)
    }

    /// Borrow the payload of a dequeued buffer.
    ///
    /// `bytes_used` is capped at the mapped length. Returns `None` for an
    /// index the pool does not own.
    pub fn frame(&self, index: u32, bytes_used: u32, timestamp: Duration) -> Option<CapturedFrame<'_>> {
        let buffer = self.buffer(index)?;
        let memory = buffer.region.as_ref();
        let used = (bytes_used as usize).min(memory.len());
        Some(CapturedFrame {
            data: memory.get(..used)?,
            index,
            timestamp,
        })
    }

    /// Unmap every buffer. Failures are logged and do not stop the rest.
    pub fn release<D>(&mut self, device: &mut D)
    where
        D: CaptureDevice<Region = R>,
    {
        let count = self.buffers.len();
        for buffer in self.buffers.drain(..) {
            if let Err(err) = device.unmap_buffer(buffer.region) {
                warn!(index = buffer.index, error = %err, "munmap failed");
            }
        }
        self.buffers.shrink_to_fit();
        if count > 0 {
            debug!(count, "buffers released");
        }
    }

    fn buffer(&self, index: u32) -> Option<&MappedBuffer<R>> {
        self.buffers.get(index as usize)
    }
}
