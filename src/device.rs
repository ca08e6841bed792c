//! V4L2 device implementation using the v4l crate.
//!
//! The device owns its descriptor and issues every ioctl itself through
//! v4l's `v4l2` layer and `v4l_sys` structures, so each step of the buffer
//! lifecycle and the final close report their errors to the session.
#![allow(unsafe_code)]

use std::ffi::c_void;
use std::fs::OpenOptions;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, IntoRawFd, OwnedFd, RawFd};
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};
use std::slice;
use std::time::Duration;

use tracing::{debug, warn};
use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::format::FieldOrder;
use v4l::memory::Memory;
use v4l::v4l2;
use v4l::v4l2::vidioc;
use v4l::v4l_sys::{
    v4l2_buffer, v4l2_capability, v4l2_crop, v4l2_cropcap, v4l2_format, v4l2_requestbuffers,
};

use crate::traits::{CaptureDevice, CaptureError, Dequeued, DeviceCapabilities, Format, FourCC, Result};

/// Issue an ioctl, retrying while it is interrupted by a signal.
macro_rules! xioctl {
    ($fd:expr, $request:expr, $arg:expr) => {{
        loop {
            // SAFETY: `$arg` is a live, exclusively borrowed struct of the
            // type `$request` expects, and `$fd` is an open V4L2 descriptor.
            let result = unsafe { v4l2::ioctl($fd, $request, ptr::from_mut($arg).cast::<c_void>()) };
            match result {
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                other => break other,
            }
        }
    }};
}

/// Buffer memory mapped from the device.
///
/// Unmapped on drop; [`MmapRegion::unmap`] does the same but reports errors.
#[derive(Debug)]
pub struct MmapRegion {
    ptr: NonNull<u8>,
    len: usize,
}

impl MmapRegion {
    /// Unmap the region, reporting failure.
    pub fn unmap(self) -> io::Result<()> {
        let region = mem::ManuallyDrop::new(self);
        // SAFETY: `ptr`/`len` describe a live mapping; `ManuallyDrop` keeps
        // `Drop` from unmapping it a second time.
        unsafe { v4l2::munmap(region.ptr.as_ptr().cast::<c_void>(), region.len) }
    }
}

impl AsRef<[u8]> for MmapRegion {
    fn as_ref(&self) -> &[u8] {
        // SAFETY: the mapping is readable for `len` bytes until unmapped,
        // which needs ownership of `self`.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        // SAFETY: see `unmap`; this runs at most once per mapping.
        if let Err(err) = unsafe { v4l2::munmap(self.ptr.as_ptr().cast::<c_void>(), self.len) } {
            warn!(error = %err, "munmap on drop failed");
        }
    }
}

/// V4L2 capture device backed by an owned descriptor.
pub struct V4L2Device {
    path: PathBuf,
    fd: Option<OwnedFd>,
}

impl V4L2Device {
    /// Open a character device such as `/dev/video0`, read-write and
    /// non-blocking.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let metadata = std::fs::metadata(&path).map_err(|err| CaptureError::NotFound {
            path: path.clone(),
            reason: err.to_string(),
        })?;
        if !metadata.file_type().is_char_device() {
            return Err(CaptureError::NotFound {
                path,
                reason: "not a character device".to_owned(),
            });
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&path)
            .map_err(|source| CaptureError::OpenFailed {
                path: path.clone(),
                source,
            })?;
        debug!(path = %path.display(), "device opened");

        Ok(Self {
            path,
            fd: Some(OwnedFd::from(file)),
        })
    }

    /// Device path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn fd(&self) -> io::Result<RawFd> {
        self.fd
            .as_ref()
            .map(AsRawFd::as_raw_fd)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EBADF))
    }

    fn get_format(&self) -> io::Result<v4l2_format> {
        let mut fmt = v4l2_format {
            type_: Type::VideoCapture as u32,
            // SAFETY: plain C struct; all-zero is valid.
            ..unsafe { mem::zeroed() }
        };
        xioctl!(self.fd()?, vidioc::VIDIOC_G_FMT, &mut fmt)?;
        Ok(fmt)
    }
}

/// NUL-terminated fixed-size field to `String`.
fn c_string(bytes: &[u8]) -> String {
    let text = bytes.split(|&b| b == 0).next().unwrap_or_default();
    String::from_utf8_lossy(text).into_owned()
}

fn to_format(fmt: &v4l2_format) -> Format {
    // SAFETY: `type_` is VIDEO_CAPTURE, for which the driver fills `pix`.
    let pix = unsafe { fmt.fmt.pix };
    Format {
        width: pix.width,
        height: pix.height,
        fourcc: FourCC::from(v4l::FourCC::from(pix.pixelformat)),
        stride: pix.bytesperline,
        size: pix.sizeimage,
    }
}

fn mmap_buffer(index: u32) -> v4l2_buffer {
    v4l2_buffer {
        index,
        type_: Type::VideoCapture as u32,
        memory: Memory::Mmap as u32,
        // SAFETY: v4l2_buffer is a plain C struct; all-zero is valid.
        ..unsafe { mem::zeroed() }
    }
}

impl CaptureDevice for V4L2Device {
    type Region = MmapRegion;

    fn query_capabilities(&mut self) -> io::Result<DeviceCapabilities> {
        // SAFETY: plain C struct; all-zero is valid.
        let mut raw: v4l2_capability = unsafe { mem::zeroed() };
        xioctl!(self.fd()?, vidioc::VIDIOC_QUERYCAP, &mut raw)?;

        // Prefer the per-node caps when the driver reports them.
        let mut flags = Flags::from_bits_truncate(raw.capabilities);
        if flags.contains(Flags::DEVICE_CAPS) {
            flags = Flags::from_bits_truncate(raw.device_caps);
        }

        Ok(DeviceCapabilities {
            driver: c_string(&raw.driver),
            card: c_string(&raw.card),
            bus_info: c_string(&raw.bus_info),
            can_capture: flags.contains(Flags::VIDEO_CAPTURE),
            can_stream: flags.contains(Flags::STREAMING),
        })
    }

    fn reset_crop(&mut self) -> io::Result<()> {
        let fd = self.fd()?;
        let mut cropcap = v4l2_cropcap {
            type_: Type::VideoCapture as u32,
            // SAFETY: plain C struct; all-zero is valid.
            ..unsafe { mem::zeroed() }
        };
        xioctl!(fd, vidioc::VIDIOC_CROPCAP, &mut cropcap)?;

        let mut crop = v4l2_crop {
            type_: Type::VideoCapture as u32,
            c: cropcap.defrect,
        };
        xioctl!(fd, vidioc::VIDIOC_S_CROP, &mut crop)
    }

    fn format(&mut self) -> io::Result<Format> {
        Ok(to_format(&self.get_format()?))
    }

    fn set_format(&mut self, format: &Format) -> io::Result<Format> {
        let mut fmt = self.get_format()?;
        {
            // SAFETY: G_FMT on VIDEO_CAPTURE filled `pix`.
            let pix = unsafe { &mut fmt.fmt.pix };
            pix.width = format.width;
            pix.height = format.height;
            pix.pixelformat = v4l::FourCC::from(format.fourcc).into();
            pix.field = FieldOrder::Progressive as u32;
            // Let the driver compute line and image sizes.
            pix.bytesperline = 0;
            pix.sizeimage = 0;
        }
        xioctl!(self.fd()?, vidioc::VIDIOC_S_FMT, &mut fmt)?;
        Ok(to_format(&fmt))
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        let fd = self.fd()?;
        let mut req = v4l2_requestbuffers {
            count,
            type_: Type::VideoCapture as u32,
            memory: Memory::Mmap as u32,
            // SAFETY: plain C struct; all-zero is valid.
            ..unsafe { mem::zeroed() }
        };
        xioctl!(fd, vidioc::VIDIOC_REQBUFS, &mut req)?;
        Ok(req.count)
    }

    fn map_buffer(&mut self, index: u32) -> io::Result<MmapRegion> {
        let fd = self.fd()?;
        let mut buf = mmap_buffer(index);
        xioctl!(fd, vidioc::VIDIOC_QUERYBUF, &mut buf)?;

        let len = buf.length as usize;
        // SAFETY: QUERYBUF on an MMAP buffer fills the `offset` member.
        let offset = unsafe { buf.m.offset };

        // SAFETY: maps `len` bytes of the device at the offset the driver
        // handed out for this buffer.
        #[allow(clippy::cast_possible_wrap)]
        let addr = unsafe {
            v4l2::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                offset as libc::off_t,
            )
        }?;
        let ptr = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))?;

        Ok(MmapRegion { ptr, len })
    }

    fn unmap_buffer(&mut self, region: MmapRegion) -> io::Result<()> {
        region.unmap()
    }

    fn queue_buffer(&mut self, index: u32) -> io::Result<()> {
        let fd = self.fd()?;
        let mut buf = mmap_buffer(index);
        xioctl!(fd, vidioc::VIDIOC_QBUF, &mut buf)
    }

    fn dequeue_buffer(&mut self) -> io::Result<Dequeued> {
        let fd = self.fd()?;
        let mut buf = mmap_buffer(0);
        xioctl!(fd, vidioc::VIDIOC_DQBUF, &mut buf)?;
        Ok(Dequeued {
            index: buf.index,
            bytes_used: buf.bytesused,
        })
    }

    fn stream_on(&mut self) -> io::Result<()> {
        let fd = self.fd()?;
        let mut typ = Type::VideoCapture as u32;
        xioctl!(fd, vidioc::VIDIOC_STREAMON, &mut typ)
    }

    fn stream_off(&mut self) -> io::Result<()> {
        let fd = self.fd()?;
        let mut typ = Type::VideoCapture as u32;
        xioctl!(fd, vidioc::VIDIOC_STREAMOFF, &mut typ)
    }

    fn wait_ready(&mut self, timeout: Duration) -> io::Result<bool> {
        let mut pollfd = libc::pollfd {
            fd: self.fd()?,
            events: libc::POLLIN,
            revents: 0,
        };
        let millis = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);

        // SAFETY: one valid pollfd, count 1.
        let ready = unsafe { libc::poll(&mut pollfd, 1, millis) };
        match ready {
            -1 => Err(io::Error::last_os_error()),
            0 => Ok(false),
            _ => Ok(true),
        }
    }

    /// Close the descriptor. The handle is cleared even when `close(2)`
    /// fails, and a second call does nothing.
    fn close(&mut self) -> io::Result<()> {
        let Some(fd) = self.fd.take() else {
            return Ok(());
        };
        // SAFETY: `into_raw_fd` hands over sole ownership, so the descriptor
        // is closed exactly once, here.
        let rc = unsafe { libc::close(fd.into_raw_fd()) };
        if rc == -1 {
            return Err(io::Error::last_os_error());
        }
        debug!(path = %self.path.display(), "device closed");
        Ok(())
    }
}
