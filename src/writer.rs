//! PPM frame writer.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::convert::RgbImage;
use crate::traits::{CaptureError, Result};

/// Build the ASCII PPM header stamped with the capture time.
///
/// The comment line carries the seconds and milliseconds of `timestamp`,
/// each zero-padded to ten digits.
#[must_use]
pub fn ppm_header(width: u32, height: u32, timestamp: Duration) -> String {
    format!(
        "P6\n#{:010} sec {:010} msec \n{width} {height}\n255\n",
        timestamp.as_secs(),
        timestamp.subsec_millis()
    )
}

/// File name for frame number `frame`.
#[must_use]
pub fn frame_file_name(frame: u64) -> String {
    format!("test{frame:08}.ppm")
}

/// Serialize `image` as a binary PPM into `out`.
///
/// `write_all` keeps writing after short writes and retries interrupted
/// ones, so either every byte lands or an error is returned.
pub fn write_ppm<W: Write>(out: &mut W, image: &RgbImage, timestamp: Duration) -> io::Result<()> {
    let header = ppm_header(image.width(), image.height(), timestamp);
    out.write_all(header.as_bytes())?;
    out.write_all(image.as_bytes())?;
    out.flush()
}

/// Writes one PPM file per frame into an output directory.
#[derive(Debug, Clone)]
pub struct FrameWriter {
    dir: PathBuf,
}

impl FrameWriter {
    /// Create a writer for `dir`, creating the directory if needed.
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| CaptureError::WriteFailed {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    /// Output directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path the given frame number is written to.
    #[must_use]
    pub fn path_for(&self, frame: u64) -> PathBuf {
        self.dir.join(frame_file_name(frame))
    }

    /// Write `image` as frame number `frame`.
    ///
    /// The data goes to a `.part` file that is renamed into place once
    /// complete. On failure the partial file is removed.
    pub fn write(&self, image: &RgbImage, frame: u64, timestamp: Duration) -> Result<PathBuf> {
        let path = self.path_for(frame);
        let mut partial = path.clone().into_os_string();
        partial.push(".part");
        let partial = PathBuf::from(partial);

        let result = File::create(&partial)
            .and_then(|mut file| write_ppm(&mut file, image, timestamp))
            .and_then(|()| fs::rename(&partial, &path));

        if let Err(source) = result {
            if let Err(err) = fs::remove_file(&partial) {
                debug!(path = %partial.display(), error = %err, "could not remove partial frame");
            }
            return Err(CaptureError::WriteFailed { path, source });
        }

        debug!(path = %path.display(), bytes = image.as_bytes().len(), "frame written");
        Ok(path)
    }
}
