//! Contains the logic for writing an image file to a device.
//!
//! A flash session runs three stages in order:
//! 1.  Unmounting every mounted partition of the target device.
//! 2.  Copying the image onto the device with periodic durability barriers.
//! 3.  Optionally reading both back and comparing them byte for byte.
//!
//! The stages are exposed separately ([`FlashSession::write`],
//! [`FlashSession::verify`]) over any reader and writer, and combined for
//! real block devices by [`FlashSession::run`].
use crate::copy::{self, CopyOptions, DurableWrite};
use crate::error::{Error, Result};
use crate::system::System;
use crate::unmount;
use crate::verify::{self, Verification};
use log::{info, warn};
use std::fs::{File, OpenOptions};
use std::io::Read;
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// What a completed flash did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlashReport {
    pub image_size: u64,
    pub bytes_written: u64,
    /// A failed verification does not undo the write, so it is reported here
    /// rather than as an error.
    pub verification: Verification,
}

pub struct FlashSession {
    image_path: PathBuf,
    device_path: PathBuf,
    verify: bool,
    running: Arc<AtomicBool>,
    copy_options: CopyOptions,
    dev_dir: PathBuf,
}

impl FlashSession {
    /// Creates a session writing `image_path` to `device_path`.
    ///
    /// `running` is the cancellation flag: storing `false` makes the copy stop
    /// after the current block.
    pub fn new(
        image_path: &Path,
        device_path: &Path,
        verify: bool,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            image_path: image_path.to_path_buf(),
            device_path: device_path.to_path_buf(),
            verify,
            running,
            copy_options: CopyOptions::direct(),
            dev_dir: PathBuf::from("/dev"),
        }
    }

    pub fn with_copy_options(mut self, options: CopyOptions) -> Self {
        self.copy_options = options;
        self
    }

    /// Directory searched for the device's partition nodes before writing.
    pub fn with_dev_dir(mut self, dev_dir: &Path) -> Self {
        self.dev_dir = dev_dir.to_path_buf();
        self
    }

    /// Copies `image_size` bytes of `image` to `device`.
    pub fn write<R, W, F>(
        &self,
        image: &mut R,
        image_size: u64,
        device: &mut W,
        on_progress: F,
    ) -> Result<u64>
    where
        R: Read + ?Sized,
        W: DurableWrite,
        F: FnMut(u64),
    {
        copy::copy_image(
            image,
            device,
            image_size,
            &self.copy_options,
            &self.running,
            on_progress,
        )
    }

    /// Compares the first `bytes_written` bytes of `image` and `device`.
    pub fn verify<A, B, F>(
        &self,
        image: &mut A,
        device: &mut B,
        bytes_written: u64,
        on_progress: F,
    ) -> Result<Verification>
    where
        A: Read + ?Sized,
        B: Read + ?Sized,
        F: FnMut(u64),
    {
        verify::compare(image, device, bytes_written, &self.running, on_progress)
    }

    /// Flashes the image onto the block device.
    ///
    /// # Arguments
    ///
    /// * `system` - Used to unmount the device's partitions before writing.
    /// * `on_write_start` - Closure called when writing begins, providing the
    ///   total image size.
    /// * `on_write_progress` - Closure called with the number of bytes written.
    /// * `on_verify_start` - Closure called when verification begins, providing
    ///   the number of bytes to compare.
    /// * `on_verify_progress` - Closure called with the number of bytes verified.
    ///
    /// # Errors
    ///
    /// This function will return an error if:
    /// - The image file or device cannot be opened.
    /// - An I/O error occurs while writing, or while reading the image back.
    /// - The operation is cancelled.
    ///
    /// A device that cannot be read back is a failed verification, not an
    /// error: by then the write has completed.
    pub fn run<S, F1, F2>(
        &self,
        system: &S,
        on_write_start: impl FnOnce(u64),
        on_write_progress: F1,
        on_verify_start: impl FnOnce(u64),
        on_verify_progress: F2,
    ) -> Result<FlashReport>
    where
        S: System + ?Sized,
        F1: FnMut(u64),
        F2: FnMut(u64),
    {
        let released = unmount::unmount_children(system, &self.device_path, &self.dev_dir);
        if !released.is_empty() {
            info!("Released {} mounted partition(s)", released.len());
        }

        let mut image_file = open(&self.image_path, OpenOptions::new().read(true))?;
        let image_size = image_file.metadata()?.len();

        let bytes_written = {
            let mut options = OpenOptions::new();
            options.write(true);
            #[cfg(unix)]
            if self.copy_options.alignment > 1 {
                // Use O_DIRECT for unbuffered I/O
                options.custom_flags(libc::O_DIRECT);
            }
            let mut device_file = open(&self.device_path, &options)?;

            on_write_start(image_size);
            self.write(&mut image_file, image_size, &mut device_file, on_write_progress)?
        };

        // Commit anything still held in the kernel's caches as well.
        #[cfg(unix)]
        nix::unistd::sync();
        info!("Wrote {} bytes to {}", bytes_written, self.device_path.display());

        let verification = if self.verify {
            let mut image_file = open(&self.image_path, OpenOptions::new().read(true))?;
            match open(&self.device_path, OpenOptions::new().read(true)) {
                Ok(mut device_file) => {
                    on_verify_start(bytes_written);
                    self.verify(
                        &mut image_file,
                        &mut device_file,
                        bytes_written,
                        on_verify_progress,
                    )?
                }
                Err(e) => {
                    warn!("Cannot reopen the device for verification: {e}");
                    Verification::Unreadable {
                        offset: 0,
                        reason: e.to_string(),
                    }
                }
            }
        } else {
            Verification::Skipped
        };

        Ok(FlashReport {
            image_size,
            bytes_written,
            verification,
        })
    }
}

fn open(path: &Path, options: &OpenOptions) -> Result<File> {
    options.open(path).map_err(|source| Error::Open {
        path: path.to_path_buf(),
        source,
    })
}
