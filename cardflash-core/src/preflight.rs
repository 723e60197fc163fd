//! Checks that must pass before any device is touched.
use crate::error::{Error, Result};
use crate::system::{System, missing_tools};
#[cfg(unix)]
use std::os::unix::fs::FileTypeExt;
use std::path::Path;

/// Fails unless the process runs with an effective uid of 0.
#[cfg(unix)]
pub fn require_root() -> Result<()> {
    if nix::unistd::geteuid().is_root() {
        Ok(())
    } else {
        Err(Error::NotRoot)
    }
}

/// Fails unless `path` exists and is a regular file.
pub fn require_image(path: &Path) -> Result<u64> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => Ok(meta.len()),
        _ => Err(Error::ImageNotFound(path.to_path_buf())),
    }
}

/// Fails unless `path` exists and is a block-special file.
pub fn require_block_device(path: &Path) -> Result<()> {
    #[cfg(unix)]
    let is_block = std::fs::metadata(path)
        .map(|meta| meta.file_type().is_block_device())
        .unwrap_or(false);
    #[cfg(not(unix))]
    let is_block = false;

    if is_block {
        Ok(())
    } else {
        Err(Error::NotBlockDevice(path.to_path_buf()))
    }
}

/// Fails with every missing tool listed if any of `required` is absent.
pub fn require_tools<S: System + ?Sized>(system: &S, required: &[&str]) -> Result<()> {
    let missing = missing_tools(system, required);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::MissingTools(missing))
    }
}

/// Fails if an image of `image_size` bytes does not fit on a device of
/// `device_size` bytes. A size of 0 means the capacity is unknown and passes.
pub fn require_capacity(path: &Path, image_size: u64, device_size: u64) -> Result<()> {
    if device_size != 0 && image_size > device_size {
        return Err(Error::DeviceTooSmall {
            path: path.to_path_buf(),
            image: image_size,
            device: device_size,
        });
    }
    Ok(())
}
