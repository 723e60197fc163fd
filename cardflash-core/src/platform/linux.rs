use crate::device::{TargetDevice, device_name};
use anyhow::{Context, Result};
use log::debug;
use nix::ioctl_read;
use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::path::Path;

ioctl_read!(blkgetsize64, 0x12, 114, u64);

/// Returns the capacity of a block device in bytes.
///
/// The device size is not visible through `metadata().len()` for block
/// special files, so it is queried with the `BLKGETSIZE64` ioctl.
pub fn device_size(path: &Path) -> Result<u64> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut size_bytes: u64 = 0;
    unsafe {
        blkgetsize64(file.as_raw_fd(), &mut size_bytes)
            .with_context(|| format!("BLKGETSIZE64 failed on {}", path.display()))?;
    }
    Ok(size_bytes)
}

/// Lists the mount points of every mounted filesystem that lives on `path`
/// or one of its partitions.
pub fn mounted_children(path: &Path) -> Vec<String> {
    let disks = sysinfo::Disks::new_with_refreshed_list();
    let base_name = device_name(path);

    let mut mount_points = Vec::new();
    for disk in disks.iter() {
        let disk_name = device_name(Path::new(disk.name()));
        if disk_name.starts_with(&base_name) {
            let mp = disk.mount_point().to_string_lossy().to_string();
            if !mp.is_empty() {
                mount_points.push(mp);
            }
        }
    }
    mount_points.sort();
    mount_points
}

/// Gathers the information shown to the user before a destructive operation.
///
/// Size and mount lookups are best-effort: a failure leaves the field empty
/// instead of aborting, since the flash itself re-checks what it needs.
pub fn probe_device(path: &Path) -> TargetDevice {
    let mut device = TargetDevice::new(path);
    match device_size(path) {
        Ok(size) => device.size_bytes = size,
        Err(e) => debug!("Could not query size of {}: {:#}", path.display(), e),
    }
    device.mount_points = mounted_children(path);
    device
}
