//! Best-effort release of a device's mounted partitions before writing.
use crate::device::{DeviceFamily, device_name};
use crate::system::{System, tools};
use log::{debug, info};
use std::path::Path;

/// Unmounts every node in `dev_dir` matched by the family-specific glob for
/// `device` (`sdb*` or `mmcblk0p*`).
///
/// Nothing here is fatal: a node that was not mounted, or a listing that
/// cannot be read, is logged and skipped. Returns the nodes that were
/// successfully unmounted.
pub fn unmount_children<S: System + ?Sized>(
    system: &S,
    device: &Path,
    dev_dir: &Path,
) -> Vec<String> {
    let family = DeviceFamily::of(device);
    let base_name = device_name(device);

    let mut candidates = match system.block_devices(dev_dir) {
        Ok(names) => names
            .into_iter()
            .filter(|name| family.matches_unmount_glob(&base_name, name))
            .collect::<Vec<_>>(),
        Err(e) => {
            debug!("Could not list {}: {}", dev_dir.display(), e);
            return Vec::new();
        }
    };
    candidates.sort();

    let mut released = Vec::new();
    for name in candidates {
        let node = dev_dir.join(&name);
        let node_str = node.to_string_lossy().into_owned();
        match system.run(tools::UMOUNT, &[node_str.as_str()]) {
            Ok(out) if out.success() => {
                info!("Unmounted {}", node_str);
                released.push(node_str);
            }
            Ok(out) => debug!("umount {} exited with {:?}: {}", node_str, out.code, out.stderr),
            Err(e) => debug!("Could not run umount on {}: {}", node_str, e),
        }
    }
    released
}
