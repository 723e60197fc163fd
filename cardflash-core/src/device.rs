use std::fmt;
use std::path::{Path, PathBuf};

/// How a whole-disk node names its partitions.
///
/// Controllers whose disk names already end in a digit (`mmcblk0`, `nvme0n1`)
/// separate the partition number with a `p`; everything else (`sda`, `sdb`)
/// appends the number directly. Unmount globbing, partition enumeration and
/// base-device extraction all branch on this.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceFamily {
    /// `mmcblk*` and `nvme*`: partitions are `<base>p<N>`.
    Numbered,
    /// Everything else: partitions are `<base><N>`.
    Lettered,
}

impl DeviceFamily {
    /// Classifies a device path by substring match on its name.
    pub fn of(path: &Path) -> Self {
        let path_str = path.to_string_lossy();
        if path_str.contains("mmcblk") || path_str.contains("nvme") {
            DeviceFamily::Numbered
        } else {
            DeviceFamily::Lettered
        }
    }

    /// The text between the base name and the partition number.
    pub fn separator(self) -> &'static str {
        match self {
            DeviceFamily::Numbered => "p",
            DeviceFamily::Lettered => "",
        }
    }

    /// Returns true if `name` is a partition node of the disk named `base_name`.
    pub fn is_child(self, base_name: &str, name: &str) -> bool {
        name.strip_prefix(base_name)
            .and_then(|rest| rest.strip_prefix(self.separator()))
            .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
    }

    /// Returns true if `name` would be matched by the shell glob
    /// `<base><sep>*` used to unmount every child of a device.
    pub fn matches_unmount_glob(self, base_name: &str, name: &str) -> bool {
        name.strip_prefix(base_name)
            .and_then(|rest| rest.strip_prefix(self.separator()))
            .is_some_and(|rest| !rest.is_empty())
    }
}

/// Strips a trailing partition number from a device path
/// (e.g., `/dev/sdb1` -> `/dev/sdb`, `/dev/mmcblk0p1` -> `/dev/mmcblk0`).
///
/// A whole-disk path is returned unchanged.
pub fn base_device(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    match DeviceFamily::of(path) {
        DeviceFamily::Lettered => {
            let trimmed = path_str.trim_end_matches(|c: char| c.is_ascii_digit());
            if trimmed.is_empty() || trimmed.ends_with('/') {
                return path.to_path_buf();
            }
            PathBuf::from(trimmed)
        }
        DeviceFamily::Numbered => {
            let without_digits = path_str.trim_end_matches(|c: char| c.is_ascii_digit());
            if without_digits.len() == path_str.len() {
                return path.to_path_buf();
            }
            if let Some(stem) = without_digits.strip_suffix('p') {
                if stem.ends_with(|c: char| c.is_ascii_digit()) {
                    return PathBuf::from(stem);
                }
            }
            path.to_path_buf()
        }
    }
}

/// The file name of a device node as a string (e.g., `sdb` for `/dev/sdb`).
pub fn device_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// A block device targeted by a flash or repair session.
///
/// Populated by [`crate::platform::probe_device`]; everything apart from the
/// path is informational and used for the confirmation summary.
#[derive(Clone, Debug)]
pub struct TargetDevice {
    /// The system path to the device (e.g., `/dev/sdb` or `/dev/mmcblk0`).
    pub path: PathBuf,
    /// The kernel-provided name of the device (e.g., "sdb").
    pub name: String,
    pub family: DeviceFamily,
    /// The total size of the device in bytes, 0 when it could not be queried.
    pub size_bytes: u64,
    /// Mount points of children of this device that are currently mounted.
    pub mount_points: Vec<String>,
}

impl TargetDevice {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            name: device_name(path),
            family: DeviceFamily::of(path),
            size_bytes: 0,
            mount_points: Vec::new(),
        }
    }

    pub fn size_gb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
    }
}

impl fmt::Display for TargetDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mount_info = if !self.mount_points.is_empty() {
            format!("[Mounted at {}]", self.mount_points.join(", "))
        } else {
            "[Not mounted]".to_string()
        };

        write!(
            f,
            "{:<15} {:.1} GB {}",
            self.path.display(),
            self.size_gb(),
            mount_info
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_is_decided_by_substring() {
        assert_eq!(DeviceFamily::of(Path::new("/dev/mmcblk0")), DeviceFamily::Numbered);
        assert_eq!(DeviceFamily::of(Path::new("/dev/nvme0n1")), DeviceFamily::Numbered);
        assert_eq!(DeviceFamily::of(Path::new("/dev/sdb")), DeviceFamily::Lettered);
        assert_eq!(DeviceFamily::of(Path::new("/dev/vda")), DeviceFamily::Lettered);
    }

    #[test]
    fn base_device_strips_partition_suffix() {
        assert_eq!(base_device(Path::new("/dev/sdb1")), PathBuf::from("/dev/sdb"));
        assert_eq!(base_device(Path::new("/dev/sdb12")), PathBuf::from("/dev/sdb"));
        assert_eq!(base_device(Path::new("/dev/sdb")), PathBuf::from("/dev/sdb"));
        assert_eq!(
            base_device(Path::new("/dev/mmcblk0p1")),
            PathBuf::from("/dev/mmcblk0")
        );
        assert_eq!(
            base_device(Path::new("/dev/nvme0n1p12")),
            PathBuf::from("/dev/nvme0n1")
        );
    }

    #[test]
    fn base_device_keeps_numbered_whole_disks() {
        assert_eq!(base_device(Path::new("/dev/mmcblk0")), PathBuf::from("/dev/mmcblk0"));
        assert_eq!(base_device(Path::new("/dev/nvme0n1")), PathBuf::from("/dev/nvme0n1"));
    }

    #[test]
    fn child_matching_follows_family() {
        let lettered = DeviceFamily::Lettered;
        assert!(lettered.is_child("sdb", "sdb1"));
        assert!(lettered.is_child("sdb", "sdb10"));
        assert!(!lettered.is_child("sdb", "sdb"));
        assert!(!lettered.is_child("sdb", "sdbp1"));
        assert!(!lettered.is_child("sda", "sdb1"));

        let numbered = DeviceFamily::Numbered;
        assert!(numbered.is_child("mmcblk0", "mmcblk0p1"));
        assert!(numbered.is_child("mmcblk0", "mmcblk0p12"));
        assert!(!numbered.is_child("mmcblk0", "mmcblk0"));
        assert!(!numbered.is_child("mmcblk0", "mmcblk0boot0"));
        assert!(!numbered.is_child("mmcblk0", "mmcblk01"));
    }

    #[test]
    fn unmount_glob_matches_any_suffix() {
        let lettered = DeviceFamily::Lettered;
        assert!(lettered.matches_unmount_glob("sdb", "sdb1"));
        assert!(!lettered.matches_unmount_glob("sdb", "sdb"));

        let numbered = DeviceFamily::Numbered;
        assert!(numbered.matches_unmount_glob("mmcblk0", "mmcblk0p2"));
        assert!(!numbered.matches_unmount_glob("mmcblk0", "mmcblk0boot0"));
    }

    #[test]
    fn display_lists_mount_points() {
        let mut device = TargetDevice::new(Path::new("/dev/sdb"));
        device.size_bytes = 2 * 1024 * 1024 * 1024;
        assert!(device.to_string().contains("[Not mounted]"));

        device.mount_points = vec!["/media/boot".into(), "/media/root".into()];
        let shown = device.to_string();
        assert!(shown.contains("2.0 GB"));
        assert!(shown.contains("[Mounted at /media/boot, /media/root]"));
    }
}
