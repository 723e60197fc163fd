//! Discovery of the partition nodes that belong to a whole-disk device.
use crate::device::{DeviceFamily, device_name};
use crate::system::System;
use std::io;
use std::path::{Path, PathBuf};

/// Picks the children of `base_name` out of `names` and returns them as paths
/// under `dev_dir`, sorted as strings (`sdb1`, `sdb10`, `sdb2`).
pub fn select_children<I>(
    names: I,
    base_name: &str,
    family: DeviceFamily,
    dev_dir: &Path,
) -> Vec<PathBuf>
where
    I: IntoIterator<Item = String>,
{
    let mut children: Vec<PathBuf> = names
        .into_iter()
        .filter(|name| family.is_child(base_name, name))
        .map(|name| dev_dir.join(name))
        .collect();
    children.sort();
    children
}

/// Lists the block-device nodes in `dev_dir` that are partitions of `base`.
///
/// An empty list is a valid answer: the device simply has no partitions.
pub fn enumerate<S: System + ?Sized>(
    system: &S,
    base: &Path,
    dev_dir: &Path,
) -> io::Result<Vec<PathBuf>> {
    let names = system.block_devices(dev_dir)?;
    Ok(select_children(
        names,
        &device_name(base),
        DeviceFamily::of(base),
        dev_dir,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn lettered_children_sort_as_strings() {
        let found = select_children(
            names(&["sdb2", "sda1", "sdb", "sdb10", "sdb1", "loop0"]),
            "sdb",
            DeviceFamily::Lettered,
            Path::new("/dev"),
        );
        assert_eq!(
            found,
            vec![
                PathBuf::from("/dev/sdb1"),
                PathBuf::from("/dev/sdb10"),
                PathBuf::from("/dev/sdb2"),
            ]
        );
    }

    #[test]
    fn numbered_children_need_p_infix() {
        let found = select_children(
            names(&["mmcblk0", "mmcblk0p2", "mmcblk0p1", "mmcblk0boot0", "mmcblk1p1"]),
            "mmcblk0",
            DeviceFamily::Numbered,
            Path::new("/dev"),
        );
        assert_eq!(
            found,
            vec![PathBuf::from("/dev/mmcblk0p1"), PathBuf::from("/dev/mmcblk0p2")]
        );
    }

    #[test]
    fn no_children_is_empty_not_error() {
        let found = select_children(
            names(&["sda", "sda1"]),
            "sdb",
            DeviceFamily::Lettered,
            Path::new("/dev"),
        );
        assert!(found.is_empty());
    }
}
