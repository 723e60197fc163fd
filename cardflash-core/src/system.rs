//! The boundary between the library and the host: external tools, the device
//! directory and settle delays.
//!
//! Every partition-table and filesystem operation is delegated to a command
//! line tool whose exit status is trusted. [`HostSystem`] runs them for real;
//! tests provide their own [`System`] that records invocations instead.
use log::debug;
use std::fs;
use std::io;
#[cfg(unix)]
use std::os::unix::fs::FileTypeExt;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

/// Names of the external programs this crate drives.
pub mod tools {
    pub const PARTED: &str = "parted";
    pub const FSCK: &str = "fsck";
    pub const E2FSCK: &str = "e2fsck";
    pub const DOSFSCK: &str = "dosfsck";
    pub const NTFSFIX: &str = "ntfsfix";
    pub const PARTPROBE: &str = "partprobe";
    pub const BLKID: &str = "blkid";
    pub const LSBLK: &str = "lsblk";
    pub const UMOUNT: &str = "umount";

    /// Tools the repair phase cannot run without. `ntfsfix` is optional.
    pub const REPAIR_REQUIRED: [&str; 6] = [PARTED, FSCK, E2FSCK, DOSFSCK, PARTPROBE, BLKID];
}

/// Captured result of one external command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code, `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

pub trait System {
    /// Runs `program` with `args` to completion and captures its output.
    ///
    /// An `Err` means the program could not be started at all; a non-zero
    /// exit is reported through [`ToolOutput::code`].
    fn run(&self, program: &str, args: &[&str]) -> io::Result<ToolOutput>;

    /// Returns true if `program` can be found on `PATH`.
    fn has_tool(&self, program: &str) -> bool;

    /// Names of the block-special entries in `dir`, in directory order.
    fn block_devices(&self, dir: &Path) -> io::Result<Vec<String>>;

    /// Blocks for `delay` so the kernel can publish partition changes.
    fn settle(&self, delay: Duration);
}

/// The real host: spawns processes and reads the device directory.
#[derive(Debug, Clone, Default)]
pub struct HostSystem;

impl HostSystem {
    pub fn new() -> Self {
        Self
    }
}

impl System for HostSystem {
    fn run(&self, program: &str, args: &[&str]) -> io::Result<ToolOutput> {
        debug!("Running command: {} {}", program, args.join(" "));
        let output = Command::new(program).args(args).output()?;
        let result = ToolOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        };
        debug!("Command {} returned {:?}", program, result.code);
        Ok(result)
    }

    fn has_tool(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }

    fn block_devices(&self, dir: &Path) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(dir)?.filter_map(Result::ok) {
            #[cfg(unix)]
            let is_block = entry.file_type().map(|t| t.is_block_device()).unwrap_or(false);
            #[cfg(not(unix))]
            let is_block = false;

            if is_block {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(names)
    }

    fn settle(&self, delay: Duration) {
        if !delay.is_zero() {
            debug!("Waiting {:?} for the kernel to settle", delay);
            std::thread::sleep(delay);
        }
    }
}

/// Returns the subset of `required` that `system` cannot find.
pub fn missing_tools<S: System + ?Sized>(system: &S, required: &[&str]) -> Vec<String> {
    required
        .iter()
        .filter(|tool| !system.has_tool(tool))
        .map(|tool| tool.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_lists_no_block_devices_in_plain_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("sdb1"), b"not a device").unwrap();
        let names = HostSystem::new().block_devices(dir.path()).unwrap();
        assert!(names.is_empty());
    }

    #[test]
    fn host_reports_missing_tool() {
        let missing = missing_tools(&HostSystem::new(), &["cardflash-no-such-tool"]);
        assert_eq!(missing, vec!["cardflash-no-such-tool".to_string()]);
    }

    #[test]
    fn output_success_requires_zero_exit() {
        let ok = ToolOutput { code: Some(0), ..Default::default() };
        let failed = ToolOutput { code: Some(1), ..Default::default() };
        let killed = ToolOutput { code: None, ..Default::default() };
        assert!(ok.success());
        assert!(!failed.success());
        assert!(!killed.success());
    }
}
