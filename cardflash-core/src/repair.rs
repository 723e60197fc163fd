//! Bringing a freshly written device back to a usable state.
//!
//! A repair session re-reads the partition table, makes sure the disk has a
//! readable one (recreating it when forced), then walks every partition and
//! runs the checker that matches its filesystem. Checker failures are recorded
//! but never stop the walk.
use crate::device::base_device;
use crate::error::{Error, Result};
use crate::partition_table::{PartitionTableInspector, TableEvent, TableState, rescan};
use crate::partitions;
use crate::preflight::require_tools;
use crate::system::{System, tools};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct RepairOptions {
    /// Recreate an unreadable partition table instead of giving up.
    pub force: bool,
    /// Wait after the initial partition-table re-read.
    pub probe_settle: Duration,
    /// Wait after re-reading the table of the base device.
    pub rescan_settle: Duration,
    /// Where partition nodes are looked up.
    pub dev_dir: PathBuf,
}

impl Default for RepairOptions {
    fn default() -> Self {
        Self {
            force: false,
            probe_settle: Duration::from_secs(2),
            rescan_settle: Duration::from_secs(1),
            dev_dir: PathBuf::from("/dev"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RepairStatus {
    /// The checker ran and exited cleanly.
    Repaired,
    /// The checker ran but reported a problem, or could not be started.
    ToolFailed { code: Option<i32> },
    /// The filesystem has a checker, but it is not installed.
    ToolUnavailable,
    /// No checker exists for this filesystem type.
    Skipped,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RepairOutcome {
    pub partition: PathBuf,
    pub fstype: String,
    pub tool: Option<&'static str>,
    pub status: RepairStatus,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RepairReport {
    pub base_device: PathBuf,
    pub table: TableState,
    pub outcomes: Vec<RepairOutcome>,
}

impl RepairReport {
    pub fn failures(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, RepairStatus::ToolFailed { .. }))
            .count()
    }
}

/// Progress notifications emitted by [`run`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RepairEvent {
    Refreshing(PathBuf),
    Table(TableEvent),
    Scanning(PathBuf),
    NoPartitions(PathBuf),
    Found(Vec<PathBuf>),
    Checking {
        partition: PathBuf,
        fstype: String,
        tool: Option<&'static str>,
    },
    Checked(RepairOutcome),
}

// Forced check, answer yes to every fix.
const E2FSCK_FLAGS: &[&str] = &["-f", "-y"];
// Repair automatically, verbose.
const DOSFSCK_FLAGS: &[&str] = &["-a", "-v"];
const NTFSFIX_FLAGS: &[&str] = &[];

/// The checker for a filesystem type, and the arguments placed before the
/// partition path.
fn checker_for(fstype: &str) -> Option<(&'static str, &'static [&'static str])> {
    match fstype {
        "ext2" | "ext3" | "ext4" => Some((tools::E2FSCK, E2FSCK_FLAGS)),
        "vfat" | "fat16" | "fat32" => Some((tools::DOSFSCK, DOSFSCK_FLAGS)),
        "ntfs" => Some((tools::NTFSFIX, NTFSFIX_FLAGS)),
        _ => None,
    }
}

/// Runs the matching filesystem checker on each partition in turn.
pub struct FilesystemRepairDispatcher<'a, S: System + ?Sized> {
    system: &'a S,
}

impl<'a, S: System + ?Sized> FilesystemRepairDispatcher<'a, S> {
    pub fn new(system: &'a S) -> Self {
        Self { system }
    }

    /// Asks `blkid` for the filesystem type only. Anything it cannot
    /// identify is reported as `unknown`.
    pub fn detect_fstype(&self, partition: &Path) -> String {
        let part = partition.to_string_lossy().into_owned();
        match self
            .system
            .run(tools::BLKID, &["-o", "value", "-s", "TYPE", part.as_str()])
        {
            Ok(out) if out.success() && !out.stdout.trim().is_empty() => {
                out.stdout.trim().to_string()
            }
            _ => "unknown".to_string(),
        }
    }

    /// Detects the type of `partition` and runs its checker, if any.
    pub fn repair<F>(&self, partition: &Path, on_event: &mut F) -> RepairOutcome
    where
        F: FnMut(RepairEvent),
    {
        let fstype = self.detect_fstype(partition);
        let checker = checker_for(&fstype);

        on_event(RepairEvent::Checking {
            partition: partition.to_path_buf(),
            fstype: fstype.clone(),
            tool: checker.map(|(tool, _)| tool),
        });

        let Some((tool, flags)) = checker else {
            info!("{}: {} has no repair tool, skipping", partition.display(), fstype);
            return RepairOutcome {
                partition: partition.to_path_buf(),
                fstype,
                tool: None,
                status: RepairStatus::Skipped,
            };
        };

        if tool == tools::NTFSFIX && !self.system.has_tool(tool) {
            warn!("{}: {} is not installed", partition.display(), tool);
            return RepairOutcome {
                partition: partition.to_path_buf(),
                fstype,
                tool: Some(tool),
                status: RepairStatus::ToolUnavailable,
            };
        }

        let part = partition.to_string_lossy().into_owned();
        let mut args: Vec<&str> = flags.to_vec();
        args.push(part.as_str());

        let status = match self.system.run(tool, &args) {
            Ok(out) if out.success() => RepairStatus::Repaired,
            Ok(out) => {
                warn!("{} on {} exited with {:?}", tool, part, out.code);
                RepairStatus::ToolFailed { code: out.code }
            }
            Err(e) => {
                warn!("Could not run {} on {}: {}", tool, part, e);
                RepairStatus::ToolFailed { code: None }
            }
        };

        RepairOutcome {
            partition: partition.to_path_buf(),
            fstype,
            tool: Some(tool),
            status,
        }
    }

    /// Repairs every partition in order. One partition's failure never
    /// prevents the next from being checked.
    pub fn repair_all<F>(&self, partitions: &[PathBuf], on_event: &mut F) -> Vec<RepairOutcome>
    where
        F: FnMut(RepairEvent),
    {
        partitions
            .iter()
            .map(|partition| {
                let outcome = self.repair(partition, on_event);
                on_event(RepairEvent::Checked(outcome.clone()));
                outcome
            })
            .collect()
    }
}

/// Repairs the partition table and filesystems of `device`.
///
/// `device` may name a partition; the whole disk it belongs to is repaired.
///
/// # Errors
///
/// - [`Error::MissingTools`] before anything is touched if a required tool is
///   absent.
/// - [`Error::TableCorrupted`] if the table is unreadable and `force` is off.
/// - [`Error::TableRecreateFailed`] if neither a GPT nor an MBR label could be
///   written.
///
/// Individual checker failures are not errors; they are in the report.
pub fn run<S, F>(
    system: &S,
    device: &Path,
    options: &RepairOptions,
    mut on_event: F,
) -> Result<RepairReport>
where
    S: System + ?Sized,
    F: FnMut(RepairEvent),
{
    require_tools(system, &tools::REPAIR_REQUIRED)?;
    info!("Repairing filesystems on {}", device.display());

    on_event(RepairEvent::Refreshing(device.to_path_buf()));
    rescan(system, device, options.probe_settle);

    let base = base_device(device);
    let table = PartitionTableInspector::new(system, options.force)
        .inspect(&base, |event| on_event(RepairEvent::Table(event)))?;

    on_event(RepairEvent::Scanning(base.clone()));
    rescan(system, &base, options.rescan_settle);

    let found = partitions::enumerate(system, &base, &options.dev_dir).map_err(Error::Io)?;
    if found.is_empty() {
        warn!("No partitions found on {}", base.display());
        on_event(RepairEvent::NoPartitions(base.clone()));
        return Ok(RepairReport {
            base_device: base,
            table,
            outcomes: Vec::new(),
        });
    }
    on_event(RepairEvent::Found(found.clone()));

    let outcomes = FilesystemRepairDispatcher::new(system).repair_all(&found, &mut on_event);

    // Let the rest of the system see size or UUID changes made by the checkers.
    rescan(system, &base, Duration::ZERO);

    Ok(RepairReport {
        base_device: base,
        table,
        outcomes,
    })
}
