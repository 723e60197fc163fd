//! Probing and, when forced, recreating the partition table of a whole disk.
use crate::error::{Error, Result};
use crate::system::{System, ToolOutput, tools};
use log::{debug, warn};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Label types in the order they are tried when recreating a table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TableKind {
    Gpt,
    Msdos,
}

impl TableKind {
    pub const RECREATE_ORDER: [TableKind; 2] = [TableKind::Gpt, TableKind::Msdos];

    /// The label name understood by `parted mklabel`.
    pub fn label(self) -> &'static str {
        match self {
            TableKind::Gpt => "gpt",
            TableKind::Msdos => "msdos",
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableKind::Gpt => write!(f, "GPT"),
            TableKind::Msdos => write!(f, "MBR"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TableState {
    /// The existing table could be read.
    Intact,
    /// The table was unreadable and a new, empty one was written.
    Recreated(TableKind),
}

/// Steps reported while a table is being inspected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TableEvent {
    Probing,
    Corrupted,
    Creating(TableKind),
    CreateFailed(TableKind),
}

fn parted<S: System + ?Sized>(system: &S, args: &[&str]) -> Result<ToolOutput> {
    system.run(tools::PARTED, args).map_err(|source| Error::Command {
        program: tools::PARTED.to_string(),
        source,
    })
}

/// Asks the kernel to re-read the partition table of `device`, then waits
/// `settle`. Failures are logged only.
pub fn rescan<S: System + ?Sized>(system: &S, device: &Path, settle: Duration) {
    let dev = device.to_string_lossy().into_owned();
    match system.run(tools::PARTPROBE, &[dev.as_str()]) {
        Ok(out) if !out.success() => debug!("partprobe {} exited with {:?}", dev, out.code),
        Err(e) => debug!("Could not run partprobe on {}: {}", dev, e),
        Ok(_) => {}
    }
    system.settle(settle);
}

pub struct PartitionTableInspector<'a, S: System + ?Sized> {
    system: &'a S,
    force: bool,
}

impl<'a, S: System + ?Sized> PartitionTableInspector<'a, S> {
    /// With `force` set, an unreadable table is replaced instead of reported.
    pub fn new(system: &'a S, force: bool) -> Self {
        Self { system, force }
    }

    /// Checks that `base` carries a readable partition table.
    ///
    /// A failing `parted print` means the table is corrupted. Without force
    /// that is [`Error::TableCorrupted`]; with force a GPT label is written,
    /// then an MBR label if GPT fails, and [`Error::TableRecreateFailed`] is
    /// returned if neither works.
    pub fn inspect<F>(&self, base: &Path, mut on_event: F) -> Result<TableState>
    where
        F: FnMut(TableEvent),
    {
        let dev = base.to_string_lossy().into_owned();

        on_event(TableEvent::Probing);
        let probe = parted(self.system, &["-s", dev.as_str(), "print"])?;
        if probe.success() {
            return Ok(TableState::Intact);
        }

        warn!("Partition table on {} appears corrupted: {}", dev, probe.stderr);
        on_event(TableEvent::Corrupted);
        if !self.force {
            return Err(Error::TableCorrupted(base.to_path_buf()));
        }

        for kind in TableKind::RECREATE_ORDER {
            on_event(TableEvent::Creating(kind));
            let created = parted(self.system, &["-s", dev.as_str(), "mklabel", kind.label()])?;
            if created.success() {
                return Ok(TableState::Recreated(kind));
            }
            warn!("Creating a {} label on {} failed: {}", kind, dev, created.stderr);
            on_event(TableEvent::CreateFailed(kind));
        }

        Err(Error::TableRecreateFailed(base.to_path_buf()))
    }
}
