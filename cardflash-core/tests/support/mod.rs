//! A scripted stand-in for the host used by the integration tests.
//!
//! Records every command instead of running it. Exit codes are looked up by a
//! key made of the program name and its non-path, non-flag arguments
//! (`parted print`, `parted mklabel gpt`, `e2fsck`); unknown keys exit 0.
#![allow(dead_code)]

use cardflash_core::system::{System, ToolOutput};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
pub struct FakeSystem {
    devices: Vec<String>,
    missing: HashSet<String>,
    exit_codes: HashMap<String, i32>,
    fstypes: HashMap<String, String>,
    calls: Mutex<Vec<Vec<String>>>,
    settles: Mutex<Vec<Duration>>,
    watched: Option<PathBuf>,
    snapshots: Mutex<Vec<Vec<u8>>>,
}

impl FakeSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block-device names reported for any directory.
    pub fn with_devices(mut self, names: &[&str]) -> Self {
        self.devices = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn without_tool(mut self, tool: &str) -> Self {
        self.missing.insert(tool.to_string());
        self
    }

    pub fn exits(mut self, key: &str, code: i32) -> Self {
        self.exit_codes.insert(key.to_string(), code);
        self
    }

    /// What `blkid` reports for `partition`. Partitions without an entry make
    /// `blkid` exit 2, as it does for unrecognised content.
    pub fn with_fstype(mut self, partition: &str, fstype: &str) -> Self {
        self.fstypes.insert(partition.to_string(), fstype.to_string());
        self
    }

    /// Captures the contents of `path` each time a command runs.
    pub fn watching(mut self, path: &Path) -> Self {
        self.watched = Some(path.to_path_buf());
        self
    }

    /// Contents of the watched file, one entry per command, in call order.
    pub fn snapshots(&self) -> Vec<Vec<u8>> {
        self.snapshots.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    /// Invocations of `program`, arguments only.
    pub fn calls_to(&self, program: &str) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter(|call| call[0] == program)
            .map(|call| call[1..].to_vec())
            .collect()
    }

    pub fn settles(&self) -> Vec<Duration> {
        self.settles.lock().unwrap().clone()
    }

    fn key(program: &str, args: &[&str]) -> String {
        std::iter::once(program)
            .chain(
                args.iter()
                    .copied()
                    .filter(|a| !a.starts_with('/') && !a.starts_with('-')),
            )
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl System for FakeSystem {
    fn run(&self, program: &str, args: &[&str]) -> io::Result<ToolOutput> {
        let mut call = vec![program.to_string()];
        call.extend(args.iter().map(|a| a.to_string()));
        self.calls.lock().unwrap().push(call);
        if let Some(path) = &self.watched {
            let contents = std::fs::read(path).unwrap_or_default();
            self.snapshots.lock().unwrap().push(contents);
        }

        if self.missing.contains(program) {
            return Err(io::Error::new(io::ErrorKind::NotFound, program.to_string()));
        }

        if program == "blkid" {
            let partition = args.last().copied().unwrap_or_default();
            return Ok(match self.fstypes.get(partition) {
                Some(fstype) => ToolOutput {
                    code: Some(0),
                    stdout: format!("{fstype}\n"),
                    stderr: String::new(),
                },
                None => ToolOutput {
                    code: Some(2),
                    ..Default::default()
                },
            });
        }

        let code = self
            .exit_codes
            .get(&Self::key(program, args))
            .copied()
            .unwrap_or(0);
        Ok(ToolOutput {
            code: Some(code),
            stdout: String::new(),
            stderr: if code == 0 { String::new() } else { format!("{program} failed") },
        })
    }

    fn has_tool(&self, program: &str) -> bool {
        !self.missing.contains(program)
    }

    fn block_devices(&self, _dir: &Path) -> io::Result<Vec<String>> {
        Ok(self.devices.clone())
    }

    fn settle(&self, delay: Duration) {
        self.settles.lock().unwrap().push(delay);
    }
}
