//! Provides platform-specific functionality.
//!
//! This module contains the logic for asking the operating system about a
//! block device: its capacity and which of its partitions are mounted.
//!
//! It uses conditional compilation (`#[cfg]`) to expose the implementation for
//! the target OS. Only Linux is supported; the repair phase depends on Linux
//! tooling (`partprobe`, `blkid`) anyway.

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use self::linux::*;
