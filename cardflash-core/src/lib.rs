//! The core, UI-agnostic library for the `cardflash` utility.
//!
//! `cardflash-core` writes a disk image byte for byte onto a removable block
//! device, optionally reads it back to verify it, and then brings the device's
//! partition table and filesystems back into a usable state. It can be driven
//! by any front-end; the `cardflash` CLI is one.
//!
//! The library is structured into several key modules:
//! - [`device`]: Device naming families and base-device extraction.
//! - [`platform`]: Capacity and mount lookups for a block device.
//! - [`preflight`]: Checks that run before anything destructive happens.
//! - [`mod@copy`]: The block copier with durability barriers and cancellation.
//! - [`progress`]: Percentage, throughput and bar rendering for the copy.
//! - [`mod@verify`]: Read-back comparison of image and device.
//! - [`mod@write`]: The flash session tying unmount, copy and verify together.
//! - [`partition_table`], [`partitions`], [`repair`]: The repair session.
//! - [`system`]: The seam through which external tools are run.
//!
//! Long-running operations report progress via callbacks, allowing the calling
//! application to display progress in any way it chooses.
//!
//! ## Example: Flashing and Repairing
//!
//! ```rust,no_run
//! use cardflash_core::repair::{self, RepairOptions};
//! use cardflash_core::system::HostSystem;
//! use cardflash_core::write::FlashSession;
//! use std::path::Path;
//! use std::sync::{Arc, atomic::AtomicBool};
//!
//! fn main() -> cardflash_core::Result<()> {
//!     let image = Path::new("raspios.img");
//!     let device = Path::new("/dev/mmcblk0");
//!     let system = HostSystem::new();
//!
//!     // A shared flag to allow for graceful cancellation.
//!     let running = Arc::new(AtomicBool::new(true));
//!
//!     let report = FlashSession::new(image, device, true, running).run(
//!         &system,
//!         |_| {},
//!         |written| println!("{} bytes written", written),
//!         |_| {},
//!         |_| {},
//!     )?;
//!     println!("Verification: {:?}", report.verification);
//!
//!     let repaired = repair::run(&system, device, &RepairOptions::default(), |_| {})?;
//!     println!("Checked {} partition(s)", repaired.outcomes.len());
//!     Ok(())
//! }
//! ```

pub mod copy;
pub mod device;
pub mod error;
pub mod partition_table;
pub mod partitions;
pub mod platform;
pub mod preflight;
pub mod progress;
pub mod repair;
pub mod system;
pub mod unmount;
pub mod verify;
pub mod write;

pub use error::{Error, Result};
