//! The error type shared by every stage of a flash or repair session.
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("This program must be run as root")]
    NotRoot,

    #[error("Image file not found: {}", .0.display())]
    ImageNotFound(PathBuf),

    #[error("Device not found or not a block device: {}", .0.display())]
    NotBlockDevice(PathBuf),

    #[error("Required tools not found: {}", .0.join(", "))]
    MissingTools(Vec<String>),

    #[error("Image is {image} bytes but {} only holds {device} bytes", .path.display())]
    DeviceTooSmall {
        path: PathBuf,
        image: u64,
        device: u64,
    },

    #[error("Failed to open {}: {source}", .path.display())]
    Open { path: PathBuf, source: io::Error },

    #[error("Failed to read image at byte {offset}: {source}")]
    ReadImage { offset: u64, source: io::Error },

    #[error("Image ended after {actual} of {expected} bytes")]
    TruncatedImage { expected: u64, actual: u64 },

    #[error("Failed to write device at byte {offset}: {source}")]
    WriteDevice { offset: u64, source: io::Error },

    #[error("Failed to sync device after {offset} bytes: {source}")]
    Sync { offset: u64, source: io::Error },

    #[error("Operation cancelled by user after {bytes_written} bytes")]
    Cancelled { bytes_written: u64 },

    #[error("Partition table on {} is corrupted. Use --force to recreate it.", .0.display())]
    TableCorrupted(PathBuf),

    #[error("Failed to create a partition table on {}", .0.display())]
    TableRecreateFailed(PathBuf),

    #[error("Failed to run {program}: {source}")]
    Command { program: String, source: io::Error },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// True for interruptions requested by the user rather than failures.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }
}
