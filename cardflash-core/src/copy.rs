//! Block-by-block copying of an image onto a device with periodic durability
//! barriers and cooperative cancellation.
use crate::error::{Error, Result};
use log::debug;
use std::fs::File;
use std::io::{self, Cursor, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};

/// 8 KiB keeps the delay between a cancel request and the next check short.
pub const BLOCK_SIZE: usize = 8 * 1024;

/// 128 blocks of 8 KiB: at most ~1 MiB of acknowledged data is ever unsynced.
pub const SYNC_EVERY_BLOCKS: u64 = 128;

/// Sector alignment required for `O_DIRECT` buffers and transfer sizes.
pub const SECTOR_SIZE: usize = 512;

/// A write target that can be forced to commit buffered data to the medium.
pub trait DurableWrite: Write {
    /// Blocks until everything written so far is on the device.
    fn sync_device(&mut self) -> io::Result<()>;
}

impl DurableWrite for File {
    fn sync_device(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

impl DurableWrite for Cursor<Vec<u8>> {
    fn sync_device(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl DurableWrite for Vec<u8> {
    fn sync_device(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<W: DurableWrite + ?Sized> DurableWrite for &mut W {
    fn sync_device(&mut self) -> io::Result<()> {
        (**self).sync_device()
    }
}

#[derive(Clone, Debug)]
pub struct CopyOptions {
    pub block_size: usize,
    /// Number of blocks between durability barriers.
    pub sync_every: u64,
    /// Writes are zero-padded to a multiple of this. 1 disables padding.
    pub alignment: usize,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            block_size: BLOCK_SIZE,
            sync_every: SYNC_EVERY_BLOCKS,
            alignment: 1,
        }
    }
}

impl CopyOptions {
    /// Options for a device opened with `O_DIRECT`.
    pub fn direct() -> Self {
        Self {
            alignment: SECTOR_SIZE,
            ..Self::default()
        }
    }
}

/// Fills `buf` from `reader`, retrying short and interrupted reads.
///
/// Returns fewer than `buf.len()` bytes only when the reader is exhausted.
pub(crate) fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn barrier<W: DurableWrite>(target: &mut W, offset: u64) -> Result<()> {
    target.flush().map_err(|source| Error::Sync { offset, source })?;
    target
        .sync_device()
        .map_err(|source| Error::Sync { offset, source })
}

/// Copies exactly `image_size` bytes from `source` to `target`.
///
/// The copy proceeds in blocks of `options.block_size`. After every
/// `options.sync_every` blocks, and once more after the last block, the target
/// is flushed and synced. `running` is checked before each block; once it
/// reads `false` the pending data is synced and [`Error::Cancelled`] returned.
///
/// `on_progress` receives the running total after each block. The total never
/// exceeds `image_size`, even when alignment padding is written.
///
/// # Errors
///
/// Any read, write or sync failure aborts the copy immediately. A source that
/// runs dry early yields [`Error::TruncatedImage`].
pub fn copy_image<R, W, F>(
    source: &mut R,
    target: &mut W,
    image_size: u64,
    options: &CopyOptions,
    running: &AtomicBool,
    mut on_progress: F,
) -> Result<u64>
where
    R: Read + ?Sized,
    W: DurableWrite,
    F: FnMut(u64),
{
    let block_size = options.block_size.max(1);
    let alignment = options.alignment.max(1);
    let sync_every = options.sync_every.max(1);

    // Align the buffer itself as well, as required by O_DIRECT.
    let mut buf = vec![0u8; block_size + 2 * alignment];
    let offset = buf.as_ptr().align_offset(alignment);
    let buffer = &mut buf[offset..offset + block_size + alignment];

    let mut written: u64 = 0;
    let mut blocks: u64 = 0;
    while written < image_size {
        if !running.load(Ordering::SeqCst) {
            debug!("Cancellation requested after {} bytes", written);
            barrier(target, written)?;
            return Err(Error::Cancelled {
                bytes_written: written,
            });
        }

        let to_read = std::cmp::min(block_size as u64, image_size - written) as usize;
        let got = read_full(source, &mut buffer[..to_read])
            .map_err(|source| Error::ReadImage { offset: written, source })?;
        if got < to_read {
            return Err(Error::TruncatedImage {
                expected: image_size,
                actual: written + got as u64,
            });
        }

        // The last chunk of data may not be a multiple of the sector size.
        let padded = to_read.div_ceil(alignment) * alignment;
        buffer[to_read..padded].fill(0);

        target
            .write_all(&buffer[..padded])
            .map_err(|source| Error::WriteDevice { offset: written, source })?;
        written += to_read as u64;
        blocks += 1;

        if blocks % sync_every == 0 {
            barrier(target, written)?;
        }

        on_progress(written);
    }

    barrier(target, written)?;
    Ok(written)
}
