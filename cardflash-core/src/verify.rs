//! Read-back comparison of a written device against its source image.
use crate::copy::read_full;
use crate::error::{Error, Result};
use log::warn;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};

pub const VERIFY_CHUNK_SIZE: usize = 1024 * 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verification {
    /// Verification was not requested.
    Skipped,
    Passed,
    /// The first differing (or missing) byte on the device.
    Failed { offset: u64 },
    /// The device could not be read back from `offset` onwards.
    Unreadable { offset: u64, reason: String },
}

impl Verification {
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            Verification::Failed { .. } | Verification::Unreadable { .. }
        )
    }
}

/// Compares the first `len` bytes of `image` and `device` chunk by chunk and
/// stops at the first chunk that differs.
///
/// A device that returns fewer bytes than the image counts as a mismatch, and
/// one that fails to read is reported as [`Verification::Unreadable`]: the
/// write has already completed, so neither is an error. Only image read
/// errors and cancellation are.
pub fn compare<A, B, F>(
    image: &mut A,
    device: &mut B,
    len: u64,
    running: &AtomicBool,
    mut on_progress: F,
) -> Result<Verification>
where
    A: Read + ?Sized,
    B: Read + ?Sized,
    F: FnMut(u64),
{
    let mut image_buf = vec![0u8; VERIFY_CHUNK_SIZE];
    let mut device_buf = vec![0u8; VERIFY_CHUNK_SIZE];

    let mut compared: u64 = 0;
    while compared < len {
        if !running.load(Ordering::SeqCst) {
            return Err(Error::Cancelled {
                bytes_written: len,
            });
        }

        let chunk = std::cmp::min(VERIFY_CHUNK_SIZE as u64, len - compared) as usize;
        let image_got = read_full(image, &mut image_buf[..chunk])
            .map_err(|source| Error::ReadImage { offset: compared, source })?;
        if image_got < chunk {
            return Err(Error::TruncatedImage {
                expected: len,
                actual: compared + image_got as u64,
            });
        }
        let device_got = match read_full(device, &mut device_buf[..chunk]) {
            Ok(got) => got,
            Err(e) => {
                warn!("Reading the device back failed at byte {compared}: {e}");
                return Ok(Verification::Unreadable {
                    offset: compared,
                    reason: e.to_string(),
                });
            }
        };

        if let Some(at) = first_difference(&image_buf[..chunk], &device_buf[..device_got]) {
            return Ok(Verification::Failed {
                offset: compared + at as u64,
            });
        }

        compared += chunk as u64;
        on_progress(compared);
    }

    Ok(Verification::Passed)
}

/// Index of the first byte where `expected` and `actual` disagree, treating
/// bytes missing from `actual` as disagreeing.
fn first_difference(expected: &[u8], actual: &[u8]) -> Option<usize> {
    expected
        .iter()
        .zip(actual)
        .position(|(a, b)| a != b)
        .or_else(|| (actual.len() < expected.len()).then_some(actual.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(image: &[u8], device: &[u8]) -> Verification {
        let running = AtomicBool::new(true);
        compare(&mut &image[..], &mut &device[..], image.len() as u64, &running, |_| {}).unwrap()
    }

    fn image() -> Vec<u8> {
        (0..3 * VERIFY_CHUNK_SIZE + 4321).map(|i| (i % 253) as u8).collect()
    }

    #[test]
    fn identical_data_passes() {
        let data = image();
        assert_eq!(run(&data, &data), Verification::Passed);
    }

    #[test]
    fn single_flipped_byte_is_located() {
        let data = image();
        let last = data.len() - 1;
        for at in [0, VERIFY_CHUNK_SIZE - 1, VERIFY_CHUNK_SIZE, data.len() / 2, last] {
            let mut device = data.clone();
            device[at] ^= 0x40;
            assert_eq!(
                run(&data, &device),
                Verification::Failed { offset: at as u64 },
                "flip at {at}"
            );
        }
    }

    #[test]
    fn short_device_is_a_mismatch() {
        let data = image();
        let device = &data[..data.len() - 10];
        assert_eq!(
            run(&data, device),
            Verification::Failed {
                offset: (data.len() - 10) as u64
            }
        );
    }

    #[test]
    fn compares_only_requested_length() {
        let data = image();
        let mut device = data.clone();
        device[data.len() - 1] ^= 1;
        let running = AtomicBool::new(true);
        let len = (data.len() - 1) as u64;
        let outcome = compare(&mut &data[..], &mut &device[..], len, &running, |_| {}).unwrap();
        assert_eq!(outcome, Verification::Passed);
    }

    /// Serves `left` zero bytes, then fails every read.
    struct FailingDevice {
        left: usize,
    }

    impl Read for FailingDevice {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.left == 0 {
                return Err(std::io::Error::other("device removed"));
            }
            let n = buf.len().min(self.left);
            buf[..n].fill(0);
            self.left -= n;
            Ok(n)
        }
    }

    #[test]
    fn device_read_error_is_a_verification_outcome() {
        let data = vec![0u8; 3 * VERIFY_CHUNK_SIZE];
        let running = AtomicBool::new(true);
        let mut device = FailingDevice {
            left: VERIFY_CHUNK_SIZE,
        };
        let mut progress = Vec::new();

        let outcome = compare(
            &mut &data[..],
            &mut device,
            data.len() as u64,
            &running,
            |n| progress.push(n),
        )
        .unwrap();

        assert_eq!(
            outcome,
            Verification::Unreadable {
                offset: VERIFY_CHUNK_SIZE as u64,
                reason: "device removed".into(),
            }
        );
        assert!(outcome.is_failed());
        assert_eq!(progress, vec![VERIFY_CHUNK_SIZE as u64]);
    }

    #[test]
    fn image_read_error_is_still_an_error() {
        let running = AtomicBool::new(true);
        let mut image = FailingDevice { left: 10 };
        let device = vec![0u8; 100];
        let err = compare(&mut image, &mut &device[..], 100, &running, |_| {}).unwrap_err();
        assert!(matches!(err, Error::ReadImage { offset: 0, .. }));
    }

    #[test]
    fn empty_image_passes() {
        assert_eq!(run(&[], &[]), Verification::Passed);
    }
}
