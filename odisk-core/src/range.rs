//! Byte-window resolution for range reads.
//!
//! A window is inclusive on both ends and 0-indexed. The end address is
//! optional: `None` reads to the last byte of the device, which is what a
//! `bytes=N-` request asks for.

use crate::error::{DiskError, DiskResult};

/// An inclusive byte window (`start..=end`) that fits inside a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteWindow {
    pub start: u64,
    pub end: u64,
}

impl ByteWindow {
    /// Checks `start`/`end` against a device of `size` bytes.
    ///
    /// # Errors
    ///
    /// - [`DiskError::InvalidRange`] if an explicit `end` lies before `start`,
    ///   or if the device is empty and no `end` was given.
    /// - [`DiskError::RangeExceedsDeviceSize`] if `end` lies past the last byte.
    pub fn resolve(start: u64, end: Option<u64>, size: u64) -> DiskResult<Self> {
        if let Some(end) = end {
            if start > end {
                return Err(DiskError::InvalidRange {
                    start,
                    end: Some(end),
                });
            }
        }

        let Some(last) = size.checked_sub(1) else {
            return Err(match end {
                Some(end) => DiskError::RangeExceedsDeviceSize {
                    overage: end.saturating_add(1),
                    size,
                },
                None => DiskError::InvalidRange { start, end: None },
            });
        };

        let end = end.unwrap_or(last);
        if end > last {
            return Err(DiskError::RangeExceedsDeviceSize {
                overage: end - last,
                size,
            });
        }
        if start > end {
            return Err(DiskError::InvalidRange {
                start,
                end: Some(end),
            });
        }

        Ok(Self { start, end })
    }

    /// Number of bytes covered by the window.
    pub fn len(self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` value for this window on a device of `total` bytes.
    pub fn content_range(self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}
