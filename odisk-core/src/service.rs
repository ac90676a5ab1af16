//! The range-read surface consumed by the network transport.
//!
//! A transport maps its requests onto [`DiskService`]: a stat request becomes
//! [`DiskService::stat`], a data request becomes [`DiskService::read`], and
//! an upload becomes [`DiskService::ingest`]. The helpers at the bottom of
//! this module decode the two request fields the remote-disc protocol uses
//! (the `disk` parameter and the `Range` header).

use crate::device::{DiskInfo, DriveState};
use crate::error::{DiskError, DiskResult};
use crate::ingest::{self, IngestReport};
use crate::platform::extension;
use crate::range::ByteWindow;
use crate::registry::DiskRegistry;
use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tracing::info;

/// User agent of clients reading disk data.
pub const READ_USER_AGENT: &str = "CCURLBS::readDataFork";
/// User agent of clients asking for a disk's size.
pub const STAT_USER_AGENT: &str = "CCURLBS::statImage";
/// Value of the `Server` response header.
pub const SERVER_HEADER: &str = "ODS/1.0";

/// Bytes read from a disk, with the metadata a response needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RangeResponse {
    pub window: ByteWindow,
    /// Total size of the disk, for `Content-Range`.
    pub total_size: u64,
    pub data: Vec<u8>,
}

impl RangeResponse {
    pub fn content_range(&self) -> String {
        self.window.content_range(self.total_size)
    }
}

/// Request-level operations over a [`DiskRegistry`].
#[derive(Debug, Clone)]
pub struct DiskService {
    registry: Arc<DiskRegistry>,
}

impl DiskService {
    pub fn new(registry: Arc<DiskRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<DiskRegistry> {
        &self.registry
    }

    /// Reads `start..=end` from the disk `id`. `end == None` reads to the end.
    ///
    /// # Errors
    ///
    /// - [`DiskError::InvalidRange`] when `start > end`, whatever the disk's state.
    /// - [`DiskError::DiskNotFound`] when `id` is not in the catalog.
    /// - [`DiskError::DeviceNotReady`] when the disk's state is not `Ready`.
    /// - [`DiskError::RangeExceedsDeviceSize`] when `end` lies past the last byte.
    pub fn read(&self, id: &str, start: u64, end: Option<u64>) -> DiskResult<RangeResponse> {
        if let Some(end) = end {
            if start > end {
                return Err(DiskError::InvalidRange {
                    start,
                    end: Some(end),
                });
            }
        }

        let disk = self.registry.get(id)?;
        let state = disk.state();
        if state != DriveState::Ready {
            return Err(DiskError::DeviceNotReady {
                id: id.to_string(),
                state,
            });
        }

        let (window, data) = disk.read_range(start, end)?;
        Ok(RangeResponse {
            window,
            total_size: disk.size()?,
            data,
        })
    }

    /// Serves a data request given its raw `disk` parameter and `Range` header.
    pub fn read_request(&self, disk_param: &str, range_header: &str) -> DiskResult<RangeResponse> {
        let (start, end) = parse_range_header(range_header)?;
        self.read(disk_basename(disk_param), start, end)
    }

    /// Describes the disk `id`; `size` is the value for `Content-Length`.
    pub fn stat(&self, id: &str) -> DiskResult<DiskInfo> {
        let id = disk_basename(id);
        let catalog = self.registry.catalog()?;
        let (session_id, disk) = catalog
            .lookup(id)
            .ok_or_else(|| DiskError::DiskNotFound(id.to_string()))?;
        Ok(disk.info(session_id))
    }

    /// Describes every disk in the current catalog.
    pub fn list(&self) -> DiskResult<Vec<DiskInfo>> {
        let catalog = self.registry.catalog()?;
        Ok(catalog.iter().map(|(id, disk)| disk.info(id)).collect())
    }

    /// Stores an uploaded image in the root directory and refreshes the catalog.
    pub fn ingest<R, F>(
        &self,
        name: &str,
        reader: R,
        running: Arc<AtomicBool>,
        on_progress: F,
    ) -> DiskResult<IngestReport>
    where
        R: Read,
        F: FnMut(u64),
    {
        let report = ingest::run(self.registry.root(), name, reader, running, on_progress)?;
        info!(
            "Stored {} ({} bytes, sha256 {})",
            report.path.display(),
            report.size,
            report.sha256
        );
        self.registry.update()?;
        Ok(report)
    }
}

/// Strips the extension clients append to identifiers (`disk1.dmg` → `disk1`).
pub fn disk_basename(param: &str) -> &str {
    match extension(param) {
        Some(ext) => &param[..param.len() - ext.len() - 1],
        None => param,
    }
}

/// Parses `bytes=<start>-<end>`. An empty start reads from 0 and an empty
/// end reads to the last byte.
pub fn parse_range_header(value: &str) -> DiskResult<(u64, Option<u64>)> {
    let malformed = || DiskError::MalformedRange(value.to_string());

    let ranges = value.trim().strip_prefix("bytes=").ok_or_else(malformed)?;
    let (start, end) = ranges.split_once('-').ok_or_else(malformed)?;

    let parse = |digits: &str| -> DiskResult<Option<u64>> {
        let digits = digits.trim();
        if digits.is_empty() {
            return Ok(None);
        }
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        digits.parse().map(Some).map_err(|_| malformed())
    };

    Ok((parse(start)?.unwrap_or(0), parse(end)?))
}
