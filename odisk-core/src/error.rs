//! Error types shared across the registry, the disks and the probes.

use std::io;

use thiserror::Error;

use crate::device::DriveState;

/// Failure reported by a [`crate::platform::MediaProbe`].
#[derive(Error, Debug)]
pub enum ProbeError {
    /// The external tool is not installed or not on `PATH`.
    #[error("{tool} is not available")]
    ToolMissing { tool: String },

    /// The external tool ran but exited unsuccessfully.
    #[error("{tool} failed with status {status:?}: {stderr}")]
    ToolFailed {
        tool: String,
        status: Option<i32>,
        stderr: String,
    },

    /// The tool output could not be understood.
    #[error("unexpected output from {tool}: {detail}")]
    Parse { tool: String, detail: String },

    /// The probe cannot answer on this host.
    #[error("probe unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Failure reported by a [`crate::registry::ChangeNotifier`].
#[derive(Error, Debug)]
pub enum NotifierError {
    #[error("announcement transport failed: {0}")]
    Transport(String),
}

/// Disk registry and range-read errors.
#[derive(Error, Debug)]
pub enum DiskError {
    /// No disk in the catalog carries this identifier.
    #[error("disk not found: {0}")]
    DiskNotFound(String),

    /// The disk exists but has no readable media right now.
    #[error("device not ready: {id} is {state}")]
    DeviceNotReady { id: String, state: DriveState },

    /// The start address lies past the end address.
    #[error("start address exceeds end address ({start} > {})", end_label(.end))]
    InvalidRange { start: u64, end: Option<u64> },

    /// The end address lies past the last byte of the device.
    #[error("end address exceeds size by {overage} bytes (device size {size})")]
    RangeExceedsDeviceSize { overage: u64, size: u64 },

    /// A `Range` header that is not of the form `bytes=<start>-<end>`.
    #[error("range decode error: {0:?}")]
    MalformedRange(String),

    /// A file name that cannot be stored as a disk image.
    #[error("unsupported image file: {0:?}")]
    UnsupportedImage(String),

    /// An image with this name is already in the root.
    #[error("image already exists: {0:?}")]
    ImageExists(String),

    /// Media are served read-only.
    #[error("disk is read-only")]
    ReadOnly,

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Notifier(#[from] NotifierError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for disk operations
pub type DiskResult<T> = Result<T, DiskError>;

// An empty device has no last byte; show it the way a signed `size - 1` would read.
fn end_label(end: &Option<u64>) -> String {
    match end {
        Some(end) => end.to_string(),
        None => "-1".to_string(),
    }
}
