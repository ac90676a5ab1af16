use super::Geometry;
use crate::device::DriveState;
use crate::error::ProbeError;
use std::path::{Path, PathBuf};

fn unsupported() -> ProbeError {
    ProbeError::Unavailable(format!(
        "drive probing is not implemented on {}",
        std::env::consts::OS
    ))
}

pub(super) fn list_optical_drives() -> Result<Vec<PathBuf>, ProbeError> {
    Err(unsupported())
}

pub(super) fn list_removable_drives() -> Result<Vec<PathBuf>, ProbeError> {
    Err(unsupported())
}

pub(super) fn resolve_label(_path: &Path) -> Result<Option<String>, ProbeError> {
    Err(unsupported())
}

pub(super) fn resolve_geometry(_path: &Path) -> Result<Geometry, ProbeError> {
    Err(unsupported())
}

pub(super) fn resolve_state(_path: &Path) -> Result<DriveState, ProbeError> {
    Err(unsupported())
}

pub(super) fn eject(_path: &Path) -> Result<(), ProbeError> {
    Err(unsupported())
}
