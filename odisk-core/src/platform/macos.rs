use super::{Geometry, exec, isoinfo};
use crate::device::DriveState;
use crate::error::ProbeError;
use std::path::{Path, PathBuf};

// cdrtools from Homebrew/MacPorts is not on the default PATH of launchd jobs.
const ISOINFO: &str = "/usr/local/bin/isoinfo";

/// Extracts the device from a `drutil list` line such as
/// `1  HL-DT-ST DVD-RW GX50N   RP09   FireWire   Name: /dev/disk2`.
pub(super) fn parse_drutil_device(line: &str) -> Option<PathBuf> {
    let rest = line[line.find("Name:")? + 5..].trim();
    (!rest.is_empty()).then(|| PathBuf::from(rest))
}

pub(super) fn list_optical_drives() -> Result<Vec<PathBuf>, ProbeError> {
    let mut drives: Vec<PathBuf> = exec("drutil", &["list"])?
        .iter()
        .filter_map(|line| parse_drutil_device(line))
        .collect();
    drives.sort();
    Ok(drives)
}

pub(super) fn list_removable_drives() -> Result<Vec<PathBuf>, ProbeError> {
    Ok(Vec::new())
}

pub(super) fn resolve_label(path: &Path) -> Result<Option<String>, ProbeError> {
    Ok(isoinfo(ISOINFO, path)?.volume_id)
}

pub(super) fn resolve_geometry(path: &Path) -> Result<Geometry, ProbeError> {
    isoinfo(ISOINFO, path)?.geometry()
}

/// `drutil` offers no cheap tray query, so a listed drive is taken as ready
/// and a missing disc surfaces as a geometry failure instead.
pub(super) fn resolve_state(_path: &Path) -> Result<DriveState, ProbeError> {
    Ok(DriveState::Ready)
}

pub(super) fn eject(_path: &Path) -> Result<(), ProbeError> {
    exec("drutil", &["tray", "eject"]).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_drutil_list() {
        let line = "1  HL-DT-ST DVD-RW GX50N   RP09   FireWire   Name: /dev/disk2";
        assert_eq!(parse_drutil_device(line), Some(PathBuf::from("/dev/disk2")));
        assert_eq!(parse_drutil_device("   Vendor   Product"), None);
    }
}
