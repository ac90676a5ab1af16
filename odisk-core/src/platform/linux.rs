use super::{Geometry, exec, isoinfo, parse_number};
use crate::device::DriveState;
use crate::error::ProbeError;
use nix::ioctl_read;
use std::fs::{self, File};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::debug;

const ISOINFO: &str = "isoinfo";

ioctl_read!(blkgetsize64, 0x12, 114, u64);

/// Helper to read a specific file from the /sys/block filesystem.
fn read_sys_file(device_name: &str, file: &str) -> io::Result<String> {
    let path = PathBuf::from("/sys/block").join(device_name).join(file);
    fs::read_to_string(path).map(|s| s.trim().to_string())
}

/// Helper to find the parent device of a partition (e.g., /dev/sda1 -> /dev/sda).
/// This is used to find the system drive's parent for exclusion.
fn get_parent_device_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if path_str.starts_with("/dev/sd") {
        if let Some(index) = path_str.rfind(|c: char| c.is_alphabetic()) {
            return PathBuf::from(&path_str[..=index]);
        }
    } else if path_str.starts_with("/dev/mmcblk") || path_str.starts_with("/dev/nvme") {
        if let Some(index) = path_str.rfind('p') {
            return PathBuf::from(&path_str[..index]);
        }
    }

    path.to_path_buf()
}

/// Extracts the device from a `wodim --devices` line such as
/// `0  dev='/dev/sr0'	rwrw-- : 'HL-DT-ST' 'DVDRAM GH24NSD1'`.
pub(super) fn parse_wodim_device(line: &str) -> Option<PathBuf> {
    let rest = &line[line.find("dev='")? + 5..];
    let device = &rest[..rest.find('\'')?];
    (!device.is_empty()).then(|| PathBuf::from(device))
}

/// Maps the first line of `setcd -i` output to a drive state.
///
/// Later checks win, so "disc found" overrides a preceding "not ready" and
/// "no disc" overrides everything.
pub(super) fn parse_setcd_state(output: &str) -> DriveState {
    let output = output.to_ascii_lowercase();
    let mut state = DriveState::NotReady;
    if output.contains("is open") {
        state = DriveState::Open;
    }
    if output.contains("not ready") {
        state = DriveState::NotReady;
    }
    if output.contains("disc found") {
        state = DriveState::Ready;
    }
    if output.contains("no disc") {
        state = DriveState::Empty;
    }
    state
}

pub(super) fn list_optical_drives() -> Result<Vec<PathBuf>, ProbeError> {
    let mut drives: Vec<PathBuf> = exec("wodim", &["--devices"])?
        .iter()
        .filter_map(|line| parse_wodim_device(line))
        .collect();
    drives.sort();
    Ok(drives)
}

/// Scans for removable block devices on a Linux system.
///
/// Devices are discovered by iterating through `/sys/block`:
/// 1.  The main system drive (e.g., `/dev/nvme0n1`) is excluded.
/// 2.  Loop devices and optical drives (`sr*`) are skipped; the latter are
///     reported by [`list_optical_drives`].
/// 3.  `/sys/block/<device>/removable` must be `1`.
/// 4.  `/sys/block/<device>/size` must be non-zero, which filters out empty
///     card readers.
pub(super) fn list_removable_drives() -> Result<Vec<PathBuf>, ProbeError> {
    let disks = sysinfo::Disks::new_with_refreshed_list();
    let system_disk_parent = disks
        .iter()
        .find(|disk| disk.mount_point() == Path::new("/"))
        .map(|disk| get_parent_device_path(&PathBuf::from("/dev/").join(disk.name())))
        .ok_or_else(|| ProbeError::Unavailable("Could not determine system drive.".into()))?;

    let mut devices = Vec::new();
    for entry in fs::read_dir("/sys/block")?.filter_map(Result::ok) {
        let device_name = entry.file_name().to_string_lossy().to_string();
        let device_path = PathBuf::from("/dev/").join(&device_name);

        if device_name.starts_with("loop")
            || device_name.starts_with("sr")
            || device_path == system_disk_parent
        {
            continue;
        }

        let is_removable = read_sys_file(&device_name, "removable")
            .map(|s| s == "1")
            .unwrap_or(false);
        if !is_removable {
            continue;
        }

        let size_sectors = read_sys_file(&device_name, "size")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);
        if size_sectors == 0 {
            continue;
        }

        devices.push(device_path);
    }

    devices.sort();
    Ok(devices)
}

pub(super) fn resolve_label(path: &Path) -> Result<Option<String>, ProbeError> {
    Ok(isoinfo(ISOINFO, path)?.volume_id)
}

/// Volume geometry from `isoinfo`, falling back to the kernel's view of the
/// block device when the media is not ISO 9660 or the tool is missing.
pub(super) fn resolve_geometry(path: &Path) -> Result<Geometry, ProbeError> {
    match isoinfo(ISOINFO, path).and_then(|info| info.geometry()) {
        Ok(geometry) => Ok(geometry),
        Err(err) => {
            debug!("isoinfo geometry for {} unavailable: {}", path.display(), err);
            block_device_geometry(path)
        }
    }
}

fn block_device_geometry(path: &Path) -> Result<Geometry, ProbeError> {
    let sectors = path
        .file_name()
        .and_then(|name| read_sys_file(&name.to_string_lossy(), "size").ok());
    if let Some(sectors) = sectors {
        return Ok(Geometry {
            block_size: 512,
            volume_blocks: parse_number("sysfs", &sectors)?,
        });
    }

    let file = File::open(path)?;
    let mut size_bytes: u64 = 0;
    // SAFETY: BLKGETSIZE64 writes a single u64 through the provided pointer.
    unsafe {
        blkgetsize64(file.as_raw_fd(), &mut size_bytes).map_err(io::Error::from)?;
    }
    Ok(Geometry {
        block_size: 1,
        volume_blocks: size_bytes,
    })
}

pub(super) fn resolve_state(path: &Path) -> Result<DriveState, ProbeError> {
    let path = path.to_string_lossy();
    let out = exec("setcd", &["-i", &path])?;
    let first = out.first().ok_or_else(|| ProbeError::Parse {
        tool: "setcd".to_string(),
        detail: "no output".to_string(),
    })?;
    Ok(parse_setcd_state(first))
}

pub(super) fn eject(path: &Path) -> Result<(), ProbeError> {
    let path = path.to_string_lossy();
    exec("eject", &[&path]).map(|_| ())
}
