//! Provides platform-specific functionality.
//!
//! The registry never talks to the operating system directly. Everything it
//! needs to know about media (which drives exist, what their volume label and
//! geometry are, whether a disc is in the tray) comes through the
//! [`MediaProbe`] capability it is constructed with.
//!
//! [`SystemProbe`] is the production implementation. It uses conditional
//! compilation (`#[cfg]`) to pick the shell tools for the target OS (e.g.
//! `wodim`/`setcd` on Linux, `drutil` on macOS); each submodule exposes the
//! same set of functions so the probe itself stays platform-agnostic.

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
use self::linux as os;

#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "macos")]
use self::macos as os;

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
mod other;
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
use self::other as os;

use crate::device::DriveState;
use crate::error::ProbeError;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tracing::debug;

/// File extensions recognised as disk images.
pub const IMAGE_EXTENSIONS: [&str; 3] = ["iso", "img", "dmg"];

/// Returns the text after the last `.` in `name`, if any.
pub fn extension(name: &str) -> Option<&str> {
    name.rfind('.').map(|index| &name[index + 1..])
}

/// Whether `path` names a disk image by its extension.
pub fn is_image(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(extension)
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext))
}

/// Block geometry of a volume.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Geometry {
    /// Logical block size in bytes.
    pub block_size: u64,
    /// Number of logical blocks in the volume.
    pub volume_blocks: u64,
}

impl Geometry {
    /// Total addressable size in bytes.
    pub fn size_bytes(self) -> u64 {
        self.block_size.saturating_mul(self.volume_blocks)
    }
}

/// The host capability that enumerates and interrogates media.
///
/// Implementations are expected to block; the registry calls them from
/// whichever thread asks for a catalog or a disk's properties.
pub trait MediaProbe: Send + Sync {
    /// Lists the disk images directly inside `root`, sorted by path.
    fn list_image_files(&self, root: &Path) -> Result<Vec<PathBuf>, ProbeError> {
        let mut images = Vec::new();
        for entry in fs::read_dir(root)? {
            let path = entry?.path();
            if is_image(&path) {
                images.push(path);
            }
        }
        images.sort();
        Ok(images)
    }

    /// Lists optical drive device paths, sorted.
    fn list_optical_drives(&self) -> Result<Vec<PathBuf>, ProbeError>;

    /// Lists removable block devices (USB sticks, SD cards).
    fn list_removable_drives(&self) -> Result<Vec<PathBuf>, ProbeError> {
        Ok(Vec::new())
    }

    /// Reads the volume label, `None` when the volume has none.
    fn resolve_label(&self, path: &Path) -> Result<Option<String>, ProbeError>;

    fn resolve_geometry(&self, path: &Path) -> Result<Geometry, ProbeError>;

    /// Queries the tray/media state of an optical drive.
    fn resolve_state(&self, path: &Path) -> Result<DriveState, ProbeError>;

    fn eject(&self, path: &Path) -> Result<(), ProbeError> {
        Err(ProbeError::Unavailable(format!(
            "cannot eject {}",
            path.display()
        )))
    }
}

/// [`MediaProbe`] backed by the host's shell tools.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemProbe;

impl MediaProbe for SystemProbe {
    fn list_optical_drives(&self) -> Result<Vec<PathBuf>, ProbeError> {
        os::list_optical_drives()
    }

    fn list_removable_drives(&self) -> Result<Vec<PathBuf>, ProbeError> {
        os::list_removable_drives()
    }

    fn resolve_label(&self, path: &Path) -> Result<Option<String>, ProbeError> {
        os::resolve_label(path)
    }

    fn resolve_geometry(&self, path: &Path) -> Result<Geometry, ProbeError> {
        os::resolve_geometry(path)
    }

    fn resolve_state(&self, path: &Path) -> Result<DriveState, ProbeError> {
        os::resolve_state(path)
    }

    fn eject(&self, path: &Path) -> Result<(), ProbeError> {
        os::eject(path)
    }
}

/// The probe for the host this binary was built for.
pub fn system_probe() -> Arc<dyn MediaProbe> {
    Arc::new(SystemProbe)
}

/// Fields of interest from `isoinfo -d` output.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IsoInfo {
    pub volume_id: Option<String>,
    pub block_size: Option<u64>,
    pub volume_blocks: Option<u64>,
}

impl IsoInfo {
    /// Parses `isoinfo -d` output. Keys are matched case-insensitively since
    /// builds differ in capitalisation.
    pub fn parse(lines: &[String]) -> Result<Self, ProbeError> {
        let mut info = Self::default();
        for line in lines {
            if let Some(value) = strip_key(line, "volume id:") {
                if !value.is_empty() {
                    info.volume_id = Some(value.to_string());
                }
            } else if let Some(value) = strip_key(line, "volume size is:") {
                info.volume_blocks = Some(parse_number("isoinfo", value)?);
            } else if let Some(value) = strip_key(line, "logical block size is:") {
                info.block_size = Some(parse_number("isoinfo", value)?);
            }
        }
        Ok(info)
    }

    pub fn geometry(&self) -> Result<Geometry, ProbeError> {
        match (self.block_size, self.volume_blocks) {
            (Some(block_size), Some(volume_blocks)) => Ok(Geometry {
                block_size,
                volume_blocks,
            }),
            _ => Err(ProbeError::Parse {
                tool: "isoinfo".to_string(),
                detail: "no volume geometry reported".to_string(),
            }),
        }
    }
}

fn strip_key<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let head = line.get(..key.len())?;
    head.eq_ignore_ascii_case(key)
        .then(|| line[key.len()..].trim())
}

pub(crate) fn parse_number(tool: &str, value: &str) -> Result<u64, ProbeError> {
    value.trim().parse::<u64>().map_err(|_| ProbeError::Parse {
        tool: tool.to_string(),
        detail: format!("expected a number, got {value:?}"),
    })
}

/// Runs `isoinfo -d -i <path>` with the given binary and parses the result.
pub(crate) fn isoinfo(program: &str, path: &Path) -> Result<IsoInfo, ProbeError> {
    let path = path.to_string_lossy();
    let lines = exec(program, &["-d", "-i", &path])?;
    IsoInfo::parse(&lines)
}

/// Executes a command line and returns its stdout as lines.
pub(crate) fn exec(program: &str, args: &[&str]) -> Result<Vec<String>, ProbeError> {
    debug!("$ {} {}", program, args.join(" "));
    let output = Command::new(program).args(args).output().map_err(|err| {
        if err.kind() == io::ErrorKind::NotFound {
            ProbeError::ToolMissing {
                tool: program.to_string(),
            }
        } else {
            ProbeError::Io(err)
        }
    })?;

    if !output.status.success() {
        return Err(ProbeError::ToolFailed {
            tool: program.to_string(),
            status: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::to_string)
        .collect())
}
