#![allow(dead_code)]

use odisk_core::platform::{Geometry, MediaProbe};
use odisk_core::registry::{Catalog, ChangeNotifier, DiskRegistry};
use odisk_core::{DriveState, NotifierError, ProbeError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tempfile::TempDir;

/// A probe whose answers are set by the test.
#[derive(Default)]
pub struct ScriptedProbe {
    /// `None` makes drive enumeration fail as if the tool were missing.
    drives: Mutex<Option<Vec<PathBuf>>>,
    states: Mutex<HashMap<PathBuf, DriveState>>,
    labels: Mutex<HashMap<PathBuf, String>>,
    geometry: Mutex<HashMap<PathBuf, Geometry>>,
    pub state_queries: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new() -> Arc<Self> {
        let probe = Self::default();
        *probe.drives.lock() = Some(Vec::new());
        Arc::new(probe)
    }

    pub fn set_drives(&self, drives: &[&Path]) {
        *self.drives.lock() = Some(drives.iter().map(|p| p.to_path_buf()).collect());
    }

    pub fn fail_drive_listing(&self) {
        *self.drives.lock() = None;
    }

    pub fn insert_disc(&self, drive: &Path, label: &str, block_size: u64, volume_blocks: u64) {
        self.states.lock().insert(drive.to_path_buf(), DriveState::Ready);
        self.labels.lock().insert(drive.to_path_buf(), label.to_string());
        self.geometry.lock().insert(
            drive.to_path_buf(),
            Geometry {
                block_size,
                volume_blocks,
            },
        );
    }

    pub fn set_state(&self, drive: &Path, state: DriveState) {
        self.states.lock().insert(drive.to_path_buf(), state);
        if state != DriveState::Ready {
            self.labels.lock().remove(drive);
            self.geometry.lock().remove(drive);
        }
    }

    pub fn set_label(&self, path: &Path, label: &str) {
        self.labels.lock().insert(path.to_path_buf(), label.to_string());
    }
}

impl MediaProbe for ScriptedProbe {
    fn list_optical_drives(&self) -> Result<Vec<PathBuf>, ProbeError> {
        self.drives.lock().clone().ok_or_else(|| ProbeError::ToolMissing {
            tool: "wodim".to_string(),
        })
    }

    fn resolve_label(&self, path: &Path) -> Result<Option<String>, ProbeError> {
        Ok(self.labels.lock().get(path).cloned())
    }

    fn resolve_geometry(&self, path: &Path) -> Result<Geometry, ProbeError> {
        self.geometry
            .lock()
            .get(path)
            .copied()
            .ok_or_else(|| ProbeError::Parse {
                tool: "isoinfo".to_string(),
                detail: "no volume".to_string(),
            })
    }

    fn resolve_state(&self, path: &Path) -> Result<DriveState, ProbeError> {
        self.state_queries.fetch_add(1, Ordering::SeqCst);
        self.states
            .lock()
            .get(path)
            .copied()
            .ok_or_else(|| ProbeError::ToolFailed {
                tool: "setcd".to_string(),
                status: Some(1),
                stderr: "no such device".to_string(),
            })
    }
}

/// Counts notifications and can be told to fail.
#[derive(Default)]
pub struct CountingNotifier {
    calls: AtomicUsize,
    fail: AtomicBool,
    last_len: AtomicUsize,
}

impl CountingNotifier {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_len(&self) -> usize {
        self.last_len.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl ChangeNotifier for CountingNotifier {
    fn update(&self, catalog: &Catalog) -> Result<(), NotifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.last_len.store(catalog.len(), Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotifierError::Transport("multicast socket closed".to_string()));
        }
        Ok(())
    }
}

/// Bytes `0, 1, 2, …` wrapping at 251, so every offset is recognisable.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn write_image(root: &Path, name: &str, len: usize) -> PathBuf {
    let path = root.join(name);
    fs::write(&path, pattern(len)).unwrap();
    path
}

pub struct Fixture {
    pub root: TempDir,
    pub devices: TempDir,
    pub probe: Arc<ScriptedProbe>,
    pub notifier: Arc<CountingNotifier>,
    pub registry: Arc<DiskRegistry>,
}

impl Fixture {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let devices = tempfile::tempdir().unwrap();
        let probe = ScriptedProbe::new();
        let notifier = Arc::new(CountingNotifier::default());
        let registry = Arc::new(DiskRegistry::new(
            root.path(),
            probe.clone(),
            notifier.clone(),
        ));
        Self {
            root,
            devices,
            probe,
            notifier,
            registry,
        }
    }

    /// A file standing in for a drive's device node.
    pub fn device_node(&self, name: &str, len: usize) -> PathBuf {
        write_image(self.devices.path(), name, len)
    }
}
