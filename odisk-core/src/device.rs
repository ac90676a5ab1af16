//! Disks: the uniform abstraction over image files and physical drives.
//!
//! Every [`Disk`] keeps its lazily resolved properties (label, size, geometry)
//! in a single [`MediaCache`]. Drive variants pull their state from the
//! [`MediaProbe`] on every [`Disk::state`] call; whenever the answer differs
//! from the cached one, the cache is reset and its generation bumped, because
//! a new state generally means new or absent media.

use crate::error::{DiskError, DiskResult};
use crate::platform::{Geometry, MediaProbe};
use crate::range::ByteWindow;
use crate::read;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tracing::{debug, error, warn};

/// Readiness of the media behind a disk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriveState {
    /// Media present and readable.
    Ready,
    /// Spinning up, unreadable, or the probe could not be queried.
    NotReady,
    /// Tray physically open.
    Open,
    /// No media.
    #[default]
    Empty,
}

impl DriveState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::NotReady => "NOT_READY",
            Self::Open => "OPEN",
            Self::Empty => "EMPTY",
        }
    }
}

impl fmt::Display for DriveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskKind {
    ImageFile,
    OpticalDrive,
    RemovableDrive,
}

impl fmt::Display for DiskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ImageFile => "image",
            Self::OpticalDrive => "optical",
            Self::RemovableDrive => "removable",
        })
    }
}

/// Lazily resolved media properties plus the state they were resolved under.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MediaCache {
    label: Option<String>,
    size: Option<u64>,
    geometry: Option<Geometry>,
    state: DriveState,
    generation: u64,
}

impl MediaCache {
    pub fn new(state: DriveState) -> Self {
        Self {
            state,
            ..Self::default()
        }
    }

    /// Records a freshly queried state. Returns `true` on a transition, in
    /// which case every resolved property has been dropped.
    pub fn observe(&mut self, state: DriveState) -> bool {
        if state == self.state {
            return false;
        }
        self.state = state;
        self.label = None;
        self.size = None;
        self.geometry = None;
        self.generation += 1;
        true
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn geometry(&self) -> Option<Geometry> {
        self.geometry
    }

    pub fn state(&self) -> DriveState {
        self.state
    }

    /// Number of state transitions observed so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

struct Media {
    path: PathBuf,
    probe: Arc<dyn MediaProbe>,
    cache: Mutex<MediaCache>,
}

impl Media {
    fn new(path: PathBuf, probe: Arc<dyn MediaProbe>, state: DriveState) -> Self {
        Self {
            path,
            probe,
            cache: Mutex::new(MediaCache::new(state)),
        }
    }

    fn observe(&self, state: DriveState) {
        let mut cache = self.cache.lock();
        let previous = cache.state();
        if cache.observe(state) {
            debug!(
                "{} changed from {} to {}, media properties reset",
                self.path.display(),
                previous,
                state
            );
        }
    }

    fn generation(&self) -> u64 {
        self.cache.lock().generation()
    }

    // Resolution runs without the lock held, so a transition may land in
    // between; a value resolved against an older generation is discarded.
    fn store(&self, generation: u64, put: impl FnOnce(&mut MediaCache)) {
        let mut cache = self.cache.lock();
        if cache.generation == generation {
            put(&mut cache);
        }
    }

    fn forget_size(&self) {
        let mut cache = self.cache.lock();
        cache.size = None;
        cache.geometry = None;
    }

    fn geometry(&self) -> DiskResult<Geometry> {
        let (cached, generation) = {
            let cache = self.cache.lock();
            (cache.geometry(), cache.generation())
        };
        if let Some(geometry) = cached {
            return Ok(geometry);
        }

        let geometry = self.probe.resolve_geometry(&self.path)?;
        self.store(generation, |cache| {
            cache.geometry = Some(geometry);
            cache.size = Some(geometry.size_bytes());
        });
        Ok(geometry)
    }

    fn cached_size(&self) -> Option<u64> {
        self.cache.lock().size()
    }

    fn cached_label(&self) -> Option<String> {
        self.cache.lock().label().map(str::to_string)
    }

    /// Label from the probe; `fallback` stands in when the volume has none.
    /// Probe failures are not cached so the next call asks again.
    fn label(&self, fallback: impl FnOnce(&Path) -> String) -> String {
        let generation = {
            let cache = self.cache.lock();
            if let Some(label) = cache.label() {
                return label.to_string();
            }
            cache.generation()
        };

        match self.probe.resolve_label(&self.path) {
            Ok(label) => {
                let label = label.unwrap_or_else(|| fallback(&self.path));
                self.store(generation, |cache| cache.label = Some(label.clone()));
                label
            }
            Err(err) => {
                debug!("no volume label for {}: {}", self.path.display(), err);
                fallback(&self.path)
            }
        }
    }
}

impl fmt::Debug for Media {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Media")
            .field("path", &self.path)
            .field("cache", &*self.cache.lock())
            .finish()
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn media_changed(path: &Path) -> DiskError {
    DiskError::Io(io::Error::other(format!(
        "media in {} changed while reading",
        path.display()
    )))
}

fn device_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// A disk image file in the image root.
#[derive(Debug)]
pub struct ImageFile {
    media: Media,
}

impl ImageFile {
    pub fn new(path: impl Into<PathBuf>, probe: Arc<dyn MediaProbe>) -> Self {
        let path = path.into();
        let state = if path.exists() {
            DriveState::Ready
        } else {
            DriveState::Empty
        };
        Self {
            media: Media::new(path, probe, state),
        }
    }

    pub fn exists(&self) -> bool {
        self.media.path.exists()
    }

    /// `Ready` while the file exists, `Empty` once it is gone.
    pub fn state(&self) -> DriveState {
        let state = if self.exists() {
            DriveState::Ready
        } else {
            DriveState::Empty
        };
        self.media.observe(state);
        state
    }

    pub fn size(&self) -> DiskResult<u64> {
        let generation = {
            let cache = self.media.cache.lock();
            if let Some(size) = cache.size() {
                return Ok(size);
            }
            cache.generation()
        };

        let size = fs::metadata(&self.media.path)?.len();
        self.media.store(generation, |cache| cache.size = Some(size));
        Ok(size)
    }

    /// The ISO volume id, or the file stem for images without one.
    pub fn label(&self) -> String {
        self.media.label(file_stem)
    }
}

/// A physical optical drive.
#[derive(Debug)]
pub struct OpticalDrive {
    media: Media,
}

impl OpticalDrive {
    pub fn new(path: impl Into<PathBuf>, probe: Arc<dyn MediaProbe>) -> Self {
        Self {
            media: Media::new(path.into(), probe, DriveState::Empty),
        }
    }

    /// Queries the drive. A probe failure reads as `NotReady` and leaves the
    /// cached state untouched.
    pub fn state(&self) -> DriveState {
        match self.media.probe.resolve_state(&self.media.path) {
            Ok(state) => {
                self.media.observe(state);
                state
            }
            Err(err) => {
                error!("Failed to query {}: {}", self.media.path.display(), err);
                DriveState::NotReady
            }
        }
    }

    pub fn geometry(&self) -> DiskResult<Geometry> {
        self.media.geometry()
    }

    /// `block_size × volume_blocks` of the inserted volume.
    pub fn size(&self) -> DiskResult<u64> {
        if let Some(size) = self.media.cached_size() {
            return Ok(size);
        }
        Ok(self.media.geometry()?.size_bytes())
    }

    pub fn label(&self) -> String {
        self.media.label(|_| String::new())
    }

    pub fn eject(&self) -> DiskResult<()> {
        Ok(self.media.probe.eject(&self.media.path)?)
    }
}

/// A removable block device such as a USB stick or SD card.
#[derive(Debug)]
pub struct RemovableDrive {
    media: Media,
}

impl RemovableDrive {
    pub fn new(path: impl Into<PathBuf>, probe: Arc<dyn MediaProbe>) -> Self {
        Self {
            media: Media::new(path.into(), probe, DriveState::Empty),
        }
    }

    /// Removable devices have no tray; a device reporting a non-zero
    /// geometry is ready, a zero-sized one (an empty card reader) is empty.
    pub fn state(&self) -> DriveState {
        match self.media.probe.resolve_geometry(&self.media.path) {
            Ok(geometry) => {
                let state = if geometry.size_bytes() > 0 {
                    DriveState::Ready
                } else {
                    DriveState::Empty
                };
                self.media.observe(state);
                state
            }
            Err(err) => {
                error!("Failed to query {}: {}", self.media.path.display(), err);
                DriveState::NotReady
            }
        }
    }

    pub fn size(&self) -> DiskResult<u64> {
        if let Some(size) = self.media.cached_size() {
            return Ok(size);
        }
        Ok(self.media.geometry()?.size_bytes())
    }

    /// The volume label, or the device name (`sdb`) when there is none.
    pub fn label(&self) -> String {
        self.media.label(device_name)
    }

    pub fn eject(&self) -> DiskResult<()> {
        Ok(self.media.probe.eject(&self.media.path)?)
    }
}

/// Listing entry for a disk, as reported to clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DiskInfo {
    pub id: String,
    pub stable_id: String,
    pub kind: DiskKind,
    pub label: String,
    pub size: u64,
    pub path: PathBuf,
    pub state: DriveState,
}

/// A readable block-addressable medium.
#[derive(Debug)]
pub enum Disk {
    Image(ImageFile),
    Optical(OpticalDrive),
    Removable(RemovableDrive),
}

impl Disk {
    pub fn image(path: impl Into<PathBuf>, probe: Arc<dyn MediaProbe>) -> Self {
        Self::Image(ImageFile::new(path, probe))
    }

    pub fn optical(path: impl Into<PathBuf>, probe: Arc<dyn MediaProbe>) -> Self {
        Self::Optical(OpticalDrive::new(path, probe))
    }

    pub fn removable(path: impl Into<PathBuf>, probe: Arc<dyn MediaProbe>) -> Self {
        Self::Removable(RemovableDrive::new(path, probe))
    }

    fn media(&self) -> &Media {
        match self {
            Self::Image(disk) => &disk.media,
            Self::Optical(disk) => &disk.media,
            Self::Removable(disk) => &disk.media,
        }
    }

    pub fn kind(&self) -> DiskKind {
        match self {
            Self::Image(_) => DiskKind::ImageFile,
            Self::Optical(_) => DiskKind::OpticalDrive,
            Self::Removable(_) => DiskKind::RemovableDrive,
        }
    }

    pub fn path(&self) -> &Path {
        &self.media().path
    }

    /// Identifier derived from the path alone, so it survives re-enumeration
    /// in a different order.
    pub fn stable_id(&self) -> String {
        let digest = Sha256::digest(self.path().to_string_lossy().as_bytes());
        digest[..6].iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn state(&self) -> DriveState {
        match self {
            Self::Image(disk) => disk.state(),
            Self::Optical(disk) => disk.state(),
            Self::Removable(disk) => disk.state(),
        }
    }

    pub fn size(&self) -> DiskResult<u64> {
        match self {
            Self::Image(disk) => disk.size(),
            Self::Optical(disk) => disk.size(),
            Self::Removable(disk) => disk.size(),
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::Image(disk) => disk.label(),
            Self::Optical(disk) => disk.label(),
            Self::Removable(disk) => disk.label(),
        }
    }

    /// Number of state transitions this disk has observed.
    pub fn generation(&self) -> u64 {
        self.media().generation()
    }

    /// The label if already resolved under the current state.
    pub fn cached_label(&self) -> Option<String> {
        self.media().cached_label()
    }

    /// The size if already resolved under the current state.
    pub fn cached_size(&self) -> Option<u64> {
        self.media().cached_size()
    }

    /// Media are served read-only.
    pub fn erase(&self) -> DiskResult<()> {
        Err(DiskError::ReadOnly)
    }

    /// Ejects drive media. Image files have nothing to eject.
    pub fn eject(&self) -> DiskResult<()> {
        match self {
            Self::Image(_) => Ok(()),
            Self::Optical(disk) => disk.eject(),
            Self::Removable(disk) => disk.eject(),
        }
    }

    /// Reads `start..=end`; `end == None` reads to the last byte.
    ///
    /// # Errors
    ///
    /// [`DiskError::InvalidRange`] or [`DiskError::RangeExceedsDeviceSize`]
    /// for windows that do not fit the media as it is now. The state is
    /// queried again once the bytes are in; if the media changed meanwhile
    /// and the window no longer fits, the read fails with
    /// `RangeExceedsDeviceSize`. Media that end early fail the same way
    /// rather than returning a partial buffer.
    pub fn read(&self, start: u64, end: Option<u64>) -> DiskResult<Vec<u8>> {
        self.read_range(start, end).map(|(_, data)| data)
    }

    /// Like [`Disk::read`], also returning the resolved window.
    pub fn read_range(&self, start: u64, end: Option<u64>) -> DiskResult<(ByteWindow, Vec<u8>)> {
        // A swap to media that still covers the window is read once more.
        for _ in 0..2 {
            let (window, generation) = self.window(start, end)?;
            let data = read::read_window(self.path(), window)?;
            if !self.settle(window, generation)? {
                debug!("{} changed while reading, reading again", self.path().display());
                continue;
            }
            let got = data.len() as u64;
            if got < window.len() {
                return Err(self.short_read(window, got));
            }
            return Ok((window, data));
        }
        Err(media_changed(self.path()))
    }

    /// Streams `start..=end` into `out`, reporting progress.
    ///
    /// Bytes already written cannot be taken back, so media that change
    /// during the copy fail it even when the new media would cover the window.
    pub fn copy_to<W, F>(
        &self,
        start: u64,
        end: Option<u64>,
        out: &mut W,
        running: Arc<AtomicBool>,
        on_read_start: impl FnOnce(u64),
        on_progress: F,
    ) -> DiskResult<ByteWindow>
    where
        W: Write,
        F: FnMut(u64),
    {
        let (window, generation) = self.window(start, end)?;
        let copied = read::copy_window(self.path(), window, out, running, on_read_start, on_progress)
            .map_err(|err| match err.kind() {
                io::ErrorKind::Interrupted => DiskError::Cancelled,
                _ => DiskError::Io(err),
            })?;
        if !self.settle(window, generation)? {
            return Err(media_changed(self.path()));
        }
        if copied < window.len() {
            return Err(self.short_read(window, copied));
        }
        Ok(window)
    }

    // The state is pulled again here, at read time, so a disc swapped since
    // the caller last looked is measured afresh. Media that are not ready
    // have no addressable bytes. The generation is taken before sizing so a
    // transition observed later marks the bytes as suspect.
    fn window(&self, start: u64, end: Option<u64>) -> DiskResult<(ByteWindow, u64)> {
        let ready = self.state() == DriveState::Ready;
        let generation = self.generation();
        let size = if ready { self.size()? } else { 0 };
        Ok((ByteWindow::resolve(start, end, size)?, generation))
    }

    /// Re-queries the state after a read. `Ok(true)` when nothing changed,
    /// `Ok(false)` when the media changed but still cover `window`.
    fn settle(&self, window: ByteWindow, generation: u64) -> DiskResult<bool> {
        let state = self.state();
        if state == DriveState::Ready && self.generation() == generation {
            return Ok(true);
        }

        let size = if state == DriveState::Ready {
            self.size()?
        } else {
            0
        };
        if window.end < size {
            return Ok(false);
        }
        warn!(
            "{} is {} with {} bytes after reading {}-{}",
            self.path().display(),
            state,
            size,
            window.start,
            window.end
        );
        // `window.end` was below the old size, so `end + 1` cannot overflow.
        Err(DiskError::RangeExceedsDeviceSize {
            overage: window.end + 1 - size,
            size,
        })
    }

    fn short_read(&self, window: ByteWindow, got: u64) -> DiskError {
        self.media().forget_size();
        let available = window.start + got;
        warn!(
            "{} ended at byte {} while reading {}-{}",
            self.path().display(),
            available,
            window.start,
            window.end
        );
        DiskError::RangeExceedsDeviceSize {
            overage: window.end + 1 - available,
            size: available,
        }
    }

    /// The `label:size` pair used for change detection. Media that are not
    /// ready contribute an empty label and zero size without being probed.
    pub fn fingerprint_entry(&self) -> String {
        if self.state() != DriveState::Ready {
            return ":0".to_string();
        }
        format!("{}:{}", self.label(), self.size_or_zero())
    }

    // Listings and fingerprints report an unsizable disk as empty.
    fn size_or_zero(&self) -> u64 {
        self.size().unwrap_or_else(|err| {
            warn!("Failed to size {}: {}", self.path().display(), err);
            0
        })
    }

    pub fn info(&self, id: &str) -> DiskInfo {
        let state = self.state();
        let (label, size) = if state == DriveState::Ready {
            (self.label(), self.size_or_zero())
        } else {
            (String::new(), 0)
        };
        DiskInfo {
            id: id.to_string(),
            stable_id: self.stable_id(),
            kind: self.kind(),
            label,
            size,
            path: self.path().to_path_buf(),
            state,
        }
    }
}
