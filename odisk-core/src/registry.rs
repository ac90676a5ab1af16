//! The disk registry: enumeration, identifiers and change detection.
//!
//! Each [`DiskRegistry::update`] builds a brand-new [`Catalog`] from the
//! probe and publishes it as one immutable snapshot, so readers see either
//! the previous catalog or the new one with images and drives both assigned.
//! Updates are serialized by a writer lock; [`ChangeNotifier::update`] runs
//! under that lock and therefore never concurrently with itself.

use crate::device::Disk;
use crate::error::{DiskError, DiskResult, NotifierError};
use crate::platform::MediaProbe;
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Change-detection digest over the `label:size` pairs of a disk list.
///
/// Not an identity: two different media sets with equal labels and sizes
/// fingerprint the same.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Computes the fingerprint, resolving each disk's label and size.
    /// This may shell out once per disk.
    pub fn of<'a>(disks: impl IntoIterator<Item = &'a Disk>) -> Self {
        let mut hasher = Sha256::new();
        for disk in disks {
            hasher.update(disk.fingerprint_entry().as_bytes());
            hasher.update(b"\n");
        }
        Self(hasher.finalize().into())
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..16])
    }
}

/// Observer informed whenever an update detects a catalog change.
pub trait ChangeNotifier: Send + Sync {
    fn update(&self, catalog: &Catalog) -> Result<(), NotifierError>;
}

/// A notifier that does nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopNotifier;

impl ChangeNotifier for NoopNotifier {
    fn update(&self, _catalog: &Catalog) -> Result<(), NotifierError> {
        Ok(())
    }
}

/// One published catalog: session identifiers mapped to disks.
#[derive(Debug)]
pub struct Catalog {
    entries: Vec<(String, Arc<Disk>)>,
    image_count: usize,
    image_fingerprint: Fingerprint,
    drive_fingerprint: Fingerprint,
    generation: u64,
}

impl Catalog {
    fn new(
        images: Vec<Disk>,
        drives: Vec<Disk>,
        image_fingerprint: Fingerprint,
        drive_fingerprint: Fingerprint,
        generation: u64,
    ) -> Self {
        let image_count = images.len();
        let entries = images
            .into_iter()
            .chain(drives)
            .enumerate()
            .map(|(index, disk)| (format!("disk{}", index + 1), Arc::new(disk)))
            .collect();
        Self {
            entries,
            image_count,
            image_fingerprint,
            drive_fingerprint,
            generation,
        }
    }

    /// Looks up a disk by session identifier (`disk1`) or stable identifier.
    pub fn get(&self, id: &str) -> Option<&Arc<Disk>> {
        self.lookup(id).map(|(_, disk)| disk)
    }

    /// Like [`Catalog::get`], also returning the session identifier.
    pub fn lookup(&self, id: &str) -> Option<(&str, &Arc<Disk>)> {
        self.iter()
            .find(|(session_id, _)| *session_id == id)
            .or_else(|| self.iter().find(|(_, disk)| disk.stable_id() == id))
    }

    /// Entries in identifier order: image files first, then drives.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<Disk>)> {
        self.entries.iter().map(|(id, disk)| (id.as_str(), disk))
    }

    pub fn ids(&self) -> Vec<&str> {
        self.entries.iter().map(|(id, _)| id.as_str()).collect()
    }

    pub fn images(&self) -> impl Iterator<Item = &Arc<Disk>> {
        self.entries[..self.image_count].iter().map(|(_, disk)| disk)
    }

    pub fn drives(&self) -> impl Iterator<Item = &Arc<Disk>> {
        self.entries[self.image_count..].iter().map(|(_, disk)| disk)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn image_fingerprint(&self) -> Fingerprint {
        self.image_fingerprint
    }

    pub fn drive_fingerprint(&self) -> Fingerprint {
        self.drive_fingerprint
    }

    /// How many updates produced this catalog, starting at 1.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Owns the current catalog and keeps it in sync with the probe.
pub struct DiskRegistry {
    root: PathBuf,
    probe: Arc<dyn MediaProbe>,
    notifier: Arc<dyn ChangeNotifier>,
    include_removable: bool,
    current: RwLock<Option<Arc<Catalog>>>,
    writer: Mutex<()>,
}

impl DiskRegistry {
    /// Creates an empty registry serving images from `root`. Nothing is
    /// enumerated until the first [`DiskRegistry::catalog`] or
    /// [`DiskRegistry::update`] call.
    pub fn new(
        root: impl Into<PathBuf>,
        probe: Arc<dyn MediaProbe>,
        notifier: Arc<dyn ChangeNotifier>,
    ) -> Self {
        Self {
            root: root.into(),
            probe,
            notifier,
            include_removable: false,
            current: RwLock::new(None),
            writer: Mutex::new(()),
        }
    }

    /// Also list removable block devices after the optical drives.
    pub fn with_removable_drives(mut self, include: bool) -> Self {
        self.include_removable = include;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn probe(&self) -> &Arc<dyn MediaProbe> {
        &self.probe
    }

    /// The current catalog, populating it on first access.
    pub fn catalog(&self) -> DiskResult<Arc<Catalog>> {
        if let Some(catalog) = self.current.read().as_ref() {
            return Ok(Arc::clone(catalog));
        }

        let _writer = self.writer.lock();
        // Another caller may have populated it while we waited.
        if let Some(catalog) = self.current.read().as_ref() {
            return Ok(Arc::clone(catalog));
        }
        self.update_locked()
    }

    /// Looks up a disk in the current catalog.
    pub fn get(&self, id: &str) -> DiskResult<Arc<Disk>> {
        self.catalog()?
            .get(id)
            .cloned()
            .ok_or_else(|| DiskError::DiskNotFound(id.to_string()))
    }

    /// Re-enumerates media, publishes the new catalog and notifies on change.
    ///
    /// # Errors
    ///
    /// Fails only if the image root cannot be listed; the previous catalog
    /// then stays published. Drive enumeration failures yield an empty drive
    /// list and notifier failures are logged.
    pub fn update(&self) -> DiskResult<Arc<Catalog>> {
        let _writer = self.writer.lock();
        self.update_locked()
    }

    fn update_locked(&self) -> DiskResult<Arc<Catalog>> {
        let previous = self.current.read().clone();
        let mut changed = previous.is_none();

        let images: Vec<Disk> = self
            .probe
            .list_image_files(&self.root)?
            .into_iter()
            .map(|path| Disk::image(path, Arc::clone(&self.probe)))
            .collect();
        let image_fingerprint = Fingerprint::of(&images);
        if previous
            .as_ref()
            .is_some_and(|catalog| catalog.image_fingerprint != image_fingerprint)
        {
            debug!("image files changed in {}", self.root.display());
            changed = true;
        }

        let drives = self.enumerate_drives();
        let drive_fingerprint = Fingerprint::of(&drives);
        if previous
            .as_ref()
            .is_some_and(|catalog| catalog.drive_fingerprint != drive_fingerprint)
        {
            debug!("drive media changed");
            changed = true;
        }

        let generation = previous.as_ref().map_or(1, |catalog| catalog.generation + 1);
        let catalog = Arc::new(Catalog::new(
            images,
            drives,
            image_fingerprint,
            drive_fingerprint,
            generation,
        ));
        *self.current.write() = Some(Arc::clone(&catalog));

        if changed {
            info!(
                "Catalog changed: {} disks ({} images)",
                catalog.len(),
                catalog.image_count
            );
            if let Err(err) = self.notifier.update(&catalog) {
                warn!("Change notification failed: {}", err);
            }
        }

        Ok(catalog)
    }

    fn enumerate_drives(&self) -> Vec<Disk> {
        let mut drives: Vec<Disk> = match self.probe.list_optical_drives() {
            Ok(paths) => paths
                .into_iter()
                .map(|path| Disk::optical(path, Arc::clone(&self.probe)))
                .collect(),
            Err(err) => {
                warn!("Optical drive enumeration failed, assuming none: {}", err);
                Vec::new()
            }
        };

        if self.include_removable {
            match self.probe.list_removable_drives() {
                Ok(paths) => drives.extend(
                    paths
                        .into_iter()
                        .map(|path| Disk::removable(path, Arc::clone(&self.probe))),
                ),
                Err(err) => warn!("Removable drive enumeration failed, assuming none: {}", err),
            }
        }

        drives
    }
}

impl fmt::Debug for DiskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskRegistry")
            .field("root", &self.root)
            .field("include_removable", &self.include_removable)
            .field("current", &*self.current.read())
            .finish()
    }
}
