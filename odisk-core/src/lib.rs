//! The core, transport-agnostic library for the `odisk` remote disc server.
//!
//! `odisk-core` turns the optical drives, removable media and disk images of
//! a host into a catalog of byte-range readable disks. It handles device
//! discovery, readiness tracking for media that come and go, change detection
//! for discovery announcements, and bounds-checked range reads. Serving those
//! reads over HTTP or announcing them over mDNS is left to the embedding
//! application.
//!
//! The library is structured into several key modules:
//! - [`device`]: The [`Disk`](device::Disk) enum and its readiness state machine.
//! - [`platform`]: The [`MediaProbe`](platform::MediaProbe) capability and
//!   the shell-tool backed probe for the host OS.
//! - [`registry`]: The [`DiskRegistry`](registry::DiskRegistry) that owns the
//!   catalog and notifies a [`ChangeNotifier`](registry::ChangeNotifier).
//! - [`service`]: Request-level read/stat/ingest operations for transports.
//! - [`mod@read`], [`range`]: Byte-window validation and positioned reads.
//! - [`announce`]: Discovery service records.
//! - [`ingest`]: Atomic storage of uploaded images.
//! - [`config`]: Server configuration.
//!
//! ## Example: Reading the first sector of every ready disk
//!
//! ```rust,no_run
//! use odisk_core::{platform, registry::{DiskRegistry, NoopNotifier}, service::DiskService};
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), odisk_core::DiskError> {
//!     let registry = DiskRegistry::new("/mnt/images", platform::system_probe(), Arc::new(NoopNotifier));
//!     let service = DiskService::new(Arc::new(registry));
//!
//!     for disk in service.list()? {
//!         match service.read(&disk.id, 0, Some(2047)) {
//!             Ok(response) => println!("{}: {}", disk.id, response.content_range()),
//!             Err(err) => println!("{}: {}", disk.id, err),
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod announce;
pub mod config;
pub mod device;
pub mod error;
pub mod ingest;
pub mod platform;
pub mod range;
pub mod read;
pub mod registry;
pub mod service;

pub use device::{Disk, DiskInfo, DiskKind, DriveState};
pub use error::{DiskError, DiskResult, NotifierError, ProbeError};
pub use registry::{Catalog, ChangeNotifier, DiskRegistry};
