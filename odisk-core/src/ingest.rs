//! Contains the logic for storing an uploaded disk image in the image root.
//!
//! The upload is streamed into a temporary file next to its destination and
//! only renamed into place once complete, so a half-written image is never
//! enumerated. An existing image is never replaced, since it may be in the
//! middle of being served. The registry does not watch the directory: callers must run
//! [`crate::registry::DiskRegistry::update`] afterwards (see
//! [`crate::service::DiskService::ingest`]).
use crate::error::{DiskError, DiskResult};
use crate::platform::is_image;
use sha2::{Digest, Sha256};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::NamedTempFile;

/// Outcome of a successful ingest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngestReport {
    pub path: PathBuf,
    pub size: u64,
    /// Hex SHA-256 of the stored bytes.
    pub sha256: String,
}

/// Checks that `name` is a bare file name with an image extension.
fn validate_name(name: &str) -> DiskResult<&Path> {
    let path = Path::new(name);
    let bare = path.file_name().is_some_and(|file| file == path.as_os_str());
    if !bare || !is_image(path) {
        return Err(DiskError::UnsupportedImage(name.to_string()));
    }
    Ok(path)
}

/// Streams `reader` into `root/name`.
///
/// # Arguments
///
/// * `root` - The image root directory.
/// * `name` - File name of the new image; must end in a known image extension.
/// * `reader` - The upload body.
/// * `running` - An `Arc<AtomicBool>` to allow for graceful cancellation.
/// * `on_progress` - Called with the number of bytes stored so far.
///
/// # Errors
///
/// - [`DiskError::UnsupportedImage`] for names with path components or
///   without an image extension.
/// - [`DiskError::ImageExists`] if `root/name` is already taken.
/// - [`DiskError::Cancelled`] if `running` is cleared mid-upload; nothing is left behind.
/// - [`DiskError::Io`] for read or write failures.
pub fn run<R, F>(
    root: &Path,
    name: &str,
    reader: R,
    running: Arc<AtomicBool>,
    mut on_progress: F,
) -> DiskResult<IngestReport>
where
    R: Read,
    F: FnMut(u64),
{
    let file_name = validate_name(name)?;
    let destination = root.join(file_name);
    if destination.exists() {
        return Err(DiskError::ImageExists(name.to_string()));
    }

    let mut reader = reader;
    let mut temp_file = NamedTempFile::new_in(root)?;
    let mut hasher = Sha256::new();
    let mut total: u64 = 0;
    {
        let mut writer = BufWriter::new(&mut temp_file);
        let mut buffer = [0u8; 8192];

        loop {
            if !running.load(Ordering::SeqCst) {
                return Err(DiskError::Cancelled);
            }

            let n = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            writer.write_all(&buffer[..n])?;
            hasher.update(&buffer[..n]);
            total += n as u64;
            on_progress(total);
        }
        writer.flush()?;
    }

    // Another upload may have claimed the name while this one streamed.
    temp_file
        .persist_noclobber(&destination)
        .map_err(|err| match err.error.kind() {
            io::ErrorKind::AlreadyExists => DiskError::ImageExists(name.to_string()),
            _ => DiskError::Io(err.error),
        })?;

    Ok(IngestReport {
        path: destination,
        size: total,
        sha256: hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn running() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(true))
    }

    #[test]
    fn stores_image_atomically() {
        let root = tempfile::tempdir().unwrap();
        let body = vec![7u8; 20_000];
        let mut progress = Vec::new();
        let report = run(root.path(), "movie.iso", body.as_slice(), running(), |n| {
            progress.push(n)
        })
        .unwrap();

        assert_eq!(report.path, root.path().join("movie.iso"));
        assert_eq!(report.size, 20_000);
        assert_eq!(report.sha256.len(), 64);
        assert_eq!(progress.last(), Some(&20_000));
        assert_eq!(fs::read(&report.path).unwrap(), body);
        // Only the image remains; the temp file was renamed.
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 1);
    }

    #[test]
    fn digest_matches_content() {
        let root = tempfile::tempdir().unwrap();
        let report = run(root.path(), "a.img", &b"abc"[..], running(), |_| {}).unwrap();
        assert_eq!(
            report.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn rejects_unsupported_names() {
        let root = tempfile::tempdir().unwrap();
        for name in ["notes.txt", "../escape.iso", "sub/dir.iso", "noext", ""] {
            assert!(
                matches!(
                    run(root.path(), name, &b"x"[..], running(), |_| {}),
                    Err(DiskError::UnsupportedImage(_))
                ),
                "{name} should be rejected"
            );
        }
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn existing_image_is_kept() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("movie.iso");
        fs::write(&path, b"served").unwrap();

        let err = run(root.path(), "movie.iso", &b"replacement"[..], running(), |_| {}).unwrap_err();
        assert!(matches!(err, DiskError::ImageExists(name) if name == "movie.iso"));
        assert_eq!(fs::read(&path).unwrap(), b"served");
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 1);
    }

    #[test]
    fn cancellation_leaves_nothing() {
        let root = tempfile::tempdir().unwrap();
        let err = run(
            root.path(),
            "big.iso",
            &[0u8; 100][..],
            Arc::new(AtomicBool::new(false)),
            |_| {},
        )
        .unwrap_err();
        assert!(matches!(err, DiskError::Cancelled));
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
    }
}
