//! Contains the logic for reading a byte window from a disk image or device node.
use crate::range::ByteWindow;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

// Use a 1 MiB buffer for streamed copies.
const BUFFER_SIZE: usize = 1024 * 1024;

/// Reads the bytes covered by `window` from the file or device at `path`.
///
/// The returned buffer is shorter than `window.len()` when the media ends
/// before `window.end`; callers decide how to report that.
pub fn read_window(path: &Path, window: ByteWindow) -> io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(window.start))?;

    let len = window.len();
    let mut data = Vec::with_capacity(usize::try_from(len).map_or(BUFFER_SIZE, |n| n.min(BUFFER_SIZE)));
    file.take(len).read_to_end(&mut data)?;
    Ok(data)
}

/// Streams the bytes covered by `window` into `out`.
///
/// # Arguments
///
/// * `path` - The image file or device node to read from.
/// * `window` - The already-validated byte window.
/// * `out` - Destination for the bytes.
/// * `running` - An `Arc<AtomicBool>` used to gracefully cancel the copy.
///   If the flag is set to `false`, the copy is aborted.
/// * `on_read_start` - Called once with the number of bytes that will be copied.
/// * `on_progress` - Called repeatedly with the total number of bytes copied so far.
///
/// # Returns
///
/// The number of bytes copied. This is less than `window.len()` if the
/// media ended early.
///
/// # Errors
///
/// An I/O error from either side, or `ErrorKind::Interrupted` if the copy was cancelled.
pub fn copy_window<W, F>(
    path: &Path,
    window: ByteWindow,
    out: &mut W,
    running: Arc<AtomicBool>,
    on_read_start: impl FnOnce(u64),
    mut on_progress: F,
) -> io::Result<u64>
where
    W: Write,
    F: FnMut(u64),
{
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(window.start))?;

    let total = window.len();
    on_read_start(total);

    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut copied: u64 = 0;
    while copied < total {
        if !running.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::Interrupted,
                "Operation cancelled by user",
            ));
        }

        let to_read = std::cmp::min(BUFFER_SIZE as u64, total - copied) as usize;
        let n = file.read(&mut buffer[..to_read])?;
        if n == 0 {
            break;
        }
        out.write_all(&buffer[..n])?;

        copied += n as u64;
        on_progress(copied);
    }

    out.flush()?;
    Ok(copied)
}
