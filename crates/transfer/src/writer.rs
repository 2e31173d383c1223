//! Atomic verified materialization.
//!
//! Files land as `<local>.part`, are re-hashed from disk and size-checked
//! against the in-memory buffer, then renamed into place. A failure at
//! any step removes the temp file, so a half-written file is never
//! observable at the destination path.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use crate::hash::sha256_file;
use crate::{TransferError, TEMP_SUFFIX};

/// Temp-file path for a destination: `<local>.part`.
pub fn temp_path_for(local_path: &Path) -> PathBuf {
    let mut os = local_path.as_os_str().to_os_string();
    os.push(TEMP_SUFFIX);
    PathBuf::from(os)
}

/// Writes `data` to `temp_path`, verifies hash and size on disk, then
/// renames to `local_path`. `expected_hash` must be the SHA-256 of
/// `data` as computed by the caller.
///
/// The parent directory must already exist; a missing parent surfaces as
/// [`TransferError::WriteFailed`]. If the rename fails (e.g. across
/// filesystems) the finalize falls back to copy-and-unlink.
pub fn write_verified(
    local_path: &Path,
    temp_path: &Path,
    data: &[u8],
    expected_hash: &str,
) -> Result<(), TransferError> {
    std::fs::write(temp_path, data).map_err(TransferError::WriteFailed)?;

    if let Err(e) = verify_temp(temp_path, data.len() as u64, expected_hash) {
        let _ = std::fs::remove_file(temp_path);
        return Err(e);
    }

    finalize(temp_path, local_path)
}

fn verify_temp(temp_path: &Path, expected_size: u64, expected_hash: &str) -> Result<(), TransferError> {
    let actual_size = std::fs::metadata(temp_path)
        .map_err(TransferError::WriteFailed)?
        .len();
    if actual_size != expected_size {
        return Err(TransferError::SizeMismatch {
            expected: expected_size,
            actual: actual_size,
        });
    }

    let actual_hash = sha256_file(temp_path).map_err(TransferError::WriteFailed)?;
    if actual_hash != expected_hash {
        return Err(TransferError::HashMismatch {
            expected: expected_hash.to_string(),
            actual: actual_hash,
        });
    }

    Ok(())
}

fn finalize(temp_path: &Path, local_path: &Path) -> Result<(), TransferError> {
    match std::fs::rename(temp_path, local_path) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            // Rename can fail across filesystems; copy and unlink instead.
            debug!(error = %rename_err, "rename failed, falling back to copy");
            std::fs::copy(temp_path, local_path).map_err(|e| {
                let _ = std::fs::remove_file(temp_path);
                TransferError::FinalizeFailed(e)
            })?;
            std::fs::remove_file(temp_path).map_err(TransferError::FinalizeFailed)?;
            Ok(())
        }
    }
}

/// Removes `*.part` leftovers under `root` older than `max_age`. Returns
/// the number of files removed. Errors on individual entries are logged
/// and skipped; the sweep never fails a run.
pub fn sweep_stale_parts(root: &Path, max_age: Duration) -> usize {
    let mut removed = 0;
    let now = SystemTime::now();
    sweep_dir(root, max_age, now, &mut removed);
    if removed > 0 {
        debug!(removed, root = %root.display(), "swept stale .part files");
    }
    removed
}

fn sweep_dir(dir: &Path, max_age: Duration, now: SystemTime, removed: &mut usize) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            sweep_dir(&path, max_age, now, removed);
            continue;
        }
        if path.extension().map_or(true, |ext| ext != "part") {
            continue;
        }

        let stale = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|mtime| now.duration_since(mtime).ok())
            .is_some_and(|age| age > max_age);

        if stale {
            match std::fs::remove_file(&path) {
                Ok(()) => *removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove stale .part file"),
            }
        }
    }
}
