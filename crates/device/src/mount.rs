//! Shared helpers for backends that expose the device as a mounted
//! filesystem (GVFS for MTP, ifuse for AFC).

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use tracing::{debug, warn};

use crate::{is_media_file, mime_for, DeviceError, MediaInfo};

/// One file found under a mount, positioned at the object id the handler
/// assigned during enumeration.
#[derive(Debug, Clone)]
pub(crate) struct ObjectEntry {
    pub(crate) path: PathBuf,
}

/// Recursively scans `root` (optionally narrowed to `subpath`) for media
/// files and produces `MediaInfo` records with freshly assigned object
/// ids. The returned entry table maps each object id back to its absolute
/// path for later reads.
pub(crate) fn scan_media(
    root: &Path,
    subpath: Option<&str>,
    display_root: &str,
) -> Result<(Vec<MediaInfo>, Vec<ObjectEntry>), DeviceError> {
    let scan_root = match subpath {
        Some(sub) => root.join(sub.trim_start_matches('/')),
        None => root.to_path_buf(),
    };

    let mut media = Vec::new();
    let mut objects = Vec::new();
    if !scan_root.exists() {
        debug!(path = %scan_root.display(), "scan root does not exist");
        return Ok((media, objects));
    }

    walk(root, &scan_root, display_root, &mut media, &mut objects)?;
    debug!(count = media.len(), root = %scan_root.display(), "media scan complete");
    Ok((media, objects))
}

fn walk(
    root: &Path,
    current: &Path,
    display_root: &str,
    media: &mut Vec<MediaInfo>,
    objects: &mut Vec<ObjectEntry>,
) -> Result<(), DeviceError> {
    let entries = std::fs::read_dir(current)?;

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                // Files can vanish while the phone reindexes; skip them.
                warn!(path = %path.display(), error = %e, "skipping unreadable entry");
                continue;
            }
        };

        if metadata.is_dir() {
            walk(root, &path, display_root, media, objects)?;
            continue;
        }
        if !metadata.is_file() {
            continue;
        }

        let filename = entry.file_name().to_string_lossy().into_owned();
        if !is_media_file(&filename) {
            continue;
        }

        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let rel = path
            .strip_prefix(root)
            .map(|r| r.to_string_lossy().replace('\\', "/"))
            .unwrap_or_else(|_| filename.clone());

        let object_id = objects.len() as u32;
        objects.push(ObjectEntry { path: path.clone() });
        media.push(MediaInfo {
            object_id,
            filename: filename.clone(),
            device_path: format!("{}/{}", display_root.trim_end_matches('/'), rel),
            size: metadata.len(),
            mtime,
            mime_type: mime_for(&filename),
        });
    }

    Ok(())
}

/// Reads the full file for an object id out of the entry table.
pub(crate) fn read_object(objects: &[ObjectEntry], object_id: u32) -> Result<Vec<u8>, DeviceError> {
    let entry = objects
        .get(object_id as usize)
        .ok_or(DeviceError::UnknownObject(object_id))?;
    Ok(std::fs::read(&entry.path)?)
}

/// Returns `true` if the object id is known and its file still exists.
pub(crate) fn object_exists(objects: &[ObjectEntry], object_id: u32) -> bool {
    objects
        .get(object_id as usize)
        .is_some_and(|entry| entry.path.exists())
}
