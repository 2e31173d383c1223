//! Queue-state codec.
//!
//! The queue persists its full state as a single UTF-8 text file with LF
//! line endings: a version header, a `destination:` line, then one
//! pipe-delimited record per item. The field order is fixed and the
//! format is stable across versions:
//!
//! ```text
//! status|object_id|filename|device_path|size|bytes_transferred|local_path|temp_path|hash
//! ```
//!
//! Fields do not escape embedded separators, so saving refuses any item
//! whose path fields contain `|`. Loading ignores unknown comment lines
//! but drops malformed item lines with a warning.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use phototransfer_device::{mime_for, MediaInfo};
use tracing::{debug, warn};

use crate::types::{TransferItem, TransferStatus};
use crate::TransferError;

/// Required first line of a state file.
pub const STATE_HEADER: &str = "# PhotoTransfer Queue State v1.0";

const DESTINATION_PREFIX: &str = "destination:";
const FIELD_COUNT: usize = 9;

/// Decoded contents of a state file.
#[derive(Debug, Clone)]
pub struct QueueState {
    pub destination: PathBuf,
    pub items: Vec<TransferItem>,
}

/// Serializes the queue to `path`, replacing any previous file.
pub fn save_state(
    path: &Path,
    destination: &Path,
    items: &[TransferItem],
) -> Result<(), TransferError> {
    let generated = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let rendered = render(destination, items, generated)?;
    std::fs::write(path, rendered).map_err(TransferError::StateIo)?;
    debug!(path = %path.display(), items = items.len(), "queue state saved");
    Ok(())
}

/// Renders the state file contents. Split out from [`save_state`] so the
/// output for a fixed timestamp is testable byte for byte.
fn render(destination: &Path, items: &[TransferItem], generated: u64) -> Result<String, TransferError> {
    for item in items {
        for field in [
            item.media.filename.as_str(),
            item.media.device_path.as_str(),
        ] {
            if field.contains('|') {
                return Err(TransferError::UnsafeStateField(field.to_string()));
            }
        }
        for field in [&item.local_path, &item.temp_path] {
            if field.to_string_lossy().contains('|') {
                return Err(TransferError::UnsafeStateField(
                    field.to_string_lossy().into_owned(),
                ));
            }
        }
    }

    let mut out = String::new();
    out.push_str(STATE_HEADER);
    out.push('\n');
    out.push_str(&format!("# Generated: {generated}\n"));
    out.push_str(&format!("{DESTINATION_PREFIX}{}\n", destination.display()));

    for item in items {
        out.push_str(&format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}\n",
            item.status.as_code(),
            item.media.object_id,
            item.media.filename,
            item.media.device_path,
            item.media.size,
            item.bytes_transferred,
            item.local_path.display(),
            item.temp_path.display(),
            item.hash,
        ));
    }

    Ok(out)
}

/// Loads a previously saved state. A missing file is not an error and
/// yields `None` (empty queue). Items saved as in-progress are demoted to
/// pending so resumption re-reads the source.
pub fn load_state(path: &Path) -> Result<Option<QueueState>, TransferError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(TransferError::StateIo(e)),
    };

    let mut destination = PathBuf::new();
    let mut items = Vec::new();

    for (lineno, line) in content.lines().enumerate() {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(dest) = line.strip_prefix(DESTINATION_PREFIX) {
            destination = PathBuf::from(dest);
            continue;
        }

        match parse_item_line(line) {
            Some(item) => items.push(item),
            None => warn!(line = lineno + 1, "dropping malformed queue state line"),
        }
    }

    debug!(path = %path.display(), items = items.len(), "queue state loaded");
    Ok(Some(QueueState { destination, items }))
}

fn parse_item_line(line: &str) -> Option<TransferItem> {
    let fields: Vec<&str> = line.split('|').collect();
    if fields.len() < FIELD_COUNT {
        return None;
    }

    let status = TransferStatus::from_code(fields[0].parse().ok()?)?;
    let object_id: u32 = fields[1].parse().ok()?;
    let size: u64 = fields[4].parse().ok()?;
    let bytes_transferred: u64 = fields[5].parse().ok()?;

    let filename = fields[2].to_string();
    let media = MediaInfo {
        object_id,
        mime_type: mime_for(&filename),
        filename,
        device_path: fields[3].to_string(),
        size,
        // Modification time is not carried by the state file; resumed
        // items keep their previously derived local path instead.
        mtime: 0,
    };

    Some(TransferItem {
        media,
        // In-progress work was interrupted mid-flight; re-read it.
        status: if status == TransferStatus::InProgress {
            TransferStatus::Pending
        } else {
            status
        },
        bytes_transferred,
        error_message: String::new(),
        retry_count: 0,
        local_path: PathBuf::from(fields[6]),
        temp_path: PathBuf::from(fields[7]),
        hash: fields[8].to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_item() -> TransferItem {
        TransferItem {
            media: MediaInfo {
                object_id: 4823,
                filename: "IMG_0001.HEIC".into(),
                device_path: "/DCIM/100APPLE/IMG_0001.HEIC".into(),
                size: 2894311,
                mtime: 0,
                mime_type: "image/heic".into(),
            },
            status: TransferStatus::Pending,
            bytes_transferred: 0,
            error_message: String::new(),
            retry_count: 0,
            local_path: "/home/u/Pictures/PhonePhotos/2024/10/IMG_0001.HEIC".into(),
            temp_path: "/home/u/Pictures/PhonePhotos/2024/10/IMG_0001.HEIC.part".into(),
            hash: String::new(),
        }
    }

    #[test]
    fn render_is_bit_exact() {
        let rendered = render(
            Path::new("/home/u/Pictures/PhonePhotos"),
            &[sample_item()],
            1735600000,
        )
        .unwrap();

        let expected = "\
# PhotoTransfer Queue State v1.0
# Generated: 1735600000
destination:/home/u/Pictures/PhonePhotos
0|4823|IMG_0001.HEIC|/DCIM/100APPLE/IMG_0001.HEIC|2894311|0|/home/u/Pictures/PhonePhotos/2024/10/IMG_0001.HEIC|/home/u/Pictures/PhonePhotos/2024/10/IMG_0001.HEIC.part|
";
        assert_eq!(rendered, expected);
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.state");

        let mut completed = sample_item();
        completed.status = TransferStatus::Completed;
        completed.bytes_transferred = 2894311;
        completed.hash = "ab".repeat(32);

        save_state(&path, Path::new("/dest"), &[sample_item(), completed.clone()]).unwrap();

        let state = load_state(&path).unwrap().unwrap();
        assert_eq!(state.destination, PathBuf::from("/dest"));
        assert_eq!(state.items.len(), 2);

        assert_eq!(state.items[0].status, TransferStatus::Pending);
        assert_eq!(state.items[0].media.object_id, 4823);
        assert_eq!(state.items[0].media.size, 2894311);
        assert_eq!(
            state.items[0].local_path,
            PathBuf::from("/home/u/Pictures/PhonePhotos/2024/10/IMG_0001.HEIC")
        );

        assert_eq!(state.items[1].status, TransferStatus::Completed);
        assert_eq!(state.items[1].hash, completed.hash);
        assert_eq!(state.items[1].bytes_transferred, 2894311);
    }

    #[test]
    fn in_progress_items_demote_to_pending() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.state");

        let mut item = sample_item();
        item.status = TransferStatus::InProgress;
        item.bytes_transferred = 1024;
        save_state(&path, Path::new("/dest"), &[item]).unwrap();

        let state = load_state(&path).unwrap().unwrap();
        assert_eq!(state.items[0].status, TransferStatus::Pending);
    }

    #[test]
    fn missing_file_is_empty_queue() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_state(&dir.path().join("nope.state")).unwrap().is_none());
    }

    #[test]
    fn malformed_lines_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.state");

        let content = "\
# PhotoTransfer Queue State v1.0
# some comment the loader must ignore
destination:/dest
0|1|a.jpg|/DCIM/a.jpg|10|0|/dest/1970/01/a.jpg|/dest/1970/01/a.jpg.part|
too|short|row
9|1|bad-status.jpg|/DCIM/x.jpg|10|0|/d|/d.part|
0|not_a_number|bad-id.jpg|/DCIM/y.jpg|10|0|/d|/d.part|
";
        std::fs::write(&path, content).unwrap();

        let state = load_state(&path).unwrap().unwrap();
        assert_eq!(state.items.len(), 1);
        assert_eq!(state.items[0].media.filename, "a.jpg");
    }

    #[test]
    fn refuses_to_save_reserved_separator() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.state");

        let mut item = sample_item();
        item.media.filename = "weird|name.jpg".into();

        let err = save_state(&path, Path::new("/dest"), &[item]).unwrap_err();
        assert!(matches!(err, TransferError::UnsafeStateField(_)));
        assert!(!path.exists());
    }
}
