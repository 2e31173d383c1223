//! Queue item and statistics types.

use std::path::PathBuf;

use phototransfer_device::MediaInfo;

/// Lifecycle state of one queue entry.
///
/// The numeric codes are the on-disk representation in the queue-state
/// file and must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl TransferStatus {
    pub fn as_code(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::InProgress => 1,
            Self::Completed => 2,
            Self::Failed => 3,
            Self::Skipped => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Pending),
            1 => Some(Self::InProgress),
            2 => Some(Self::Completed),
            3 => Some(Self::Failed),
            4 => Some(Self::Skipped),
            _ => None,
        }
    }

    /// Terminal states are never revisited by the driver.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

/// One queue entry. Created in `Pending`; mutated only by the queue
/// driver.
#[derive(Debug, Clone)]
pub struct TransferItem {
    pub media: MediaInfo,
    pub status: TransferStatus,
    pub bytes_transferred: u64,
    pub error_message: String,
    pub retry_count: u32,
    /// Final destination, filled in during processing.
    pub local_path: PathBuf,
    /// `local_path` + `.part`, filled in during processing.
    pub temp_path: PathBuf,
    /// Content hash, filled in after the device read.
    pub hash: String,
}

impl TransferItem {
    pub fn new(media: MediaInfo) -> Self {
        Self {
            media,
            status: TransferStatus::Pending,
            bytes_transferred: 0,
            error_message: String::new(),
            retry_count: 0,
            local_path: PathBuf::new(),
            temp_path: PathBuf::new(),
            hash: String::new(),
        }
    }
}

/// Aggregate queue statistics, derived on demand. Snapshots handed to
/// progress listeners are immutable copies and safe to move across
/// threads.
#[derive(Debug, Clone, Default)]
pub struct TransferStats {
    pub total_items: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub pending: usize,

    pub total_bytes: u64,
    /// Bytes of completed items plus the in-flight item's progress.
    pub transferred_bytes: u64,

    /// Bytes per second since the run started.
    pub transfer_speed: f64,
    /// Estimated seconds remaining (0 when unknown or done).
    pub eta_seconds: u64,

    /// Filename of the in-flight item, if any.
    pub current_file: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_roundtrip() {
        for status in [
            TransferStatus::Pending,
            TransferStatus::InProgress,
            TransferStatus::Completed,
            TransferStatus::Failed,
            TransferStatus::Skipped,
        ] {
            assert_eq!(TransferStatus::from_code(status.as_code()), Some(status));
        }
        assert_eq!(TransferStatus::from_code(5), None);
    }

    #[test]
    fn terminal_states() {
        assert!(!TransferStatus::Pending.is_terminal());
        assert!(!TransferStatus::InProgress.is_terminal());
        assert!(TransferStatus::Completed.is_terminal());
        assert!(TransferStatus::Failed.is_terminal());
        assert!(TransferStatus::Skipped.is_terminal());
    }

    #[test]
    fn new_item_starts_pending() {
        let media = MediaInfo {
            object_id: 1,
            filename: "IMG_0001.jpg".into(),
            device_path: "/DCIM/IMG_0001.jpg".into(),
            size: 100,
            mtime: 0,
            mime_type: "image/jpeg".into(),
        };
        let item = TransferItem::new(media);
        assert_eq!(item.status, TransferStatus::Pending);
        assert_eq!(item.bytes_transferred, 0);
        assert_eq!(item.retry_count, 0);
        assert!(item.hash.is_empty());
    }
}
