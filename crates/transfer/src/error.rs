//! Transfer error kinds.

use phototransfer_index::IndexError;

/// Errors produced while transferring an item or persisting queue state.
///
/// Per-item failures are captured in the item's `error_message` and drive
/// the retry logic; skips are not failures.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("device not connected")]
    NotConnected,

    #[error("device read failed: {0}")]
    DeviceRead(String),

    #[error("hash mismatch after write: expected {expected}, found {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("size mismatch after write: expected {expected} bytes, found {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("failed to write temp file: {0}")]
    WriteFailed(#[source] std::io::Error),

    #[error("failed to finalize transfer: {0}")]
    FinalizeFailed(#[source] std::io::Error),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("queue state I/O error: {0}")]
    StateIo(#[source] std::io::Error),

    #[error("cannot save state: '{0}' contains the reserved separator '|'")]
    UnsafeStateField(String),
}
