//! Transfer engine: turns selected device-side media plus a destination
//! root into a durable, deduplicated, verified set of local files.
//!
//! The pipeline couples a pause/resume/cancel-able work queue, a
//! content-hash dedup check against the persistent index, atomic
//! temp-file + rename materialization, byte-for-byte verification, and a
//! serializable queue state for crash recovery.

mod error;
pub mod hash;
pub mod paths;
mod queue;
mod state;
mod types;
pub mod writer;

pub use error::TransferError;
pub use queue::{ItemCallback, ProgressCallback, QueueOptions, TransferQueue};
pub use state::{load_state, save_state, QueueState, STATE_HEADER};
pub use types::{TransferItem, TransferStats, TransferStatus};

/// Suffix appended to a destination path while its bytes are in flight.
pub const TEMP_SUFFIX: &str = ".part";
