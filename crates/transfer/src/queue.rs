//! Transfer queue and its single-threaded driver.
//!
//! `start()` processes items sequentially on the calling thread; callers
//! that want a responsive front-end run it on a background thread of
//! their choice. Control flags (`pause`, `resume`, `cancel`) are atomics
//! observed between items, so the in-flight transfer always completes
//! before a pause or cancel takes effect. The item vector sits behind a
//! mutex that is only held for state transitions and snapshot reads,
//! never across device or file I/O.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use phototransfer_device::{DeviceHandler, MediaInfo};
use phototransfer_index::PhotoIndex;
use tracing::{debug, info, warn};

use crate::hash::sha256_hex;
use crate::state;
use crate::types::{TransferItem, TransferStats, TransferStatus};
use crate::writer;
use crate::{paths, TransferError};

/// Called with a fresh stats snapshot whenever the driver updates state.
pub type ProgressCallback = Box<dyn Fn(&TransferStats) + Send + Sync>;
/// Called with a copy of an item when it reaches a terminal state.
pub type ItemCallback = Box<dyn Fn(&TransferItem) + Send + Sync>;

/// Stale `.part` files older than this are removed at queue start.
const STALE_PART_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Queue tuning knobs.
#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// Additional attempts after the first failure of an item.
    pub max_retries: u32,
    /// Sleep between pause-flag polls.
    pub pause_poll_interval_ms: u32,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            pause_poll_interval_ms: 100,
        }
    }
}

struct RunClock {
    started: Instant,
    baseline_bytes: u64,
}

enum Outcome {
    Transferred,
    Skipped,
}

/// Ordered transfer work list with pause/resume/cancel, per-item retry
/// and crash-resumable state.
///
/// The queue borrows the device handler and the index; both must outlive
/// it. The handler is single-owner from the queue's perspective: nothing
/// else may drive the device while a run is active.
pub struct TransferQueue<'a> {
    items: Mutex<Vec<TransferItem>>,
    destination: Mutex<PathBuf>,
    handler: Option<&'a dyn DeviceHandler>,
    index: Option<&'a PhotoIndex>,
    options: QueueOptions,

    running: AtomicBool,
    paused: AtomicBool,
    cancel_requested: AtomicBool,

    progress_callback: Option<ProgressCallback>,
    completed_callback: Option<ItemCallback>,
    failed_callback: Option<ItemCallback>,

    run_clock: Mutex<Option<RunClock>>,
}

impl<'a> TransferQueue<'a> {
    pub fn new() -> Self {
        Self::with_options(QueueOptions::default())
    }

    pub fn with_options(options: QueueOptions) -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            destination: Mutex::new(PathBuf::new()),
            handler: None,
            index: None,
            options,
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
            progress_callback: None,
            completed_callback: None,
            failed_callback: None,
            run_clock: Mutex::new(None),
        }
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    pub fn set_destination(&mut self, destination: impl Into<PathBuf>) {
        *self.destination.lock().unwrap() = destination.into();
    }

    pub fn set_handler(&mut self, handler: &'a dyn DeviceHandler) {
        self.handler = Some(handler);
    }

    pub fn set_index(&mut self, index: &'a PhotoIndex) {
        self.index = Some(index);
    }

    pub fn set_max_retries(&mut self, retries: u32) {
        self.options.max_retries = retries;
    }

    pub fn set_progress_callback(
        &mut self,
        callback: impl Fn(&TransferStats) + Send + Sync + 'static,
    ) {
        self.progress_callback = Some(Box::new(callback));
    }

    pub fn set_completed_callback(
        &mut self,
        callback: impl Fn(&TransferItem) + Send + Sync + 'static,
    ) {
        self.completed_callback = Some(Box::new(callback));
    }

    pub fn set_failed_callback(
        &mut self,
        callback: impl Fn(&TransferItem) + Send + Sync + 'static,
    ) {
        self.failed_callback = Some(Box::new(callback));
    }

    // ------------------------------------------------------------------
    // Queue management
    // ------------------------------------------------------------------

    pub fn add(&self, media: MediaInfo) {
        self.lock_items().push(TransferItem::new(media));
    }

    pub fn clear(&self) {
        self.lock_items().clear();
    }

    pub fn len(&self) -> usize {
        self.lock_items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_items().is_empty()
    }

    /// Snapshot of all items.
    pub fn items(&self) -> Vec<TransferItem> {
        self.lock_items().clone()
    }

    /// `true` while any item still needs work.
    pub fn has_incomplete(&self) -> bool {
        self.lock_items()
            .iter()
            .any(|item| !item.status.is_terminal())
    }

    // ------------------------------------------------------------------
    // State persistence
    // ------------------------------------------------------------------

    pub fn save_state(&self, path: &Path) -> Result<(), TransferError> {
        let items = self.items();
        let destination = self.destination.lock().unwrap().clone();
        state::save_state(path, &destination, &items)
    }

    /// Replaces the queue contents from a saved state file. Returns
    /// `false` if no state file existed (the queue is left untouched).
    pub fn load_state(&mut self, path: &Path) -> Result<bool, TransferError> {
        let Some(loaded) = state::load_state(path)? else {
            return Ok(false);
        };
        if !loaded.destination.as_os_str().is_empty() {
            *self.destination.lock().unwrap() = loaded.destination;
        }
        *self.lock_items() = loaded.items;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Control
    // ------------------------------------------------------------------

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Requests cancellation. The in-flight item finishes first; callers
    /// that need to wait can poll [`is_running`](Self::is_running).
    pub fn cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Driver
    // ------------------------------------------------------------------

    /// Drives the queue to completion on the current thread.
    ///
    /// Items are processed in insertion order; a retried item is
    /// revisited in place before the driver moves on. Whatever happens,
    /// the running flag is cleared on exit and every item ends in a
    /// terminal or pending status.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("transfer queue already running");
            return;
        }
        self.paused.store(false, Ordering::SeqCst);
        self.cancel_requested.store(false, Ordering::SeqCst);

        let baseline_bytes = self.stats().transferred_bytes;
        *self.run_clock.lock().unwrap() = Some(RunClock {
            started: Instant::now(),
            baseline_bytes,
        });

        self.sweep_destination();
        info!(items = self.len(), "transfer queue started");

        let poll = Duration::from_millis(u64::from(self.options.pause_poll_interval_ms));
        let mut i = 0;
        while i < self.len() && !self.cancel_requested.load(Ordering::SeqCst) {
            while self.paused.load(Ordering::SeqCst) && !self.cancel_requested.load(Ordering::SeqCst)
            {
                std::thread::sleep(poll);
            }
            if self.cancel_requested.load(Ordering::SeqCst) {
                break;
            }

            // Claim the slot if it still needs work.
            let media = {
                let mut items = self.lock_items();
                match items.get_mut(i) {
                    Some(item) if item.status == TransferStatus::Pending => {
                        item.status = TransferStatus::InProgress;
                        item.error_message.clear();
                        Some(item.media.clone())
                    }
                    _ => None,
                }
            };
            let Some(media) = media else {
                i += 1;
                continue;
            };
            self.notify_progress();

            match self.transfer_item(i, &media) {
                Ok(Outcome::Transferred) => {
                    let item = self.finish_item(i, TransferStatus::Completed);
                    info!(file = %item.media.filename, bytes = item.media.size, "transferred");
                    if let Some(cb) = &self.completed_callback {
                        cb(&item);
                    }
                    i += 1;
                }
                Ok(Outcome::Skipped) => {
                    let item = self.finish_item(i, TransferStatus::Skipped);
                    debug!(file = %item.media.filename, "skipped, already present");
                    i += 1;
                }
                Err(error) => {
                    let will_retry = {
                        let mut items = self.lock_items();
                        let item = &mut items[i];
                        item.error_message = error.to_string();
                        if item.retry_count < self.options.max_retries {
                            item.retry_count += 1;
                            item.status = TransferStatus::Pending;
                            true
                        } else {
                            item.status = TransferStatus::Failed;
                            false
                        }
                    };

                    if will_retry {
                        warn!(file = %media.filename, error = %error, "transfer failed, retrying");
                        // Leave `i` alone so the same slot runs again.
                    } else {
                        warn!(file = %media.filename, error = %error, "transfer failed permanently");
                        let item = self.lock_items()[i].clone();
                        if let Some(cb) = &self.failed_callback {
                            cb(&item);
                        }
                        i += 1;
                    }
                }
            }
            self.notify_progress();
        }

        self.running.store(false, Ordering::SeqCst);
        info!("transfer queue stopped");
    }

    /// Per-item transfer routine.
    fn transfer_item(&self, idx: usize, media: &MediaInfo) -> Result<Outcome, TransferError> {
        let handler = self.handler.ok_or(TransferError::NotConnected)?;
        if !handler.is_connected() {
            return Err(TransferError::NotConnected);
        }

        // Destination paths. Items resumed from a state file keep the
        // path they were assigned originally.
        let (local_path, temp_path) = {
            let mut items = self.lock_items();
            let item = &mut items[idx];
            if item.local_path.as_os_str().is_empty() {
                let destination = self.destination.lock().unwrap().clone();
                item.local_path = paths::local_path_for(
                    &destination.to_string_lossy(),
                    &media.filename,
                    media.mtime,
                );
                item.temp_path = writer::temp_path_for(&item.local_path);
            }
            (item.local_path.clone(), item.temp_path.clone())
        };

        if let Some(parent) = local_path.parent() {
            std::fs::create_dir_all(parent).map_err(TransferError::WriteFailed)?;
        }

        // Dedup shortcut: an existing file of the right size means an
        // obvious repeat; don't touch the device for it.
        if let Ok(metadata) = std::fs::metadata(&local_path) {
            if metadata.is_file() && metadata.len() == media.size {
                return Ok(Outcome::Skipped);
            }
        }

        let data = handler
            .read(media.object_id)
            .map_err(|e| TransferError::DeviceRead(e.to_string()))?;

        let content_hash = sha256_hex(&data);
        {
            let mut items = self.lock_items();
            items[idx].hash = content_hash.clone();
        }

        // Index dedup: the index is advisory, so a hit is only honored
        // when the recorded file is still on disk.
        if let Some(index) = self.index {
            if index.contains(&content_hash)? {
                if let Some(existing) = index.local_path_of(&content_hash)? {
                    if Path::new(&existing).exists() {
                        debug!(file = %media.filename, existing = %existing, "duplicate content");
                        return Ok(Outcome::Skipped);
                    }
                }
            }
        }

        writer::write_verified(&local_path, &temp_path, &data, &content_hash)?;

        // The bytes count only once the file is durable; skipped and
        // retried items must never move the byte counter.
        {
            let mut items = self.lock_items();
            items[idx].bytes_transferred = data.len() as u64;
        }
        self.notify_progress();

        // An index write failure only costs a re-learned row on the next
        // run.
        if let Some(index) = self.index {
            if let Err(e) = index.insert(
                &content_hash,
                &media.device_path,
                &local_path.to_string_lossy(),
                media.size,
                media.mtime,
            ) {
                warn!(file = %media.filename, error = %e, "index update failed after transfer");
            }
        }

        Ok(Outcome::Transferred)
    }

    // ------------------------------------------------------------------
    // Statistics
    // ------------------------------------------------------------------

    /// Aggregate statistics, derived on demand. The returned snapshot is
    /// detached from queue internals.
    pub fn stats(&self) -> TransferStats {
        let mut stats = TransferStats::default();
        {
            let items = self.lock_items();
            stats.total_items = items.len();
            for item in items.iter() {
                stats.total_bytes += item.media.size;
                match item.status {
                    TransferStatus::Completed => {
                        stats.completed += 1;
                        stats.transferred_bytes += item.media.size;
                    }
                    TransferStatus::Failed => stats.failed += 1,
                    TransferStatus::Skipped => stats.skipped += 1,
                    TransferStatus::InProgress => {
                        stats.transferred_bytes += item.bytes_transferred;
                        stats.current_file = Some(item.media.filename.clone());
                        stats.pending += 1;
                    }
                    TransferStatus::Pending => stats.pending += 1,
                }
            }
        }

        if let Some(clock) = self.run_clock.lock().unwrap().as_ref() {
            let elapsed = clock.started.elapsed().as_secs_f64();
            if elapsed > 0.0 && stats.transferred_bytes > clock.baseline_bytes {
                stats.transfer_speed =
                    (stats.transferred_bytes - clock.baseline_bytes) as f64 / elapsed;
                let remaining = stats.total_bytes.saturating_sub(stats.transferred_bytes);
                if stats.transfer_speed > 0.0 && remaining > 0 {
                    stats.eta_seconds = (remaining as f64 / stats.transfer_speed) as u64;
                }
            }
        }

        stats
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn lock_items(&self) -> MutexGuard<'_, Vec<TransferItem>> {
        self.items.lock().unwrap()
    }

    fn finish_item(&self, idx: usize, status: TransferStatus) -> TransferItem {
        let mut items = self.lock_items();
        let item = &mut items[idx];
        item.status = status;
        item.clone()
    }

    /// Progress callbacks run without any internal lock held, so a
    /// listener may call back into `stats()` freely.
    fn notify_progress(&self) {
        if let Some(cb) = &self.progress_callback {
            let stats = self.stats();
            cb(&stats);
        }
    }

    fn sweep_destination(&self) {
        let destination = self.destination.lock().unwrap().clone();
        if destination.as_os_str().is_empty() {
            return;
        }
        let root = paths::expand_home(&destination.to_string_lossy());
        if root.is_dir() {
            writer::sweep_stale_parts(&root, STALE_PART_MAX_AGE);
        }
    }
}

impl Default for TransferQueue<'_> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::sha256_file;
    use phototransfer_device::MockDevice;
    use std::sync::Arc;

    fn test_queue<'a>(
        device: &'a MockDevice,
        index: &'a PhotoIndex,
        destination: &Path,
    ) -> TransferQueue<'a> {
        let mut queue = TransferQueue::new();
        queue.set_destination(destination);
        queue.set_handler(device);
        queue.set_index(index);
        queue
    }

    fn enqueue_all(queue: &TransferQueue<'_>, device: &MockDevice) {
        for media in device.enumerate(None).unwrap() {
            queue.add(media);
        }
    }

    #[test]
    fn transfer_and_verify_single_item() {
        let dir = tempfile::tempdir().unwrap();
        let mut device = MockDevice::new();
        let bytes = vec![0xABu8; 1_048_576];
        let expected_hash = sha256_hex(&bytes);
        device.add_item("IMG_0001.jpg", "/DCIM/IMG_0001.jpg", 1_700_000_000, bytes);
        let index = PhotoIndex::open_in_memory().unwrap();

        let queue = test_queue(&device, &index, dir.path());
        enqueue_all(&queue, &device);
        queue.start();

        let items = queue.items();
        assert_eq!(items[0].status, TransferStatus::Completed);
        assert_eq!(items[0].hash, expected_hash);

        let expected_path = paths::local_path_for(
            &dir.path().to_string_lossy(),
            "IMG_0001.jpg",
            1_700_000_000,
        );
        assert_eq!(items[0].local_path, expected_path);
        assert_eq!(std::fs::metadata(&expected_path).unwrap().len(), 1_048_576);
        assert_eq!(sha256_file(&expected_path).unwrap(), expected_hash);
        assert!(!writer::temp_path_for(&expected_path).exists());

        assert!(index.contains(&expected_hash).unwrap());

        let stats = queue.stats();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.skipped, 0);
        assert_eq!(stats.transferred_bytes, 1_048_576);
    }

    #[test]
    fn existing_file_skips_without_device_read() {
        let dir = tempfile::tempdir().unwrap();
        let mut device = MockDevice::new();
        let bytes = vec![1u8; 2048];
        let id = device.add_item("IMG_0002.jpg", "/DCIM/IMG_0002.jpg", 1_700_000_000, bytes);
        let index = PhotoIndex::open_in_memory().unwrap();

        // Pre-create a same-size file at the derived destination.
        let local = paths::local_path_for(
            &dir.path().to_string_lossy(),
            "IMG_0002.jpg",
            1_700_000_000,
        );
        std::fs::create_dir_all(local.parent().unwrap()).unwrap();
        std::fs::write(&local, vec![9u8; 2048]).unwrap();

        let queue = test_queue(&device, &index, dir.path());
        enqueue_all(&queue, &device);
        queue.start();

        assert_eq!(device.read_count(id), 0);
        assert_eq!(queue.items()[0].status, TransferStatus::Skipped);
        assert_eq!(index.count().unwrap(), 0);

        let stats = queue.stats();
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.completed, 0);
    }

    #[test]
    fn identical_content_dedups_across_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut device = MockDevice::new();
        let bytes = b"same content either way".to_vec();
        device.add_item("IMG_A.jpg", "/DCIM/IMG_A.jpg", 1_700_000_000, bytes.clone());
        device.add_item("IMG_B.jpg", "/DCIM/IMG_B.jpg", 1_700_000_000, bytes);
        let index = PhotoIndex::open_in_memory().unwrap();

        let queue = test_queue(&device, &index, dir.path());
        enqueue_all(&queue, &device);
        queue.start();

        let items = queue.items();
        assert_eq!(items[0].status, TransferStatus::Completed);
        assert_eq!(items[1].status, TransferStatus::Skipped);

        assert!(items[0].local_path.exists());
        assert!(!items[1].local_path.exists());
        assert_eq!(index.count().unwrap(), 1);
    }

    #[test]
    fn retry_bound_then_fail() {
        let dir = tempfile::tempdir().unwrap();
        let mut device = MockDevice::new();
        let id = device.add_item("IMG_X.jpg", "/DCIM/IMG_X.jpg", 1_700_000_000, vec![7u8; 64]);
        device.fail_reads_for(id);
        let index = PhotoIndex::open_in_memory().unwrap();

        let queue = test_queue(&device, &index, dir.path());
        enqueue_all(&queue, &device);
        queue.start();

        // Default max_retries = 3, so the device read runs at most 4 times.
        assert_eq!(device.read_count(id), 4);

        let item = &queue.items()[0];
        assert_eq!(item.status, TransferStatus::Failed);
        assert!(!item.error_message.is_empty());
        assert!(!item.local_path.exists());
        assert!(!writer::temp_path_for(&item.local_path).exists());
    }

    #[test]
    fn retry_recovers_after_transient_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut device = MockDevice::new();
        let id = device.add_item("IMG_Y.jpg", "/DCIM/IMG_Y.jpg", 1_700_000_000, vec![3u8; 64]);
        device.fail_reads_times(id, 2);
        let index = PhotoIndex::open_in_memory().unwrap();

        let queue = test_queue(&device, &index, dir.path());
        enqueue_all(&queue, &device);
        queue.start();

        assert_eq!(device.read_count(id), 3);
        let item = &queue.items()[0];
        assert_eq!(item.status, TransferStatus::Completed);
        assert_eq!(item.retry_count, 2);
        assert!(item.local_path.exists());
    }

    #[test]
    fn custom_retry_limit_is_respected() {
        let dir = tempfile::tempdir().unwrap();
        let mut device = MockDevice::new();
        let id = device.add_item("IMG_Z.jpg", "/DCIM/IMG_Z.jpg", 1_700_000_000, vec![2u8; 64]);
        device.fail_reads_for(id);
        let index = PhotoIndex::open_in_memory().unwrap();

        let mut queue = test_queue(&device, &index, dir.path());
        queue.set_max_retries(1);
        enqueue_all(&queue, &device);
        queue.start();

        assert_eq!(device.read_count(id), 2);
        assert_eq!(queue.items()[0].status, TransferStatus::Failed);
    }

    #[test]
    fn disconnected_handler_fails_without_reads() {
        let dir = tempfile::tempdir().unwrap();
        let mut device = MockDevice::new();
        let id = device.add_item("IMG_D.jpg", "/DCIM/IMG_D.jpg", 1_700_000_000, vec![1u8; 16]);
        let index = PhotoIndex::open_in_memory().unwrap();

        let queue = test_queue(&device, &index, dir.path());
        enqueue_all(&queue, &device);
        device.set_connected(false);
        queue.start();

        let item = &queue.items()[0];
        assert_eq!(item.status, TransferStatus::Failed);
        assert!(item.error_message.contains("not connected"));
        assert_eq!(device.read_count(id), 0);
    }

    #[test]
    fn same_filename_same_bucket_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let mut device = MockDevice::new();
        device.add_item("IMG_1.jpg", "/DCIM/A/IMG_1.jpg", 1_700_000_000, vec![1u8; 10]);
        device.add_item("IMG_1.jpg", "/DCIM/B/IMG_1.jpg", 1_700_000_000, vec![2u8; 20]);
        let index = PhotoIndex::open_in_memory().unwrap();

        let queue = test_queue(&device, &index, dir.path());
        enqueue_all(&queue, &device);
        queue.start();

        let items = queue.items();
        assert_eq!(items[0].status, TransferStatus::Completed);
        assert_eq!(items[1].status, TransferStatus::Completed);
        assert_eq!(items[0].local_path, items[1].local_path);
        // The later item wins.
        assert_eq!(std::fs::read(&items[1].local_path).unwrap(), vec![2u8; 20]);
    }

    #[test]
    fn works_without_an_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut device = MockDevice::new();
        device.add_item("IMG_N.jpg", "/DCIM/IMG_N.jpg", 1_700_000_000, vec![5u8; 128]);

        let mut queue = TransferQueue::new();
        queue.set_destination(dir.path());
        queue.set_handler(&device);
        enqueue_all(&queue, &device);
        queue.start();

        assert_eq!(queue.items()[0].status, TransferStatus::Completed);
    }

    #[test]
    fn stats_are_monotonic_during_a_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut device = MockDevice::new();
        // A mix that exercises every driver path: unique items, two
        // duplicate-content pairs (skipped after their device read), and
        // one item that fails once and is retried.
        device.add_item("IMG_0.jpg", "/DCIM/IMG_0.jpg", 1_700_000_000, vec![0u8; 4096]);
        device.add_item("IMG_1.jpg", "/DCIM/IMG_1.jpg", 1_700_000_000, vec![1u8; 4096]);
        let flaky =
            device.add_item("IMG_2.jpg", "/DCIM/IMG_2.jpg", 1_700_000_000, vec![2u8; 4096]);
        device.add_item("IMG_3.jpg", "/DCIM/IMG_3.jpg", 1_700_000_000, vec![1u8; 4096]);
        device.add_item("IMG_4.jpg", "/DCIM/IMG_4.jpg", 1_700_000_000, vec![0u8; 4096]);
        device.fail_reads_times(flaky, 1);
        let index = PhotoIndex::open_in_memory().unwrap();

        let observed = Arc::new(Mutex::new(Vec::<(usize, u64)>::new()));
        let sink = Arc::clone(&observed);

        let mut queue = test_queue(&device, &index, dir.path());
        queue.set_progress_callback(move |stats| {
            sink.lock()
                .unwrap()
                .push((stats.completed, stats.transferred_bytes));
        });
        enqueue_all(&queue, &device);
        queue.start();

        let stats = queue.stats();
        assert_eq!(stats.completed, 3);
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.transferred_bytes, 3 * 4096);

        let samples = observed.lock().unwrap();
        assert!(!samples.is_empty());
        for pair in samples.windows(2) {
            assert!(pair[1].0 >= pair[0].0, "completed went backwards");
            assert!(pair[1].1 >= pair[0].1, "transferred bytes went backwards");
        }
    }

    #[test]
    fn completed_and_failed_callbacks_fire() {
        let dir = tempfile::tempdir().unwrap();
        let mut device = MockDevice::new();
        device.add_item("GOOD.jpg", "/DCIM/GOOD.jpg", 1_700_000_000, vec![1u8; 32]);
        let bad = device.add_item("BAD.jpg", "/DCIM/BAD.jpg", 1_700_000_000, vec![2u8; 32]);
        device.fail_reads_for(bad);
        let index = PhotoIndex::open_in_memory().unwrap();

        let completed = Arc::new(Mutex::new(Vec::<String>::new()));
        let failed = Arc::new(Mutex::new(Vec::<String>::new()));
        let completed_sink = Arc::clone(&completed);
        let failed_sink = Arc::clone(&failed);

        let mut queue = test_queue(&device, &index, dir.path());
        queue.set_max_retries(0);
        queue.set_completed_callback(move |item| {
            completed_sink.lock().unwrap().push(item.media.filename.clone());
        });
        queue.set_failed_callback(move |item| {
            failed_sink.lock().unwrap().push(item.media.filename.clone());
        });
        enqueue_all(&queue, &device);
        queue.start();

        assert_eq!(*completed.lock().unwrap(), vec!["GOOD.jpg"]);
        assert_eq!(*failed.lock().unwrap(), vec!["BAD.jpg"]);
    }

    #[test]
    fn pause_stops_progress_and_resume_continues_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut device = MockDevice::new();
        let mut expected_order = Vec::new();
        for i in 0..10u32 {
            let id = device.add_item(
                &format!("IMG_{i:02}.jpg"),
                &format!("/DCIM/IMG_{i:02}.jpg"),
                1_700_000_000,
                vec![i as u8; 256],
            );
            expected_order.push(id);
        }
        device.set_read_delay(Duration::from_millis(15));
        let index = PhotoIndex::open_in_memory().unwrap();

        let queue = test_queue(&device, &index, dir.path());
        enqueue_all(&queue, &device);

        std::thread::scope(|scope| {
            scope.spawn(|| queue.start());

            while queue.stats().completed < 3 {
                std::thread::sleep(Duration::from_millis(5));
            }
            queue.pause();
            assert!(queue.is_paused());

            // The in-flight item may still finish; wait for it to settle.
            std::thread::sleep(Duration::from_millis(150));
            let frozen = queue.stats().completed;

            std::thread::sleep(Duration::from_millis(300));
            assert_eq!(queue.stats().completed, frozen, "progress while paused");

            queue.resume();
        });

        assert!(!queue.is_running());
        let items = queue.items();
        assert!(items.iter().all(|i| i.status == TransferStatus::Completed));
        assert_eq!(device.read_log(), expected_order);
    }

    #[test]
    fn cancel_returns_promptly_and_clears_running() {
        let dir = tempfile::tempdir().unwrap();
        let mut device = MockDevice::new();
        for i in 0..6u32 {
            device.add_item(
                &format!("IMG_{i}.jpg"),
                &format!("/DCIM/IMG_{i}.jpg"),
                1_700_000_000,
                vec![i as u8; 256],
            );
        }
        device.set_read_delay(Duration::from_millis(40));
        let index = PhotoIndex::open_in_memory().unwrap();

        let queue = test_queue(&device, &index, dir.path());
        enqueue_all(&queue, &device);

        std::thread::scope(|scope| {
            let driver = scope.spawn(|| queue.start());

            while queue.stats().completed < 1 {
                std::thread::sleep(Duration::from_millis(5));
            }
            let cancelled_at = Instant::now();
            queue.cancel();
            driver.join().unwrap();

            // At most one in-flight item's worth of work after cancel.
            assert!(cancelled_at.elapsed() < Duration::from_millis(500));
        });

        assert!(!queue.is_running());
        let stats = queue.stats();
        assert!(stats.completed < 6);
        assert!(queue.has_incomplete());
    }

    #[test]
    fn crash_resume_finishes_remaining_items() {
        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("queue.state");
        let mut device = MockDevice::new();
        let mut ids = Vec::new();
        for i in 0..5u32 {
            ids.push(device.add_item(
                &format!("IMG_{i}.jpg"),
                &format!("/DCIM/IMG_{i}.jpg"),
                1_700_000_000,
                vec![i as u8; 512],
            ));
        }
        let index = PhotoIndex::open_in_memory().unwrap();

        // First run: only the first two items were queued before the
        // "crash"; afterwards the remaining three are planned as well.
        {
            let queue = test_queue(&device, &index, dir.path());
            let media = device.enumerate(None).unwrap();
            queue.add(media[0].clone());
            queue.add(media[1].clone());
            queue.start();
            for media in media.iter().skip(2) {
                queue.add(media.clone());
            }
            queue.save_state(&state_path).unwrap();
            assert!(queue.has_incomplete());
        }
        assert_eq!(device.total_reads(), 2);

        // Restart: a fresh queue picks the state up and finishes.
        let mut queue = test_queue(&device, &index, dir.path());
        assert!(queue.load_state(&state_path).unwrap());
        assert!(queue.has_incomplete());
        queue.start();

        // The two completed items were not re-read.
        assert_eq!(device.total_reads(), 5);
        for id in &ids {
            assert_eq!(device.read_count(*id), 1);
        }
        let items = queue.items();
        assert_eq!(items.len(), 5);
        assert!(items.iter().all(|i| i.status == TransferStatus::Completed));
        for item in &items {
            assert!(item.local_path.exists());
        }
    }

    #[test]
    fn resume_of_fully_completed_queue_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("queue.state");
        let mut device = MockDevice::new();
        device.add_item("IMG_0.jpg", "/DCIM/IMG_0.jpg", 1_700_000_000, vec![1u8; 64]);
        let index = PhotoIndex::open_in_memory().unwrap();

        {
            let queue = test_queue(&device, &index, dir.path());
            enqueue_all(&queue, &device);
            queue.start();
            queue.save_state(&state_path).unwrap();
            assert!(!queue.has_incomplete());
        }
        let reads_before = device.total_reads();

        let mut queue = test_queue(&device, &index, dir.path());
        assert!(queue.load_state(&state_path).unwrap());
        assert!(!queue.has_incomplete());
        queue.start();

        assert_eq!(device.total_reads(), reads_before, "no-op resume must not read");
        assert_eq!(queue.items()[0].status, TransferStatus::Completed);
    }

    #[test]
    fn stale_parts_are_swept_at_start() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = dir.path().join("2024").join("01");
        std::fs::create_dir_all(&bucket).unwrap();
        let stale = bucket.join("old.jpg.part");
        std::fs::write(&stale, b"leftover").unwrap();
        // Backdate the file two days.
        let old = std::time::SystemTime::now() - Duration::from_secs(2 * 24 * 60 * 60);
        let file = std::fs::File::options().write(true).open(&stale).unwrap();
        file.set_modified(old).unwrap();
        drop(file);

        let device = MockDevice::new();
        let index = PhotoIndex::open_in_memory().unwrap();
        let queue = test_queue(&device, &index, dir.path());
        queue.start();

        assert!(!stale.exists());
    }
}
