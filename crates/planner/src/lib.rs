//! Sync planning.
//!
//! Turns the device's enumerated media plus the index's last-sync
//! timestamp into the list of items worth queueing, and records the new
//! last-sync time once a run finishes.

use std::time::{SystemTime, UNIX_EPOCH};

use phototransfer_device::{DeviceError, DeviceHandler, MediaInfo};
use phototransfer_index::{IndexError, PhotoIndex};
use tracing::{debug, info, warn};

/// Errors produced while planning a sync.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("device not connected")]
    NotConnected,

    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),
}

/// Planner options.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanOptions {
    /// Keep only items modified after the index's last-sync timestamp.
    /// A first run (timestamp 0) keeps everything.
    pub only_new: bool,
}

/// The outcome of planning: what to queue and how much it weighs.
#[derive(Debug, Clone)]
pub struct SyncPlan {
    /// Items to transfer, in enumeration order.
    pub items: Vec<MediaInfo>,
    /// Total size of the planned items, in bytes.
    pub total_bytes: u64,
    /// How many items the device reported before filtering.
    pub enumerated: usize,
    /// The last-sync timestamp the filter was based on (0 = first run).
    pub last_sync: u64,
}

/// Enumerates the device and filters the result per `options`.
///
/// An empty enumeration is informational, not an error: the plan just
/// comes back empty.
pub fn plan_sync(
    handler: &dyn DeviceHandler,
    index: &PhotoIndex,
    options: PlanOptions,
) -> Result<SyncPlan, PlanError> {
    if !handler.is_connected() {
        return Err(PlanError::NotConnected);
    }

    let media = handler.enumerate(None)?;
    let enumerated = media.len();
    if media.is_empty() {
        warn!("device enumerated zero media items");
    }

    let last_sync = if options.only_new {
        index.last_sync_time()?
    } else {
        0
    };

    let items: Vec<MediaInfo> = if options.only_new && last_sync > 0 {
        media.into_iter().filter(|m| m.mtime > last_sync).collect()
    } else {
        media
    };

    if options.only_new && last_sync > 0 {
        debug!(
            enumerated,
            planned = items.len(),
            last_sync,
            "filtered to items modified after last sync"
        );
    }

    let total_bytes = items.iter().map(|m| m.size).sum();
    info!(planned = items.len(), total_bytes, "sync plan ready");

    Ok(SyncPlan {
        items,
        total_bytes,
        enumerated,
        last_sync,
    })
}

/// Records the current wall-clock second as the last completed sync.
/// Call after the queue has finished.
pub fn finish_sync(index: &PhotoIndex) -> Result<(), PlanError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    index.set_last_sync_time(now)?;
    debug!(last_sync = now, "last sync time updated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use phototransfer_device::MockDevice;

    fn device_with_mtimes(mtimes: &[u64]) -> MockDevice {
        let mut device = MockDevice::new();
        for (i, mtime) in mtimes.iter().enumerate() {
            device.add_item(
                &format!("IMG_{i}.jpg"),
                &format!("/DCIM/IMG_{i}.jpg"),
                *mtime,
                vec![i as u8; 100],
            );
        }
        device
    }

    #[test]
    fn plan_all_keeps_everything() {
        let device = device_with_mtimes(&[100, 200, 300]);
        let index = PhotoIndex::open_in_memory().unwrap();
        index.set_last_sync_time(250).unwrap();

        let plan = plan_sync(&device, &index, PlanOptions { only_new: false }).unwrap();
        assert_eq!(plan.items.len(), 3);
        assert_eq!(plan.enumerated, 3);
        assert_eq!(plan.total_bytes, 300);
    }

    #[test]
    fn only_new_filters_by_last_sync() {
        let device = device_with_mtimes(&[100, 250, 300]);
        let index = PhotoIndex::open_in_memory().unwrap();
        index.set_last_sync_time(250).unwrap();

        let plan = plan_sync(&device, &index, PlanOptions { only_new: true }).unwrap();
        // Strictly greater than the last sync time.
        assert_eq!(plan.items.len(), 1);
        assert_eq!(plan.items[0].mtime, 300);
        assert_eq!(plan.last_sync, 250);
        assert_eq!(plan.enumerated, 3);
    }

    #[test]
    fn only_new_on_first_run_keeps_everything() {
        let device = device_with_mtimes(&[100, 200]);
        let index = PhotoIndex::open_in_memory().unwrap();

        let plan = plan_sync(&device, &index, PlanOptions { only_new: true }).unwrap();
        assert_eq!(plan.items.len(), 2);
        assert_eq!(plan.last_sync, 0);
    }

    #[test]
    fn empty_enumeration_is_not_an_error() {
        let device = MockDevice::new();
        let index = PhotoIndex::open_in_memory().unwrap();

        let plan = plan_sync(&device, &index, PlanOptions::default()).unwrap();
        assert!(plan.items.is_empty());
        assert_eq!(plan.enumerated, 0);
        assert_eq!(plan.total_bytes, 0);
    }

    #[test]
    fn disconnected_device_is_an_error() {
        let device = device_with_mtimes(&[100]);
        device.set_connected(false);
        let index = PhotoIndex::open_in_memory().unwrap();

        let err = plan_sync(&device, &index, PlanOptions::default()).unwrap_err();
        assert!(matches!(err, PlanError::NotConnected));
    }

    #[test]
    fn finish_sync_advances_last_sync_time() {
        let index = PhotoIndex::open_in_memory().unwrap();
        assert_eq!(index.last_sync_time().unwrap(), 0);

        finish_sync(&index).unwrap();
        assert!(index.last_sync_time().unwrap() > 0);
    }
}
