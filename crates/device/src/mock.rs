//! In-memory device for tests and demo runs.
//!
//! Behaves like a real backend (connection state, enumeration, whole-file
//! reads) but is fully scriptable: per-object read failures, a global
//! read failure switch, an artificial per-read delay, and read-count
//! accounting for asserting how often the engine touched the device.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::{mime_for, DeviceError, DeviceHandler, DeviceType, MediaInfo, StorageInfo};

pub struct MockDevice {
    media: Vec<MediaInfo>,
    blobs: HashMap<u32, Vec<u8>>,
    connected: AtomicBool,
    fail_all_reads: AtomicBool,
    /// Remaining injected failures per object (`u32::MAX` = forever).
    failing_objects: Mutex<HashMap<u32, u32>>,
    read_counts: Mutex<HashMap<u32, u32>>,
    read_log: Mutex<Vec<u32>>,
    total_reads: AtomicU32,
    read_delay: Mutex<Duration>,
    next_id: u32,
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            media: Vec::new(),
            blobs: HashMap::new(),
            connected: AtomicBool::new(true),
            fail_all_reads: AtomicBool::new(false),
            failing_objects: Mutex::new(HashMap::new()),
            read_counts: Mutex::new(HashMap::new()),
            read_log: Mutex::new(Vec::new()),
            total_reads: AtomicU32::new(0),
            read_delay: Mutex::new(Duration::ZERO),
            next_id: 1,
        }
    }

    /// A device pre-populated with a handful of camera-roll style items,
    /// used by `--demo` runs.
    pub fn demo() -> Self {
        let mut device = Self::new();
        for i in 0..12u32 {
            let is_video = i % 4 == 0;
            let name = if is_video {
                format!("VID_{:04}.mp4", 1000 + i)
            } else {
                format!("IMG_{:04}.jpg", 1000 + i)
            };
            let path = format!("/DCIM/Camera/{name}");
            let bytes = vec![i as u8; 2048 + (i as usize) * 512];
            // Spread items over a few months of 2024.
            let mtime = 1_704_067_200 + u64::from(i) * 21 * 86_400;
            device.add_item(&name, &path, mtime, bytes);
        }
        device
    }

    /// Adds a media item backed by `bytes` and returns its object id.
    pub fn add_item(&mut self, filename: &str, device_path: &str, mtime: u64, bytes: Vec<u8>) -> u32 {
        let object_id = self.next_id;
        self.next_id += 1;
        self.media.push(MediaInfo {
            object_id,
            filename: filename.to_string(),
            device_path: device_path.to_string(),
            size: bytes.len() as u64,
            mtime,
            mime_type: mime_for(filename),
        });
        self.blobs.insert(object_id, bytes);
        object_id
    }

    /// Makes every read fail until cleared.
    pub fn set_fail_all_reads(&self, fail: bool) {
        self.fail_all_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes every read of one specific object fail.
    pub fn fail_reads_for(&self, object_id: u32) {
        self.failing_objects
            .lock()
            .unwrap()
            .insert(object_id, u32::MAX);
    }

    /// Makes the next `n` reads of one object fail, then recover.
    pub fn fail_reads_times(&self, object_id: u32, n: u32) {
        self.failing_objects.lock().unwrap().insert(object_id, n);
    }

    /// Sleeps this long inside every `read` call.
    pub fn set_read_delay(&self, delay: Duration) {
        *self.read_delay.lock().unwrap() = delay;
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Number of `read` calls for one object.
    pub fn read_count(&self, object_id: u32) -> u32 {
        self.read_counts
            .lock()
            .unwrap()
            .get(&object_id)
            .copied()
            .unwrap_or(0)
    }

    /// Number of `read` calls across all objects.
    pub fn total_reads(&self) -> u32 {
        self.total_reads.load(Ordering::SeqCst)
    }

    /// Object ids in the order they were read.
    pub fn read_log(&self) -> Vec<u32> {
        self.read_log.lock().unwrap().clone()
    }
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceHandler for MockDevice {
    fn detect(&mut self) -> Result<bool, DeviceError> {
        Ok(true)
    }

    fn connect(&mut self, _name: Option<&str>) -> Result<(), DeviceError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn device_name(&self) -> String {
        "Mock Phone".to_string()
    }

    fn manufacturer(&self) -> String {
        "PhotoTransfer".to_string()
    }

    fn model(&self) -> String {
        "Mock-1".to_string()
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::Android
    }

    fn storages(&self) -> Result<Vec<StorageInfo>, DeviceError> {
        Ok(vec![StorageInfo {
            storage_id: 0x0001_0001,
            description: "Internal Storage".to_string(),
            capacity: 64 * 1024 * 1024 * 1024,
            free: 32 * 1024 * 1024 * 1024,
            storage_type: 3,
        }])
    }

    fn enumerate(&self, subpath: Option<&str>) -> Result<Vec<MediaInfo>, DeviceError> {
        if !self.is_connected() {
            return Err(DeviceError::NotConnected);
        }
        let media = match subpath {
            Some(sub) => self
                .media
                .iter()
                .filter(|m| m.device_path.starts_with(sub))
                .cloned()
                .collect(),
            None => self.media.clone(),
        };
        Ok(media)
    }

    fn read(&self, object_id: u32) -> Result<Vec<u8>, DeviceError> {
        if !self.is_connected() {
            return Err(DeviceError::NotConnected);
        }

        *self
            .read_counts
            .lock()
            .unwrap()
            .entry(object_id)
            .or_insert(0) += 1;
        self.read_log.lock().unwrap().push(object_id);
        self.total_reads.fetch_add(1, Ordering::SeqCst);

        let delay = *self.read_delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let mut inject_failure = self.fail_all_reads.load(Ordering::SeqCst);
        if !inject_failure {
            let mut failing = self.failing_objects.lock().unwrap();
            if let Some(remaining) = failing.get_mut(&object_id) {
                if *remaining > 0 {
                    inject_failure = true;
                    if *remaining != u32::MAX {
                        *remaining -= 1;
                    }
                }
            }
        }
        if inject_failure {
            return Err(DeviceError::Tool {
                tool: "mock".to_string(),
                message: format!("injected read failure for object {object_id}"),
            });
        }

        self.blobs
            .get(&object_id)
            .cloned()
            .ok_or(DeviceError::UnknownObject(object_id))
    }

    fn exists(&self, object_id: u32) -> bool {
        self.is_connected() && self.blobs.contains_key(&object_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumerate_and_read() {
        let mut device = MockDevice::new();
        let id = device.add_item("IMG_0001.jpg", "/DCIM/IMG_0001.jpg", 1000, b"abc".to_vec());

        let media = device.enumerate(None).unwrap();
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].object_id, id);
        assert_eq!(media[0].size, 3);

        assert_eq!(device.read(id).unwrap(), b"abc");
        assert_eq!(device.read_count(id), 1);
        assert!(device.exists(id));
        assert!(!device.exists(999));
    }

    #[test]
    fn injected_read_failure() {
        let mut device = MockDevice::new();
        let id = device.add_item("IMG_0001.jpg", "/DCIM/IMG_0001.jpg", 1000, b"abc".to_vec());
        device.fail_reads_for(id);

        assert!(device.read(id).is_err());
        // Failed reads still count as device touches.
        assert_eq!(device.read_count(id), 1);
    }

    #[test]
    fn bounded_read_failures_recover() {
        let mut device = MockDevice::new();
        let id = device.add_item("IMG_0001.jpg", "/DCIM/IMG_0001.jpg", 1000, b"abc".to_vec());
        device.fail_reads_times(id, 2);

        assert!(device.read(id).is_err());
        assert!(device.read(id).is_err());
        assert_eq!(device.read(id).unwrap(), b"abc");
        assert_eq!(device.read_log(), vec![id, id, id]);
    }

    #[test]
    fn disconnected_device_rejects_reads() {
        let mut device = MockDevice::new();
        let id = device.add_item("IMG_0001.jpg", "/DCIM/IMG_0001.jpg", 1000, b"abc".to_vec());
        device.set_connected(false);

        assert!(!device.is_connected());
        assert!(matches!(device.read(id), Err(DeviceError::NotConnected)));
        assert!(device.enumerate(None).is_err());
    }

    #[test]
    fn enumerate_with_subpath_filter() {
        let mut device = MockDevice::new();
        device.add_item("a.jpg", "/DCIM/Camera/a.jpg", 1, b"a".to_vec());
        device.add_item("b.jpg", "/Pictures/b.jpg", 2, b"b".to_vec());

        let media = device.enumerate(Some("/DCIM")).unwrap();
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].filename, "a.jpg");
    }

    #[test]
    fn demo_device_has_media() {
        let device = MockDevice::demo();
        let media = device.enumerate(None).unwrap();
        assert!(!media.is_empty());
        let id = media[0].object_id;
        assert_eq!(device.read(id).unwrap().len() as u64, media[0].size);
    }
}
