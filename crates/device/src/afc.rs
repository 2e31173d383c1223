//! iOS backend: iPhones/iPads accessed over AFC via libimobiledevice.
//!
//! Detection uses `idevice_id -l` and `ideviceinfo`; the media partition
//! is mounted read-only with `ifuse` under a per-device temp mount point
//! and unmounted again on disconnect.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use tracing::{debug, info, warn};

use crate::mount::{self, ObjectEntry};
use crate::{DeviceError, DeviceHandler, DeviceType, MediaInfo, StorageInfo};

pub struct AfcHandler {
    udid: Option<String>,
    device_name: String,
    model: String,
    mount_point: Option<PathBuf>,
    connected: bool,
    objects: Mutex<Vec<ObjectEntry>>,
}

impl AfcHandler {
    pub fn new() -> Self {
        Self {
            udid: None,
            device_name: String::new(),
            model: String::new(),
            mount_point: None,
            connected: false,
            objects: Mutex::new(Vec::new()),
        }
    }

    fn ideviceinfo(udid: &str, key: &str) -> Option<String> {
        let output = Command::new("ideviceinfo")
            .args(["-u", udid, "-k", key])
            .output()
            .ok()?;
        let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!value.is_empty()).then_some(value)
    }

    fn unmount(mount: &Path) {
        #[cfg(target_os = "macos")]
        let status = Command::new("umount").arg(mount).output();
        #[cfg(not(target_os = "macos"))]
        let status = Command::new("fusermount").args(["-u"]).arg(mount).output();

        if let Err(e) = status {
            warn!(mount = %mount.display(), error = %e, "failed to unmount AFC mount point");
        }
    }
}

impl Default for AfcHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceHandler for AfcHandler {
    fn detect(&mut self) -> Result<bool, DeviceError> {
        let Ok(output) = Command::new("idevice_id").arg("-l").output() else {
            // libimobiledevice not installed.
            return Ok(false);
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let Some(udid) = stdout.lines().map(str::trim).find(|l| !l.is_empty()) else {
            return Ok(false);
        };

        debug!(udid, "found iOS device");
        self.device_name =
            Self::ideviceinfo(udid, "DeviceName").unwrap_or_else(|| "iPhone/iPad".to_string());
        self.model = Self::ideviceinfo(udid, "ProductType").unwrap_or_default();
        self.udid = Some(udid.to_string());
        Ok(true)
    }

    fn connect(&mut self, name: Option<&str>) -> Result<(), DeviceError> {
        let udid = self
            .udid
            .clone()
            .ok_or_else(|| DeviceError::ConnectFailed("no iOS device detected".to_string()))?;

        if let Some(wanted) = name {
            if wanted != udid && wanted != self.device_name {
                return Err(DeviceError::ConnectFailed(format!(
                    "device '{wanted}' does not match detected device"
                )));
            }
        }

        let mount = std::env::temp_dir().join(format!("phototransfer-afc-{udid}"));
        std::fs::create_dir_all(&mount)?;

        let output = Command::new("ifuse")
            .args(["-u", &udid])
            .arg(&mount)
            .output()
            .map_err(|e| DeviceError::Tool {
                tool: "ifuse".to_string(),
                message: e.to_string(),
            })?;

        // ifuse exits non-zero when the mount point is already busy from a
        // previous run; treat a readable mount as success either way.
        if !output.status.success() && std::fs::read_dir(&mount)?.next().is_none() {
            let message = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(DeviceError::ConnectFailed(format!(
                "ifuse could not mount the device: {message}"
            )));
        }

        info!(device = %self.device_name, mount = %mount.display(), "connected to iOS device");
        self.mount_point = Some(mount);
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(mount) = self.mount_point.take() {
            Self::unmount(&mount);
            debug!(device = %self.device_name, "disconnected from iOS device");
        }
        self.connected = false;
        self.objects.lock().unwrap().clear();
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn device_name(&self) -> String {
        if self.device_name.is_empty() {
            "iPhone/iPad".to_string()
        } else {
            self.device_name.clone()
        }
    }

    fn manufacturer(&self) -> String {
        "Apple".to_string()
    }

    fn model(&self) -> String {
        self.model.clone()
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::Ios
    }

    fn storages(&self) -> Result<Vec<StorageInfo>, DeviceError> {
        if !self.connected {
            return Err(DeviceError::NotConnected);
        }
        // AFC exposes a single media partition; sizes are not reported
        // through the FUSE view.
        Ok(vec![StorageInfo {
            storage_id: 0,
            description: "Media".to_string(),
            capacity: 0,
            free: 0,
            storage_type: 0,
        }])
    }

    fn enumerate(&self, subpath: Option<&str>) -> Result<Vec<MediaInfo>, DeviceError> {
        if !self.connected {
            return Err(DeviceError::NotConnected);
        }
        let mount = self.mount_point.clone().ok_or(DeviceError::NotConnected)?;

        // Photos live under DCIM unless the caller narrows the scan.
        let scan = subpath.unwrap_or("DCIM");
        let (media, objects) = mount::scan_media(&mount, Some(scan), "/")?;
        if media.is_empty() {
            warn!("no media files found on iOS device");
        }
        *self.objects.lock().unwrap() = objects;
        Ok(media)
    }

    fn read(&self, object_id: u32) -> Result<Vec<u8>, DeviceError> {
        if !self.connected {
            return Err(DeviceError::NotConnected);
        }
        mount::read_object(&self.objects.lock().unwrap(), object_id)
    }

    fn exists(&self, object_id: u32) -> bool {
        self.connected && mount::object_exists(&self.objects.lock().unwrap(), object_id)
    }
}
