//! Android backend: MTP devices exposed through a GVFS mount.
//!
//! Detection goes through `gio mount -l` (with `mtp-detect` as a
//! fallback for naming); file access uses the FUSE view GVFS publishes
//! under `$XDG_RUNTIME_DIR/gvfs`.

use std::path::PathBuf;
use std::process::Command;
use std::sync::Mutex;

use tracing::{debug, info, warn};

use crate::mount::{self, ObjectEntry};
use crate::{DeviceError, DeviceHandler, DeviceType, MediaInfo, StorageInfo};

pub struct MtpHandler {
    device_name: String,
    manufacturer: String,
    model: String,
    mount_point: Option<PathBuf>,
    connected: bool,
    objects: Mutex<Vec<ObjectEntry>>,
}

impl MtpHandler {
    pub fn new() -> Self {
        Self {
            device_name: String::new(),
            manufacturer: "Unknown".to_string(),
            model: String::new(),
            mount_point: None,
            connected: false,
            objects: Mutex::new(Vec::new()),
        }
    }

    /// Directory where GVFS exposes FUSE views of active mounts.
    fn gvfs_dir() -> PathBuf {
        if let Ok(runtime) = std::env::var("XDG_RUNTIME_DIR") {
            return PathBuf::from(runtime).join("gvfs");
        }
        PathBuf::from("/run/user/1000/gvfs")
    }

    /// Finds a FUSE-mounted MTP device, optionally matching `name`.
    fn find_fuse_mount(name: Option<&str>) -> Option<PathBuf> {
        let dir = Self::gvfs_dir();
        let entries = std::fs::read_dir(&dir).ok()?;
        for entry in entries.flatten() {
            let leaf = entry.file_name().to_string_lossy().into_owned();
            if !leaf.starts_with("mtp:") && !leaf.starts_with("gphoto2:") {
                continue;
            }
            if let Some(wanted) = name {
                if !leaf.contains(wanted) {
                    continue;
                }
            }
            return Some(entry.path());
        }
        None
    }

    /// Pulls manufacturer/model out of `mtp-detect` output, when the tool
    /// is available.
    fn probe_identity(&mut self) {
        let Ok(output) = Command::new("mtp-detect").output() else {
            return;
        };
        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines() {
            if let Some(value) = line.trim().strip_prefix("Manufacturer:") {
                self.manufacturer = value.trim().to_string();
            }
            if let Some(value) = line.trim().strip_prefix("Model:") {
                self.model = value.trim().to_string();
            }
        }
    }
}

impl Default for MtpHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceHandler for MtpHandler {
    fn detect(&mut self) -> Result<bool, DeviceError> {
        // Preferred: an active GVFS mount means the desktop already
        // negotiated the MTP session.
        if let Some(mount) = Self::find_fuse_mount(None) {
            debug!(mount = %mount.display(), "found GVFS MTP mount");
            self.mount_point = Some(mount);
            self.probe_identity();
            return Ok(true);
        }

        // Fallback: ask gio directly whether a mount URI exists.
        if let Ok(output) = Command::new("gio").args(["mount", "-l"]).output() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            for line in stdout.lines() {
                if line.contains("mtp://") || line.contains("gphoto2://") {
                    let name = line
                        .split("->")
                        .next()
                        .map(|s| s.trim().to_string())
                        .unwrap_or_default();
                    debug!(mount = %name, "gio reports MTP mount without FUSE view");
                    self.device_name = name;
                    self.probe_identity();
                    return Ok(true);
                }
            }
        }

        Ok(false)
    }

    fn connect(&mut self, name: Option<&str>) -> Result<(), DeviceError> {
        let mount = Self::find_fuse_mount(name)
            .or_else(|| self.mount_point.clone())
            .ok_or_else(|| {
                DeviceError::ConnectFailed(
                    "no MTP mount found; connect the phone and select File Transfer mode"
                        .to_string(),
                )
            })?;

        if self.device_name.is_empty() {
            self.device_name = mount
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "Android Device".to_string());
        }
        info!(device = %self.device_name, mount = %mount.display(), "connected to MTP device");
        self.mount_point = Some(mount);
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.connected {
            debug!(device = %self.device_name, "disconnected from MTP device");
        }
        self.connected = false;
        self.objects.lock().unwrap().clear();
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn device_name(&self) -> String {
        if self.device_name.is_empty() {
            "Android Device".to_string()
        } else {
            self.device_name.clone()
        }
    }

    fn manufacturer(&self) -> String {
        self.manufacturer.clone()
    }

    fn model(&self) -> String {
        self.model.clone()
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::Android
    }

    fn storages(&self) -> Result<Vec<StorageInfo>, DeviceError> {
        if !self.connected {
            return Err(DeviceError::NotConnected);
        }
        let mount = self.mount_point.as_ref().ok_or(DeviceError::NotConnected)?;

        // MTP exposes each storage region as a top-level directory of the
        // mount. Capacity figures are not available through the FUSE view.
        let mut storages = Vec::new();
        for (i, entry) in std::fs::read_dir(mount)?.flatten().enumerate() {
            if entry.path().is_dir() {
                storages.push(StorageInfo {
                    storage_id: i as u32,
                    description: entry.file_name().to_string_lossy().into_owned(),
                    capacity: 0,
                    free: 0,
                    storage_type: 0,
                });
            }
        }
        Ok(storages)
    }

    fn enumerate(&self, subpath: Option<&str>) -> Result<Vec<MediaInfo>, DeviceError> {
        if !self.connected {
            return Err(DeviceError::NotConnected);
        }
        let mount = self.mount_point.clone().ok_or(DeviceError::NotConnected)?;

        let (media, objects) = mount::scan_media(&mount, subpath, "/")?;
        if media.is_empty() {
            warn!("no media files found on MTP device");
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
