//! Device access for mobile photo transfer.
//!
//! Exposes a unified [`DeviceHandler`] trait over the platform backends:
//! Android phones via MTP ([`MtpHandler`]) and iPhones/iPads via AFC
//! ([`AfcHandler`]). The transfer engine only ever sees the trait.

mod afc;
mod mock;
mod mount;
mod mtp;

pub use afc::AfcHandler;
pub use mock::MockDevice;
pub use mtp::MtpHandler;

use tracing::info;

/// Kind of connected device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Android,
    Ios,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Android => write!(f, "Android"),
            Self::Ios => write!(f, "iOS"),
        }
    }
}

/// A photo or video file on the device.
///
/// Produced by [`DeviceHandler::enumerate`] and immutable afterwards.
/// `object_id` is an opaque identifier only meaningful to the handler
/// instance that issued it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaInfo {
    pub object_id: u32,
    /// Leaf file name, no directory components.
    pub filename: String,
    /// Display path on the device (e.g. `/DCIM/Camera/IMG_0001.jpg`).
    pub device_path: String,
    pub size: u64,
    /// Modification time, seconds since the Unix epoch.
    pub mtime: u64,
    pub mime_type: String,
}

/// One storage region on the device. Read-only snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageInfo {
    pub storage_id: u32,
    pub description: String,
    /// Total capacity in bytes (0 when the backend cannot report it).
    pub capacity: u64,
    /// Free space in bytes (0 when the backend cannot report it).
    pub free: u64,
    pub storage_type: u16,
}

/// Errors reported by device backends.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("no device detected")]
    NotDetected,

    #[error("device not connected")]
    NotConnected,

    #[error("failed to connect: {0}")]
    ConnectFailed(String),

    #[error("unknown object id {0}")]
    UnknownObject(u32),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{tool} failed: {message}")]
    Tool { tool: String, message: String },
}

/// Unified interface over the device backends.
///
/// Connection management (`detect`, `connect`, `disconnect`) takes
/// `&mut self`; everything consumed after setup (`enumerate`, `read`,
/// `exists`, `is_connected`) is `&self` so the transfer queue can hold a
/// shared borrow for the duration of a run.
pub trait DeviceHandler: Send + Sync {
    /// Probes for a device of this backend's type. Returns `true` if one
    /// is present.
    fn detect(&mut self) -> Result<bool, DeviceError>;

    /// Connects to the detected device. `name` optionally selects a
    /// specific device when several are present.
    fn connect(&mut self, name: Option<&str>) -> Result<(), DeviceError>;

    /// Releases the device. Safe to call when not connected.
    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    fn device_name(&self) -> String;
    fn manufacturer(&self) -> String;
    fn model(&self) -> String;
    fn device_type(&self) -> DeviceType;

    /// Storage regions of the connected device.
    fn storages(&self) -> Result<Vec<StorageInfo>, DeviceError>;

    /// Recursively enumerates photo/video files, optionally restricted to
    /// `subpath` below the media root. Returns a flat list regardless of
    /// the on-device directory structure. Refreshes the handler's object
    /// id table as a side effect.
    fn enumerate(&self, subpath: Option<&str>) -> Result<Vec<MediaInfo>, DeviceError>;

    /// Reads the complete file for `object_id` into memory.
    fn read(&self, object_id: u32) -> Result<Vec<u8>, DeviceError>;

    /// Returns `true` if `object_id` still resolves to a file.
    fn exists(&self, object_id: u32) -> bool;
}

/// Tries each backend in turn (MTP first, then AFC) and returns the first
/// one that detects a device.
pub fn detect_any() -> Result<Box<dyn DeviceHandler>, DeviceError> {
    let mut mtp = MtpHandler::new();
    if mtp.detect()? {
        info!("auto-detected Android device");
        return Ok(Box::new(mtp));
    }

    let mut afc = AfcHandler::new();
    if afc.detect()? {
        info!("auto-detected iOS device");
        return Ok(Box::new(afc));
    }

    Err(DeviceError::NotDetected)
}

/// File extensions treated as transferable media.
const MEDIA_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "heic", "heif", "dng", "raw", "mp4", "mov", "avi", "mkv",
    "webm", "3gp", "m4v",
];

/// Returns `true` if `filename` has a recognized photo/video extension.
pub fn is_media_file(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .is_some_and(|(_, ext)| MEDIA_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Best-effort MIME type from a file extension.
pub fn mime_for(filename: &str) -> String {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "heic" | "heif" => "image/heic",
        "dng" | "raw" => "image/x-adobe-dng",
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "3gp" => "video/3gpp",
        _ => "application/octet-stream",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_filter_accepts_photos_and_videos() {
        assert!(is_media_file("IMG_0001.jpg"));
        assert!(is_media_file("IMG_0001.HEIC"));
        assert!(is_media_file("clip.MOV"));
        assert!(is_media_file("clip.mp4"));
    }

    #[test]
    fn media_filter_rejects_other_files() {
        assert!(!is_media_file("notes.txt"));
        assert!(!is_media_file("archive.zip"));
        assert!(!is_media_file("no_extension"));
        assert!(!is_media_file(".hidden"));
    }

    #[test]
    fn mime_mapping() {
        assert_eq!(mime_for("a.jpg"), "image/jpeg");
        assert_eq!(mime_for("a.HEIC"), "image/heic");
        assert_eq!(mime_for("a.mov"), "video/quicktime");
        assert_eq!(mime_for("a.xyz"), "application/octet-stream");
    }

    #[test]
    fn device_type_display() {
        assert_eq!(DeviceType::Android.to_string(), "Android");
        assert_eq!(DeviceType::Ios.to_string(), "iOS");
    }
}
