//! Path derivation for the destination tree.

use std::path::{Path, PathBuf};

use chrono::{Local, TimeZone};

/// Joins `base` and `child`, collapsing a trailing separator on `base`
/// and a leading one on `child` so the result never doubles up.
pub fn join(base: &Path, child: &str) -> PathBuf {
    base.join(child.trim_start_matches(['/', '\\']))
}

/// Expands a leading `~` to the user's home directory. Paths without the
/// prefix (and `~user` forms) are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = home_dir() {
            return home;
        }
    }
    if let Some(rest) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        if let Some(home) = home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

fn home_dir() -> Option<PathBuf> {
    #[cfg(windows)]
    {
        std::env::var("USERPROFILE").ok().map(PathBuf::from)
    }
    #[cfg(not(windows))]
    {
        std::env::var("HOME").ok().map(PathBuf::from)
    }
}

/// `YYYY/MM` folder for a modification time, in the host's local
/// calendar. An mtime of 0 marks a missing timestamp and always maps to
/// `1970/01`.
pub fn date_bucket(mtime: u64) -> String {
    if mtime == 0 {
        return "1970/01".to_string();
    }
    match Local.timestamp_opt(mtime as i64, 0).single() {
        Some(ts) => ts.format("%Y/%m").to_string(),
        None => "1970/01".to_string(),
    }
}

/// Leaf name of a device-side filename, with any directory components
/// (either separator style) stripped.
pub fn basename(filename: &str) -> &str {
    filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
}

/// Final destination for an item:
/// `expand_home(dest) / date_bucket(mtime) / basename(filename)`.
///
/// Purely a function of its inputs.
pub fn local_path_for(destination: &str, filename: &str, mtime: u64) -> PathBuf {
    let root = expand_home(destination);
    join(&join(&root, &date_bucket(mtime)), basename(filename))
}
