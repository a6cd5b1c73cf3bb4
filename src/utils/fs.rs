//! Atomic file writes and content fingerprints.

use rustc_hash::FxHasher;
use std::{
    fs,
    hash::{Hash, Hasher},
    io::{self, Write},
    path::{Path, PathBuf},
};

/// Cheap content fingerprint for change detection.
pub fn fingerprint(text: &str) -> u64 {
    let mut hasher = FxHasher::default();
    text.hash(&mut hasher);
    hasher.finish()
}

/// Whether the file at `path` still holds `expected`.
pub fn unchanged_on_disk(path: &Path, expected: &str) -> bool {
    fs::read_to_string(path).is_ok_and(|current| current == expected)
}

/// Temporary sibling used while writing `path`.
///
/// Starts with `.` and ends with `.tmp` so the watcher ignores it.
fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{}.tmp", std::process::id()))
}

/// Write `content` to `path` atomically.
///
/// Content goes to a temporary file in the same directory which is then
/// renamed over the original, so readers never observe a half-written file.
/// Permissions of an existing file are carried over.
pub fn atomic_write(path: &Path, content: &str) -> io::Result<()> {
    let tmp = temp_path(path);

    let result = (|| {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        if let Ok(meta) = fs::metadata(path) {
            fs::set_permissions(&tmp, meta.permissions())?;
        }
        fs::rename(&tmp, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_creates_and_replaces() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.md");

        atomic_write(&path, "first").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "first");

        atomic_write(&path, "second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");

        // No temp files left behind
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_atomic_write_missing_dir_fails_cleanly() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("doc.md");
        assert!(atomic_write(&path, "x").is_err());
    }

    #[test]
    fn test_unchanged_on_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.md");
        fs::write(&path, "a").unwrap();
        assert!(unchanged_on_disk(&path, "a"));
        assert!(!unchanged_on_disk(&path, "b"));
        assert!(!unchanged_on_disk(&dir.path().join("missing.md"), "a"));
        assert_eq!(fingerprint("a"), fingerprint("a"));
        assert_ne!(fingerprint("a"), fingerprint("b"));
    }

    #[test]
    fn test_temp_path_is_hidden() {
        let tmp = temp_path(Path::new("/a/doc.md"));
        let name = tmp.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(".doc.md."));
        assert!(name.ends_with(".tmp"));
        assert!(crate::utils::path::is_temp_file(&tmp));
    }
}
