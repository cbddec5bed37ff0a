//! Atomic file replacement.
//!
//! Bytes go to a uniquely named sibling temp file which is then renamed over
//! the target. Readers opening the target see either the previous complete
//! contents or the new complete contents.

use crate::core::error::DocvaultError;
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use ulid::Ulid;

/// Serialize `value` as 2-space pretty JSON (trailing newline) and write it atomically.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), DocvaultError> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    write(path, &bytes)
}

pub fn write(path: &Path, bytes: &[u8]) -> Result<(), DocvaultError> {
    let parent = parent_dir(path);
    fs::create_dir_all(&parent).map_err(DocvaultError::IoError)?;

    let tmp_path = temp_sibling(path);
    if let Err(err) = write_synced(&tmp_path, bytes) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(DocvaultError::IoError(err));
    }
    sync_dir(&parent);
    Ok(())
}

/// Temp files live next to the target so the rename never crosses filesystems.
pub fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "document".to_string());
    parent_dir(path).join(format!(".{}.{}.tmp", name, Ulid::new()))
}

pub fn is_temp_file(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(".tmp")
}

fn write_synced(tmp_path: &Path, bytes: &[u8]) -> Result<(), DocvaultError> {
    let mut file = File::create(tmp_path).map_err(DocvaultError::IoError)?;
    file.write_all(bytes).map_err(DocvaultError::IoError)?;
    file.sync_all().map_err(DocvaultError::IoError)?;
    Ok(())
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    // Persists the rename itself; not all filesystems support it.
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}
