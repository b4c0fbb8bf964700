use std::fs;
use std::path::{Path, PathBuf};

use crate::error::SnapshotError;

/// Replace `path` with `url`, written verbatim without a trailing newline.
pub fn write_url(path: &Path, url: &str) -> Result<(), SnapshotError> {
    ensure_parent_directory(path)?;
    let temp_path = build_temp_path(path);
    let result = fs::write(&temp_path, url).and_then(|()| fs::rename(&temp_path, path));
    if let Err(err) = result {
        let _ = fs::remove_file(&temp_path);
        return Err(err.into());
    }
    Ok(())
}

fn build_temp_path(path: &Path) -> PathBuf {
    let mut temp_path = path.to_path_buf();
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if !ext.is_empty() => {
            temp_path.set_extension(format!("{ext}.tmp"));
        }
        _ => {
            temp_path.set_extension("tmp");
        }
    }
    temp_path
}

fn ensure_parent_directory(path: &Path) -> Result<(), SnapshotError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
