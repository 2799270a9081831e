//! JSON artifacts written into the output directory.

use crate::error::Result;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Pretty-print `value` to `dir/file_name`, creating `dir` if needed.
///
/// # Returns
/// The path written.
pub fn write_json<T: Serialize>(dir: &Path, file_name: &str, value: &T) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(file_name);
    std::fs::write(&path, serde_json::to_vec_pretty(value)?)?;
    log::info!("wrote {}", path.display());
    Ok(path)
}
