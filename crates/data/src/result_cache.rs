//! Write-once file cache for venue calculation results.
//!
//! Each calculation id maps to `<dir>/<id>_results.json`. Entries are never
//! invalidated: a calculation's results do not change once the venue has
//! produced them.

use crate::error::{DataError, Result};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Longest id accepted as a cache key.
pub const MAX_ID_LEN: usize = 128;

const FILE_SUFFIX: &str = "_results.json";

/// File-backed result cache.
#[derive(Debug, Clone)]
pub struct ResultCache {
    dir: PathBuf,
}

impl ResultCache {
    /// Creates a cache rooted at `dir`. The directory is created on first save.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the cache directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the path of the cached entry for `id`, if one exists.
    ///
    /// # Errors
    /// Returns [`DataError::InvalidArgument`] if `id` cannot be used as a file name.
    pub fn find(&self, id: &str) -> Result<Option<PathBuf>> {
        let path = self.entry_path(id)?;
        Ok(path.is_file().then_some(path))
    }

    /// Loads the cached payload for `id`.
    ///
    /// # Errors
    /// Returns an id validation, IO or JSON error. A corrupt entry is an error,
    /// not a miss.
    pub fn load(&self, id: &str) -> Result<Option<Value>> {
        let Some(path) = self.find(id)? else {
            debug!(id, "Result cache miss");
            return Ok(None);
        };

        let bytes = fs::read(&path).map_err(|e| DataError::io(&path, e))?;
        let payload = serde_json::from_slice(&bytes)?;
        debug!(id, path = %path.display(), "Result cache hit");

        Ok(Some(payload))
    }

    /// Saves `payload` under `id`.
    ///
    /// Returns `false` without touching the existing file when an entry is
    /// already present.
    ///
    /// # Errors
    /// Returns an id validation, IO or JSON error.
    pub fn save(&self, id: &str, payload: &Value) -> Result<bool> {
        let path = self.entry_path(id)?;

        if !self.dir.exists() {
            fs::create_dir_all(&self.dir).map_err(|e| DataError::io(&self.dir, e))?;
        }

        let file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                warn!(id, path = %path.display(), "Result already cached, not overwriting");
                return Ok(false);
            }
            Err(e) => return Err(DataError::io(&path, e)),
        };

        let mut writer = BufWriter::new(file);
        let mut serializer =
            serde_json::Serializer::with_formatter(&mut writer, PrettyFormatter::with_indent(b"    "));
        payload.serialize(&mut serializer)?;
        writer.flush().map_err(|e| DataError::io(&path, e))?;

        info!(id, path = %path.display(), "Cached calculation results");
        Ok(true)
    }

    fn entry_path(&self, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        Ok(self.dir.join(format!("{id}{FILE_SUFFIX}")))
    }
}

/// Checks that `id` is safe to embed in a file name.
///
/// # Errors
/// Returns [`DataError::InvalidArgument`] for empty, overlong, or
/// non `[A-Za-z0-9_-]` ids.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(DataError::InvalidArgument(
            "calculation id cannot be empty".to_string(),
        ));
    }

    if id.len() > MAX_ID_LEN {
        return Err(DataError::InvalidArgument(format!(
            "calculation id too long: {} characters (max {MAX_ID_LEN})",
            id.len()
        )));
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(DataError::InvalidArgument(format!(
            "calculation id contains invalid characters: {id}"
        )));
    }

    Ok(())
}
