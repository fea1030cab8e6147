//! On-disk media storage.
//!
//! Files live at `<root>/<visit_id>/<filename>` and are served under
//! `/media/<visit_id>/<filename>`.

use std::path::{Path, PathBuf};

use tracing::debug;

use furrow_core::error::FurrowError;
use furrow_core::types::media_uri;

/// A file written by [`MediaStore::save`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMedia {
    pub filename: String,
    pub path: PathBuf,
    pub uri: String,
}

/// Media file store rooted at a directory (normally `data_dir/media`).
#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    /// Create the store, creating the root directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, FurrowError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `bytes` to `<root>/<visit_id>/<filename>`, replacing any existing file.
    pub fn save(
        &self,
        visit_id: &str,
        filename: &str,
        bytes: &[u8],
    ) -> Result<StoredMedia, FurrowError> {
        let path = self.path_for(visit_id, filename)?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&path, bytes)?;
        debug!(visit_id, filename, bytes = bytes.len(), "Stored media file");

        Ok(StoredMedia {
            filename: filename.to_string(),
            uri: media_uri(visit_id, filename),
            path,
        })
    }

    /// Read a stored file.
    pub fn read(&self, visit_id: &str, filename: &str) -> Result<Vec<u8>, FurrowError> {
        let path = self.path_for(visit_id, filename)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(FurrowError::NotFound(
                format!("media {}/{}", visit_id, filename),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Filenames stored for a visit, sorted. A visit with no media yields an empty list.
    pub fn list(&self, visit_id: &str) -> Result<Vec<String>, FurrowError> {
        validate_component(visit_id, "visit_id")?;
        let dir = self.root.join(visit_id);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Resolve the on-disk path, rejecting components that could escape the root.
    pub fn path_for(&self, visit_id: &str, filename: &str) -> Result<PathBuf, FurrowError> {
        validate_component(visit_id, "visit_id")?;
        validate_component(filename, "filename")?;
        Ok(self.root.join(visit_id).join(filename))
    }
}

/// Replace path separators in a client-supplied filename, keeping the rest.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();
    match cleaned.trim() {
        "" | "." | ".." => "upload".to_string(),
        trimmed => trimmed.to_string(),
    }
}

fn validate_component(value: &str, what: &str) -> Result<(), FurrowError> {
    let invalid = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\', '\0']);
    if invalid {
        return Err(FurrowError::InvalidInput(format!(
            "invalid {}: {:?}",
            what, value
        )));
    }
    Ok(())
}
