//! Untyped image strings from JSON requests.
//!
//! Clients may send a data URL, bare base64, or a path to a file that is
//! already in media storage. The string is classified once here; the core
//! only ever sees a typed [`ImageInput`].

use std::path::{Path, PathBuf};

use furrow_vector::ImageInput;

use crate::error::ApiError;

/// Bare base64 longer than this is assumed to be image data, not a path.
const BASE64_MIN_LEN: usize = 1000;

/// Base64 prefixes of the JPEG and PNG magic bytes.
const BASE64_SIGNATURES: [&str; 2] = ["/9j/", "iVBORw0KGgo"];

/// Classify an image string.
pub fn sniff_image_string(raw: &str) -> ImageInput {
    let value = raw.trim();

    if let Some(rest) = value.strip_prefix("data:image") {
        let payload = rest.split_once(',').map(|(_, data)| data).unwrap_or(rest);
        return ImageInput::Base64(payload.to_string());
    }

    if value.len() > BASE64_MIN_LEN || BASE64_SIGNATURES.iter().any(|sig| value.starts_with(sig)) {
        return ImageInput::Base64(value.to_string());
    }

    ImageInput::Path(PathBuf::from(value))
}

/// Resolve a client-supplied path against the media root, refusing anything
/// that lands outside it.
pub fn resolve_media_path(root: &Path, requested: &Path) -> Result<PathBuf, ApiError> {
    let root = root
        .canonicalize()
        .map_err(|e| ApiError::Internal(format!("media root: {}", e)))?;
    let relative = requested.strip_prefix("/media").unwrap_or(requested);
    let candidate = root.join(relative.strip_prefix("/").unwrap_or(relative));

    let resolved = candidate
        .canonicalize()
        .map_err(|_| ApiError::NotFound(format!("image {}", requested.display())))?;
    if !resolved.starts_with(&root) {
        return Err(ApiError::UnprocessableEntity(
            "image path must point into media storage".to_string(),
        ));
    }
    Ok(resolved)
}
