//! Admission gate for uploaded artifacts.
//!
//! Decides whether an upload may become a job, looking at the declared
//! content type, the file extension and the sniffed binary signature.

use std::path::Path;
use thiserror::Error;

/// Extensions accepted for upload (lowercase, without the dot).
pub const ALLOWED_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "bmp", "tiff", "tif",
];

/// Reasons an upload is refused before any job exists.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("File too large: {size} bytes (max: {limit})")]
    PayloadTooLarge { size: u64, limit: u64 },

    #[error("File must be an image, got content type '{0}'")]
    UnsupportedType(String),

    #[error("Unsupported file extension: '{0}'")]
    UnsupportedExtension(String),

    #[error(
        "File content is not a recognized image (detected: {})",
        .detected.as_deref().unwrap_or("unknown")
    )]
    ContentMismatch { detected: Option<String> },
}

/// Validate an upload and return its normalized extension.
///
/// Checks run in order: size, declared content type, extension, content
/// signature. The signature check has the last word, so a mislabeled file
/// with an image content type and extension is still rejected.
pub fn validate(
    declared_content_type: &str,
    filename: &str,
    raw_bytes: &[u8],
    size_limit: u64,
) -> Result<String, AdmissionError> {
    let size = raw_bytes.len() as u64;
    if size > size_limit {
        return Err(AdmissionError::PayloadTooLarge {
            size,
            limit: size_limit,
        });
    }

    if !is_image_content_type(declared_content_type) {
        return Err(AdmissionError::UnsupportedType(
            declared_content_type.to_string(),
        ));
    }

    let extension = normalized_extension(filename)
        .filter(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
        .ok_or_else(|| AdmissionError::UnsupportedExtension(filename.to_string()))?;

    match infer::get(raw_bytes) {
        Some(kind) if kind.matcher_type() == infer::MatcherType::Image => Ok(extension),
        Some(kind) => Err(AdmissionError::ContentMismatch {
            detected: Some(kind.mime_type().to_string()),
        }),
        None => Err(AdmissionError::ContentMismatch { detected: None }),
    }
}

/// True when the media type (parameters stripped) belongs to the `image/*` family.
fn is_image_content_type(content_type: &str) -> bool {
    let media_type = content_type.split(';').next().unwrap_or("").trim();
    match media_type.split_once('/') {
        Some((kind, subtype)) => kind.eq_ignore_ascii_case("image") && !subtype.is_empty(),
        None => false,
    }
}

fn normalized_extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}
