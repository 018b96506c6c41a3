//! Validation of uploaded images.
//!
//! An upload is accepted only when its size, declared media type, file-name
//! extension and content signature all agree on one allowed image kind.

use axum::extract::multipart::{Field, Multipart};
use image::ImageFormat;
use std::path::Path;

/// Multipart field carrying the image.
pub const IMAGE_FIELD: &str = "image";

/// Image kinds accepted for analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Webp,
}

impl ImageKind {
    pub fn from_media_type(media_type: &str) -> Option<Self> {
        let essence = media_type.split(';').next().unwrap_or("").trim();
        match essence.to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => Some(ImageKind::Jpeg),
            "image/png" => Some(ImageKind::Png),
            "image/webp" => Some(ImageKind::Webp),
            _ => None,
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(ImageKind::Jpeg),
            "png" => Some(ImageKind::Png),
            "webp" => Some(ImageKind::Webp),
            _ => None,
        }
    }

    pub fn from_file_name(name: &str) -> Option<Self> {
        Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    /// Sniff the kind from magic bytes.
    pub fn from_signature(bytes: &[u8]) -> Option<Self> {
        match image::guess_format(bytes).ok()? {
            ImageFormat::Jpeg => Some(ImageKind::Jpeg),
            ImageFormat::Png => Some(ImageKind::Png),
            ImageFormat::WebP => Some(ImageKind::Webp),
            _ => None,
        }
    }

    pub fn media_type(self) -> &'static str {
        match self {
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Png => "image/png",
            ImageKind::Webp => "image/webp",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ImageKind::Jpeg => "jpg",
            ImageKind::Png => "png",
            ImageKind::Webp => "webp",
        }
    }
}

/// A validated image upload.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub kind: ImageKind,
    pub file_name: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("File size must be less than {}MB", .max_bytes / (1024 * 1024))]
    TooLarge { max_bytes: usize },

    #[error("Only JPEG, PNG and WebP images are allowed")]
    UnsupportedType,

    #[error("File extension does not match the image type")]
    ExtensionMismatch,

    #[error("File content is not a valid JPEG, PNG or WebP image")]
    SignatureMismatch,

    #[error("No image file provided")]
    MissingImage,

    #[error("Invalid multipart body: {0}")]
    Malformed(String),
}

/// Check an upload in order: size, declared type, extension, signature.
pub fn validate_image(
    declared_type: Option<&str>,
    file_name: Option<&str>,
    bytes: &[u8],
    max_bytes: usize,
) -> Result<ImageKind, UploadError> {
    if bytes.len() > max_bytes {
        return Err(UploadError::TooLarge { max_bytes });
    }

    let kind = declared_type
        .and_then(ImageKind::from_media_type)
        .ok_or(UploadError::UnsupportedType)?;

    if let Some(name) = file_name.filter(|n| !n.is_empty()) {
        match ImageKind::from_file_name(name) {
            Some(ext_kind) if ext_kind == kind => {}
            Some(_) => return Err(UploadError::ExtensionMismatch),
            None => return Err(UploadError::UnsupportedType),
        }
    }

    if ImageKind::from_signature(bytes) != Some(kind) {
        return Err(UploadError::SignatureMismatch);
    }

    Ok(kind)
}

/// Pull the image field out of a multipart body and validate it.
///
/// Reading stops as soon as the field grows past `max_bytes`, so an
/// oversized upload is never buffered in full.
pub async fn read_image(multipart: &mut Multipart, max_bytes: usize) -> Result<ImageUpload, UploadError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| UploadError::Malformed(e.body_text()))?
    {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }

        let declared_type = field.content_type().map(str::to_string);
        let file_name = field.file_name().map(str::to_string);
        let bytes = read_capped(field, max_bytes).await?;
        let kind = validate_image(declared_type.as_deref(), file_name.as_deref(), &bytes, max_bytes)?;

        return Ok(ImageUpload {
            kind,
            file_name,
            bytes,
        });
    }

    Err(UploadError::MissingImage)
}

async fn read_capped(mut field: Field<'_>, max_bytes: usize) -> Result<Vec<u8>, UploadError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| UploadError::Malformed(e.body_text()))?
    {
        if bytes.len() + chunk.len() > max_bytes {
            return Err(UploadError::TooLarge { max_bytes });
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}
