use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{ImageFormat, ImageReader};
use sha2::{Digest, Sha256};

use crate::error::AnalysisError;

pub const SUPPORTED_FORMATS: [ImageFormat; 3] = [ImageFormat::Png, ImageFormat::Jpeg, ImageFormat::WebP];

/// A captured food photo. The bytes are uploaded exactly as captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    bytes: Arc<[u8]>,
    format: ImageFormat,
    dimensions: Option<(u32, u32)>,
}

impl ImagePayload {
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Result<Self, AnalysisError> {
        let bytes: Arc<[u8]> = bytes.into();
        if bytes.is_empty() {
            return Err(AnalysisError::InvalidImage("image is empty".to_string()));
        }
        let format = image::guess_format(&bytes).map_err(|_| {
            AnalysisError::InvalidImage("unrecognized image data (expected PNG, JPEG or WEBP)".to_string())
        })?;
        if !SUPPORTED_FORMATS.contains(&format) {
            return Err(AnalysisError::InvalidImage(format!(
                "unsupported image format {format:?} (expected PNG, JPEG or WEBP)"
            )));
        }
        // Header-only read; truncated or exotic files still upload.
        let dimensions = ImageReader::with_format(Cursor::new(&bytes[..]), format)
            .into_dimensions()
            .ok();
        Ok(Self {
            bytes,
            format,
            dimensions,
        })
    }

    pub fn from_path(path: &Path) -> Result<Self, AnalysisError> {
        let bytes = std::fs::read(path).map_err(|err| {
            AnalysisError::InvalidImage(format!("failed reading {}: {err}", path.display()))
        })?;
        Self::from_bytes(bytes)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn shared_bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }

    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn mime_type(&self) -> &'static str {
        mime_for_format(self.format)
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.dimensions
    }

    pub fn sha256_hex(&self) -> String {
        hex::encode(Sha256::digest(&self.bytes))
    }

    pub fn base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    pub fn ensure_within(&self, max_bytes: usize) -> Result<(), AnalysisError> {
        if self.bytes.len() > max_bytes {
            return Err(AnalysisError::InvalidImage(format!(
                "image is {} bytes; the limit is {max_bytes} bytes",
                self.bytes.len()
            )));
        }
        Ok(())
    }
}

fn mime_for_format(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "image/jpeg",
        ImageFormat::WebP => "image/webp",
        _ => "image/png",
    }
}
