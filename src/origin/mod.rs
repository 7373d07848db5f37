//! Media origin abstraction.
//!
//! A media origin keeps the actual video bytes and hands back durable URLs.
//! The catalogue only ever sees the `MediaRef` it returns. Two backends exist:
//! files under the media root served by our own backend (`local`), and the
//! Cloudinary media service (`cloudinary`).

pub mod cloudinary;
pub mod local;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::error::{CatalogError, CatalogResult};
use crate::metadata::MediaRef;

pub use cloudinary::CloudinaryOrigin;
pub use local::LocalOrigin;

/// Same ceiling the upload form has always enforced.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
    pub max_size_bytes: u64,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_size_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

/// Object listed by an origin, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginObject {
    pub external_id: String,
    pub url: String,
    pub bytes: u64,
}

#[async_trait]
pub trait MediaOrigin: Send + Sync {
    /// Short backend name used in logs and health output.
    fn name(&self) -> &'static str;

    /// Persists `bytes` and returns where they can be played from. Fails with
    /// `TooLarge` or `UnsupportedFormat` before anything is written.
    async fn store(&self, bytes: Vec<u8>, limits: &UploadLimits) -> CatalogResult<MediaRef>;

    /// Releases a stored object. Unknown ids are not an error.
    async fn remove(&self, external_id: &str) -> Result<()>;

    async fn ping(&self) -> Result<serde_json::Value>;

    async fn list(&self) -> Result<Vec<OriginObject>>;
}

/// Containers accepted for upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoContainer {
    Mp4,
    Mov,
    WebM,
    Matroska,
    Avi,
}

impl VideoContainer {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Mov => "mov",
            Self::WebM => "webm",
            Self::Matroska => "mkv",
            Self::Avi => "avi",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Mp4 => "video/mp4",
            Self::Mov => "video/quicktime",
            Self::WebM => "video/webm",
            Self::Matroska => "video/x-matroska",
            Self::Avi => "video/x-msvideo",
        }
    }
}

const EBML_MAGIC: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];
// The EBML header (with its DocType) sits at the very start of the file.
const EBML_HEADER_SCAN: usize = 64;

/// Identifies the container from its leading magic bytes. File names and
/// client-declared content types are not trusted.
pub fn sniff_container(bytes: &[u8]) -> Option<VideoContainer> {
    if bytes.len() >= 12 {
        match &bytes[4..8] {
            b"ftyp" => {
                return Some(if &bytes[8..12] == b"qt  " {
                    VideoContainer::Mov
                } else {
                    VideoContainer::Mp4
                });
            }
            // Pre-ftyp QuickTime files start directly with an atom.
            b"moov" | b"mdat" | b"wide" => return Some(VideoContainer::Mov),
            _ => {}
        }
        if &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"AVI " {
            return Some(VideoContainer::Avi);
        }
    }

    if bytes.starts_with(&EBML_MAGIC) {
        let header = &bytes[..bytes.len().min(EBML_HEADER_SCAN)];
        let is_webm = header.windows(4).any(|window| window == b"webm");
        return Some(if is_webm {
            VideoContainer::WebM
        } else {
            VideoContainer::Matroska
        });
    }

    None
}

/// Size and format gate shared by every origin.
pub fn check_upload(bytes: &[u8], limits: &UploadLimits) -> CatalogResult<VideoContainer> {
    let size = bytes.len() as u64;
    if size > limits.max_size_bytes {
        return Err(CatalogError::TooLarge {
            size,
            limit: limits.max_size_bytes,
        });
    }
    sniff_container(bytes).ok_or(CatalogError::UnsupportedFormat)
}

#[cfg(test)]
pub(crate) mod samples {
    /// Minimal headers for each accepted container.
    pub fn mp4() -> Vec<u8> {
        let mut bytes = vec![0, 0, 0, 0x18];
        bytes.extend_from_slice(b"ftypisom");
        bytes.extend_from_slice(&[0; 12]);
        bytes
    }

    pub fn mov() -> Vec<u8> {
        let mut bytes = vec![0, 0, 0, 0x14];
        bytes.extend_from_slice(b"ftypqt  ");
        bytes.extend_from_slice(&[0; 8]);
        bytes
    }

    pub fn webm() -> Vec<u8> {
        let mut bytes = vec![0x1A, 0x45, 0xDF, 0xA3, 0x9F, 0x42, 0x86, 0x81, 0x01, 0x42, 0x82, 0x84];
        bytes.extend_from_slice(b"webm");
        bytes.extend_from_slice(&[0; 8]);
        bytes
    }

    pub fn mkv() -> Vec<u8> {
        let mut bytes = vec![0x1A, 0x45, 0xDF, 0xA3, 0x9F, 0x42, 0x86, 0x81, 0x01, 0x42, 0x82, 0x88];
        bytes.extend_from_slice(b"matroska");
        bytes.extend_from_slice(&[0; 8]);
        bytes
    }

    pub fn avi() -> Vec<u8> {
        let mut bytes = b"RIFF".to_vec();
        bytes.extend_from_slice(&[0x10, 0, 0, 0]);
        bytes.extend_from_slice(b"AVI LIST");
        bytes.extend_from_slice(&[0; 8]);
        bytes
    }
}
