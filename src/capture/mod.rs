//! Capture sources for ecoscan.
//!
//! Three input modalities (file picker, drag-drop, live camera snapshot) all end
//! up as an [`ImageSelection`]: the raw bytes of one image plus its MIME type.
//! The [`encode`] module turns a selection into the base64 payload that is sent
//! to the classifier.
pub mod camera;
pub mod encode;
pub mod ffmpeg;
pub mod file;

use serde::Serialize;
use std::path::Path;

pub use camera::{
    CameraDevice, CameraSession, FacingMode, MediaStream, NoCamera, VideoConstraints,
};
pub use ffmpeg::FfmpegCamera;
pub use encode::EncodedPayload;
pub use file::FileSource;

/// MIME type used when neither the extension nor the content identifies the file.
pub const FALLBACK_MIME: &str = "application/octet-stream";

// ── Errors ──────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Could not read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Image payload is empty")]
    EmptyPayload,
    #[error("Nothing was dropped")]
    NothingDropped,
    #[error("Image is {size} bytes, limit is {limit} bytes")]
    TooLarge { size: u64, limit: u64 },
    #[error("Camera unavailable: {0}")]
    CameraUnavailable(String),
    #[error("Camera not supported on this device")]
    CameraUnsupported,
    #[error("Camera is not open")]
    CameraNotOpen,
    #[error("Could not encode captured frame: {0}")]
    FrameEncode(String),
}

// ── Image selection ─────────────────────────────────────────────────────

/// Where an [`ImageSelection`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImageOrigin {
    FilePicker,
    DragDrop,
    CameraCapture,
}

/// The user's chosen input image. Bytes are held in memory so the encoder
/// never has to go back to the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSelection {
    bytes: Vec<u8>,
    mime_type: String,
    origin: ImageOrigin,
    name: String,
}

impl ImageSelection {
    /// Build a selection. An empty MIME type falls back to detection from the
    /// name and bytes; an empty payload is rejected.
    pub fn new(
        bytes: Vec<u8>,
        mime_type: impl Into<String>,
        origin: ImageOrigin,
        name: impl Into<String>,
    ) -> Result<Self, CaptureError> {
        if bytes.is_empty() {
            return Err(CaptureError::EmptyPayload);
        }
        let name = name.into();
        let mut mime_type = mime_type.into();
        if mime_type.trim().is_empty() {
            mime_type = detect_mime(&name, &bytes);
        }
        Ok(Self {
            bytes,
            mime_type,
            origin,
            name,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn origin(&self) -> ImageOrigin {
        self.origin
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Work out a MIME type the way a browser file input would: extension first,
/// then the leading bytes, then a generic binary type. Never returns "".
pub fn detect_mime(name: &str, bytes: &[u8]) -> String {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    let by_ext = match ext.as_deref() {
        Some("jpg") | Some("jpeg") | Some("jfif") => Some("image/jpeg"),
        Some("png") => Some("image/png"),
        Some("webp") => Some("image/webp"),
        Some("gif") => Some("image/gif"),
        Some("bmp") => Some("image/bmp"),
        Some("tif") | Some("tiff") => Some("image/tiff"),
        Some("heic") => Some("image/heic"),
        Some("heif") => Some("image/heif"),
        Some("avif") => Some("image/avif"),
        Some("svg") => Some("image/svg+xml"),
        _ => None,
    };
    if let Some(mime) = by_ext {
        return mime.to_string();
    }

    match image::guess_format(bytes) {
        Ok(format) => format.to_mime_type().to_string(),
        Err(_) => FALLBACK_MIME.to_string(),
    }
}
