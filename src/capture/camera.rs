// camera.rs - Live camera capture session.
//
// The platform camera is reached through two seams: `CameraDevice` opens a
// stream for a set of constraints, `MediaStream` hands out frames and owns the
// hardware tracks. `CameraSession` drives the open -> capture/close lifecycle
// and guarantees the stream is stopped exactly once on every exit path.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::RgbaImage;

use super::{CaptureError, ImageOrigin, ImageSelection};
use crate::settings::Settings;

pub const CAMERA_ACCESS_MESSAGE: &str = "Could not access camera. Please check your permissions.";
pub const CAMERA_UNSUPPORTED_MESSAGE: &str = "Camera not supported on this device.";

// ── Platform seams ──────────────────────────────────────────────────────

/// Which way the requested camera should face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacingMode {
    /// Rear camera, pointing away from the user.
    Environment,
    /// Front camera.
    User,
}

/// Constraints passed to [`CameraDevice::open`]. `facing_mode: None` means
/// any available video device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VideoConstraints {
    pub facing_mode: Option<FacingMode>,
}

impl VideoConstraints {
    pub fn rear() -> Self {
        Self {
            facing_mode: Some(FacingMode::Environment),
        }
    }

    pub fn any() -> Self {
        Self::default()
    }
}

/// A live video stream.
pub trait MediaStream: Send {
    /// Rasterize the current frame at the stream's native resolution.
    fn grab_frame(&mut self) -> Result<RgbaImage, CaptureError>;

    /// Stop every hardware track of this stream.
    fn stop_tracks(&mut self);

    /// Number of tracks still running.
    fn active_tracks(&self) -> usize;
}

/// Host camera API.
#[async_trait]
pub trait CameraDevice: Send + Sync {
    async fn open(
        &self,
        constraints: VideoConstraints,
    ) -> Result<Box<dyn MediaStream>, CaptureError>;

    /// Whether this host has any camera API at all.
    fn is_supported(&self) -> bool {
        true
    }
}

/// Host without a camera backend. Every open is refused.
pub struct NoCamera;

#[async_trait]
impl CameraDevice for NoCamera {
    async fn open(&self, _: VideoConstraints) -> Result<Box<dyn MediaStream>, CaptureError> {
        Err(CaptureError::CameraUnsupported)
    }

    fn is_supported(&self) -> bool {
        false
    }
}

// ── CameraSession ───────────────────────────────────────────────────────

/// The capture overlay and the stream behind it.
///
/// * At most one stream is held at a time; opening again releases the old one.
/// * The overlay can be open without a stream, in which case `error()` says why.
/// * `close`, a successful `capture` and `Drop` all release the stream.
///   Releasing twice is a no-op.
pub struct CameraSession {
    device: Arc<dyn CameraDevice>,
    stream: Option<Box<dyn MediaStream>>,
    is_open: bool,
    error: Option<String>,
    jpeg_quality: u8,
}

impl CameraSession {
    pub fn new(device: Arc<dyn CameraDevice>, jpeg_quality: u8) -> Self {
        Self {
            device,
            stream: None,
            is_open: false,
            error: None,
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    /// Session using the configured JPEG quality.
    pub fn from_settings(device: Arc<dyn CameraDevice>, settings: &Settings) -> Self {
        Self::new(device, settings.jpeg_quality)
    }

    /// Open the overlay and try to start a stream, rear camera first.
    ///
    /// Failure is not returned: the overlay opens anyway and carries the error
    /// message so it can be shown in place of the video.
    pub async fn open(&mut self) {
        self.release_stream();
        self.error = None;
        self.is_open = true;

        if !self.device.is_supported() {
            log::warn!("Camera API not available on this host");
            self.error = Some(CAMERA_UNSUPPORTED_MESSAGE.to_string());
            return;
        }

        match self.device.open(VideoConstraints::rear()).await {
            Ok(stream) => {
                log::info!("Camera opened (rear-facing)");
                self.stream = Some(stream);
            }
            Err(e) => {
                log::warn!("Rear camera unavailable ({}), trying any camera", e);
                match self.device.open(VideoConstraints::any()).await {
                    Ok(stream) => {
                        log::info!("Camera opened (default device)");
                        self.stream = Some(stream);
                    }
                    Err(e) => {
                        log::error!("Could not open any camera: {}", e);
                        self.error = Some(CAMERA_ACCESS_MESSAGE.to_string());
                    }
                }
            }
        }
    }

    /// Grab one still frame, close the session, and return the frame as a JPEG
    /// selection named `capture-<unix millis>.jpg`.
    pub fn capture(&mut self) -> Result<ImageSelection, CaptureError> {
        if !self.is_open {
            return Err(CaptureError::CameraNotOpen);
        }
        let stream = match self.stream.as_mut() {
            Some(s) => s,
            None => {
                let reason = self
                    .error
                    .clone()
                    .unwrap_or_else(|| CAMERA_ACCESS_MESSAGE.to_string());
                return Err(CaptureError::CameraUnavailable(reason));
            }
        };

        let frame = stream.grab_frame()?;
        // Hardware goes off before the image is handed on.
        self.close();

        let jpeg = encode_jpeg(&frame, self.jpeg_quality)?;
        log::info!(
            "Captured {}x{} frame ({} bytes JPEG)",
            frame.width(),
            frame.height(),
            jpeg.len()
        );
        ImageSelection::new(jpeg, "image/jpeg", ImageOrigin::CameraCapture, capture_file_name())
    }

    /// Close the overlay and release the stream.
    pub fn close(&mut self) {
        self.release_stream();
        self.is_open = false;
        self.error = None;
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    /// Message to show in the overlay when no stream could be started.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Whether a live stream is currently held.
    pub fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }

    fn release_stream(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop_tracks();
            match stream.active_tracks() {
                0 => log::info!("Camera stream released"),
                n => log::warn!("Camera stream released with {} tracks still running", n),
            }
        }
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.release_stream();
    }
}

// ── Internal helpers ────────────────────────────────────────────────────

/// JPEG-encode an RGBA frame. Alpha is dropped.
fn encode_jpeg(frame: &RgbaImage, quality: u8) -> Result<Vec<u8>, CaptureError> {
    let (w, h) = frame.dimensions();
    if w == 0 || h == 0 {
        return Err(CaptureError::FrameEncode(format!("empty frame ({}x{})", w, h)));
    }
    let rgb = image::DynamicImage::ImageRgba8(frame.clone()).to_rgb8();

    let mut jpeg_buf: Vec<u8> = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg_buf, quality)
        .encode(rgb.as_raw(), w, h, image::ExtendedColorType::Rgb8)
        .map_err(|e| CaptureError::FrameEncode(e.to_string()))?;
    Ok(jpeg_buf)
}

fn capture_file_name() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    format!("capture-{}.jpg", millis)
}
