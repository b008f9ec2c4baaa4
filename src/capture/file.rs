// file.rs - File-picker and drag-drop capture paths.
//
// No type filtering happens here beyond MIME detection: any readable, non-empty
// file becomes a selection. Unsupported formats are left for the classifier
// to reject.

use std::path::{Path, PathBuf};

use super::{CaptureError, ImageOrigin, ImageSelection};

/// Reads user-chosen files into [`ImageSelection`]s.
#[derive(Debug, Clone, Default)]
pub struct FileSource {
    /// Optional upper bound on file size in bytes. `None` accepts anything.
    max_image_bytes: Option<u64>,
}

impl FileSource {
    pub fn new(max_image_bytes: Option<u64>) -> Self {
        Self { max_image_bytes }
    }

    /// A file chosen through the file picker.
    pub async fn pick(&self, path: &Path) -> Result<ImageSelection, CaptureError> {
        self.read(path, ImageOrigin::FilePicker).await
    }

    /// Files dropped onto the drop zone. Only the first one is used.
    pub async fn drop_files(&self, paths: &[PathBuf]) -> Result<ImageSelection, CaptureError> {
        let first = paths.first().ok_or(CaptureError::NothingDropped)?;
        if paths.len() > 1 {
            log::info!("{} files dropped, using {}", paths.len(), first.display());
        }
        self.read(first, ImageOrigin::DragDrop).await
    }

    async fn read(&self, path: &Path, origin: ImageOrigin) -> Result<ImageSelection, CaptureError> {
        let read_err = |source| CaptureError::Read {
            path: path.display().to_string(),
            source,
        };

        if let Some(limit) = self.max_image_bytes {
            let size = tokio::fs::metadata(path).await.map_err(read_err)?.len();
            if size > limit {
                return Err(CaptureError::TooLarge { size, limit });
            }
        }

        let bytes = tokio::fs::read(path).await.map_err(read_err)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let mime = super::detect_mime(&name, &bytes);

        log::debug!("Read {} ({} bytes, {})", name, bytes.len(), mime);
        ImageSelection::new(bytes, mime, origin, name)
    }
}
