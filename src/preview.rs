//! Preview resources for the current selection.
//!
//! Each selection gets a small decoded thumbnail for display, addressed by a
//! [`PreviewId`] (rendered as `preview://<n>`, the counterpart of a browser
//! object URL). The registry is owned by the session controller, which revokes
//! the previous preview whenever the selection is replaced or cleared, so at
//! most one preview is alive per session.

use image::RgbaImage;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

use crate::capture::ImageSelection;

/// Thumbnails are bounded to this many pixels on the long side.
pub const THUMBNAIL_MAX_SIDE: u32 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub struct PreviewId(u64);

impl fmt::Display for PreviewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "preview://{}", self.0)
    }
}

impl From<PreviewId> for String {
    fn from(id: PreviewId) -> Self {
        id.to_string()
    }
}

#[derive(Debug, Default)]
pub struct PreviewRegistry {
    next_id: u64,
    /// `None` when the bytes could not be decoded (non-image upload).
    live: HashMap<PreviewId, Option<RgbaImage>>,
}

impl PreviewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a preview for `selection`. Undecodable input still gets an id.
    pub fn allocate(&mut self, selection: &ImageSelection) -> PreviewId {
        self.insert(render_thumbnail(selection))
    }

    /// Register an already rendered thumbnail.
    pub fn insert(&mut self, thumbnail: Option<RgbaImage>) -> PreviewId {
        self.next_id += 1;
        let id = PreviewId(self.next_id);
        self.live.insert(id, thumbnail);
        id
    }

    /// Free a preview. Returns false if it was already gone.
    pub fn revoke(&mut self, id: PreviewId) -> bool {
        self.live.remove(&id).is_some()
    }

    pub fn thumbnail(&self, id: PreviewId) -> Option<&RgbaImage> {
        self.live.get(&id).and_then(|t| t.as_ref())
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}

/// Decode and downscale `selection`. `None` for bytes that are not an image.
pub fn render_thumbnail(selection: &ImageSelection) -> Option<RgbaImage> {
    match image::load_from_memory(selection.bytes()) {
        Ok(img) => Some(img.thumbnail(THUMBNAIL_MAX_SIDE, THUMBNAIL_MAX_SIDE).to_rgba8()),
        Err(e) => {
            log::debug!("No preview for {}: {}", selection.name(), e);
            None
        }
    }
}
