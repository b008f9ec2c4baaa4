// encode.rs - Turns a selection into the transport payload (base64 + MIME).

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Serialize;

use super::ImageSelection;

/// Transport-ready form of an [`ImageSelection`].
///
/// Always derived from the current selection; the session controller
/// regenerates it whenever the selection changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedPayload {
    /// Base64 (standard alphabet, padded) image bytes.
    pub data: String,
    pub mime_type: String,
}

impl EncodedPayload {
    /// Encode the selection's bytes. The bytes are already in memory, so this
    /// cannot fail; read failures surface earlier, in the capture source.
    pub fn encode(selection: &ImageSelection) -> Self {
        let data = BASE64.encode(selection.bytes());
        log::debug!(
            "Encoded {} ({} bytes -> {} base64 chars)",
            selection.name(),
            selection.len(),
            data.len()
        );
        Self {
            data,
            mime_type: selection.mime_type().to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
