use async_trait::async_trait;

pub mod gemini;
pub mod types;
pub use types::*;

use crate::capture::EncodedPayload;

/// Trait for waste classification backends (Gemini, test doubles, ...).
/// One call per user-triggered analysis: no retries, no caching.
#[async_trait]
pub trait WasteClassifier: Send + Sync {
    /// Classify the image in `payload`. Implementations must return
    /// `ClassifyError::NoInput` for an empty payload without touching the network.
    async fn classify(
        &self,
        payload: &EncodedPayload,
    ) -> Result<ClassificationResult, ClassifyError>;

    /// Provider name for logging
    fn name(&self) -> &str;
}
