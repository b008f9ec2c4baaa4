//! ecoscan: identify a waste item from a photo and learn how to dispose of it.
//!
//! Pipeline: a capture source yields an [`ImageSelection`], the encoder turns it
//! into an [`EncodedPayload`], a [`WasteClassifier`] sends it to the hosted model,
//! and the [`SessionController`] holds the resulting state for the UI.

pub mod ai;
pub mod capture;
pub mod preview;
pub mod session;
pub mod settings;

pub use ai::gemini::GeminiClient;
pub use ai::{ClassificationResult, ClassifyError, WasteCategory, WasteClassifier};
pub use capture::{
    CameraSession, CaptureError, EncodedPayload, FileSource, ImageOrigin, ImageSelection,
};
pub use session::{AnalyzeOutcome, Phase, SessionController, SessionView};
pub use settings::Settings;
