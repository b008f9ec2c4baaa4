// session.rs - Session state machine: selection -> analysis -> result/error.
//
// The controller is the single source of truth for the presentation layer.
// States are mutually exclusive:
//
//   Idle      no selection
//   Ready     selection + payload, nothing in flight, no outcome
//   Pending   one classification request in flight
//   Settled   a result or an error is present
//
// Every selection change bumps a generation counter. A request remembers the
// generation it started under and its outcome is dropped if the session has
// moved on by the time it resolves.

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::ai::{ClassificationResult, ClassifyError, WasteClassifier};
use crate::capture::{CameraSession, CaptureError, EncodedPayload, ImageOrigin, ImageSelection};
use crate::preview::{self, PreviewId, PreviewRegistry};

pub const NO_IMAGE_MESSAGE: &str = "Please select an image first.";
pub const ANALYSIS_FAILED_MESSAGE: &str = "Failed to analyze the image. Please try again.";

/// Upper bound on one analysis when the caller does not set one.
pub const DEFAULT_ANALYSIS_TIMEOUT: Duration = Duration::from_secs(60);

// ── Presentation types ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Ready,
    Pending,
    Settled,
}

/// What the UI needs to know about the current selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionDescriptor {
    pub name: String,
    pub mime_type: String,
    pub origin: ImageOrigin,
    pub size_bytes: usize,
    pub preview: PreviewId,
}

/// Snapshot of the session for rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub phase: Phase,
    pub selection: Option<SelectionDescriptor>,
    pub pending: bool,
    pub result: Option<ClassificationResult>,
    pub error: Option<String>,
}

/// How an `analyze` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyzeOutcome {
    /// The request resolved and its result or error is now shown.
    Settled,
    /// A request was already in flight; nothing was sent.
    AlreadyPending,
    /// Nothing selected; the session now shows `NO_IMAGE_MESSAGE`.
    NoImage,
    /// The selection changed while waiting; the response was discarded.
    Stale,
}

// ── Internal state ──────────────────────────────────────────────────────

struct Active {
    selection: ImageSelection,
    payload: EncodedPayload,
    preview: PreviewId,
}

enum Outcome {
    Result(ClassificationResult),
    Error(String),
}

enum SessionState {
    Idle,
    Ready(Active),
    Pending { active: Active, generation: u64 },
    Settled { active: Option<Active>, outcome: Outcome },
}

struct Inner {
    state: SessionState,
    previews: PreviewRegistry,
    generation: u64,
}

impl Inner {
    fn active(&self) -> Option<&Active> {
        match &self.state {
            SessionState::Idle => None,
            SessionState::Ready(active) | SessionState::Pending { active, .. } => Some(active),
            SessionState::Settled { active, .. } => active.as_ref(),
        }
    }

    /// Move to `state`, revoking the preview of the outgoing selection.
    fn replace_selection(&mut self, state: SessionState) {
        let old = std::mem::replace(&mut self.state, state);
        let old_active = match old {
            SessionState::Idle => None,
            SessionState::Ready(active) | SessionState::Pending { active, .. } => Some(active),
            SessionState::Settled { active, .. } => active,
        };
        if let Some(active) = old_active {
            self.previews.revoke(active.preview);
        }
        self.generation += 1;
    }
}

/// Held across the classifier await. Dropped while armed means the `analyze`
/// future was cancelled, and the session goes back to `Ready`.
struct PendingGuard<'a> {
    controller: &'a SessionController,
    generation: u64,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.controller.abandon(self.generation);
        }
    }
}

// ── SessionController ───────────────────────────────────────────────────

pub struct SessionController {
    classifier: Arc<dyn WasteClassifier>,
    analysis_timeout: Duration,
    inner: Mutex<Inner>,
}

impl SessionController {
    pub fn new(classifier: Arc<dyn WasteClassifier>) -> Self {
        Self {
            classifier,
            analysis_timeout: DEFAULT_ANALYSIS_TIMEOUT,
            inner: Mutex::new(Inner {
                state: SessionState::Idle,
                previews: PreviewRegistry::new(),
                generation: 0,
            }),
        }
    }

    /// Cap how long one analysis may stay pending.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.analysis_timeout = timeout;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the selection. Any result, error or in-flight request of the
    /// previous selection is invalidated.
    pub fn select_image(&self, selection: ImageSelection) {
        let payload = EncodedPayload::encode(&selection);
        let thumbnail = preview::render_thumbnail(&selection);
        let mut inner = self.lock();
        let preview = inner.previews.insert(thumbnail);
        log::info!(
            "Selected {} ({}, {} bytes, {:?})",
            selection.name(),
            selection.mime_type(),
            selection.len(),
            selection.origin()
        );
        inner.replace_selection(SessionState::Ready(Active {
            selection,
            payload,
            preview,
        }));
    }

    /// Capture a frame from an open camera session and select it. A successful
    /// capture closes the camera before the selection changes.
    pub fn select_from_camera(&self, camera: &mut CameraSession) -> Result<(), CaptureError> {
        let selection = camera.capture()?;
        self.select_image(selection);
        Ok(())
    }

    /// Drop the selection and everything derived from it. Allowed from any state.
    pub fn clear_selection(&self) {
        let mut inner = self.lock();
        if matches!(inner.state, SessionState::Pending { .. }) {
            log::warn!(
                "Selection cleared while a request is in flight; its response will be ignored"
            );
        }
        inner.replace_selection(SessionState::Idle);
        log::info!("Selection cleared");
    }

    /// Run one classification of the current selection.
    pub async fn analyze(&self) -> AnalyzeOutcome {
        let (generation, payload) = {
            let mut inner = self.lock();
            let state = std::mem::replace(&mut inner.state, SessionState::Idle);
            match state {
                SessionState::Pending { .. } => {
                    inner.state = state;
                    log::debug!("Analyze ignored: request already in flight");
                    return AnalyzeOutcome::AlreadyPending;
                }
                SessionState::Idle | SessionState::Settled { active: None, .. } => {
                    inner.state = SessionState::Settled {
                        active: None,
                        outcome: Outcome::Error(NO_IMAGE_MESSAGE.to_string()),
                    };
                    log::warn!("Analyze requested with no image selected");
                    return AnalyzeOutcome::NoImage;
                }
                SessionState::Ready(active)
                | SessionState::Settled {
                    active: Some(active),
                    ..
                } => {
                    let generation = inner.generation;
                    let payload = active.payload.clone();
                    inner.state = SessionState::Pending { active, generation };
                    (generation, payload)
                }
            }
        };
        let mut guard = PendingGuard {
            controller: self,
            generation,
            armed: true,
        };

        log::info!("Analyzing with {}", self.classifier.name());
        let result =
            match tokio::time::timeout(self.analysis_timeout, self.classifier.classify(&payload))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(ClassifyError::Timeout(self.analysis_timeout)),
            };

        guard.armed = false;
        self.finish(generation, result)
    }

    /// Undo a `Pending` whose `analyze` future went away before resolving.
    fn abandon(&self, generation: u64) {
        let mut inner = self.lock();
        let state = std::mem::replace(&mut inner.state, SessionState::Idle);
        inner.state = match state {
            SessionState::Pending { active, generation: g } if g == generation => {
                log::warn!("Analysis cancelled before it resolved; selection is ready again");
                SessionState::Ready(active)
            }
            other => other,
        };
    }

    fn finish(
        &self,
        generation: u64,
        result: Result<ClassificationResult, ClassifyError>,
    ) -> AnalyzeOutcome {
        let mut inner = self.lock();
        let current = matches!(
            inner.state,
            SessionState::Pending { generation: g, .. } if g == generation
        );
        if !current {
            log::info!("Discarding response for an abandoned selection");
            return AnalyzeOutcome::Stale;
        }

        let outcome = match result {
            Ok(result) => {
                log::info!("Classified as {} ({})", result.classification, result.object_name);
                Outcome::Result(result)
            }
            Err(e) => {
                log::error!("Error analyzing image with {}: {}", self.classifier.name(), e);
                Outcome::Error(ANALYSIS_FAILED_MESSAGE.to_string())
            }
        };

        let state = std::mem::replace(&mut inner.state, SessionState::Idle);
        if let SessionState::Pending { active, .. } = state {
            inner.state = SessionState::Settled {
                active: Some(active),
                outcome,
            };
        }
        AnalyzeOutcome::Settled
    }

    pub fn phase(&self) -> Phase {
        match &self.lock().state {
            SessionState::Idle => Phase::Idle,
            SessionState::Ready(_) => Phase::Ready,
            SessionState::Pending { .. } => Phase::Pending,
            SessionState::Settled { .. } => Phase::Settled,
        }
    }

    /// Encoded payload of the current selection, if any.
    pub fn payload(&self) -> Option<EncodedPayload> {
        self.lock().active().map(|a| a.payload.clone())
    }

    /// Number of preview resources currently allocated.
    pub fn live_previews(&self) -> usize {
        self.lock().previews.live_count()
    }

    pub fn view(&self) -> SessionView {
        let inner = self.lock();
        let selection = inner.active().map(|a| SelectionDescriptor {
            name: a.selection.name().to_string(),
            mime_type: a.selection.mime_type().to_string(),
            origin: a.selection.origin(),
            size_bytes: a.selection.len(),
            preview: a.preview,
        });

        let (phase, pending, result, error) = match &inner.state {
            SessionState::Idle => (Phase::Idle, false, None, None),
            SessionState::Ready(_) => (Phase::Ready, false, None, None),
            SessionState::Pending { .. } => (Phase::Pending, true, None, None),
            SessionState::Settled { outcome, .. } => match outcome {
                Outcome::Result(r) => (Phase::Settled, false, Some(r.clone()), None),
                Outcome::Error(e) => (Phase::Settled, false, None, Some(e.clone())),
            },
        };

        SessionView {
            phase,
            selection,
            pending,
            result,
            error,
        }
    }
}
