//! The image request controller.
//!
//! Holds the form inputs, the most recent image and the busy flag in a
//! single [`ControllerState`], and drives one submission at a time through an
//! [`ImageProvider`]. State changes are published on a `tokio::sync::watch`
//! channel so a UI can redraw on every transition.

use crate::error::SketchError;
use crate::image::{GeneratedImage, GenerationRequest, ImageProvider};
use crate::prompt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};

/// Which follow-up input the form offers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Variant {
    /// A modification field whose text is appended to the prompt on "modify".
    #[default]
    Modify,
    /// An exclusion field sent as the negative prompt on every request.
    Exclude,
}

/// The image currently on display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedImage {
    image: Arc<GeneratedImage>,
    generation: u64,
}

impl RenderedImage {
    /// The underlying image.
    pub fn image(&self) -> &GeneratedImage {
        &self.image
    }

    /// Raw response bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.image.data
    }

    /// Sequence number of the successful submission that produced this image.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// A `data:` URL suitable for an `<img src>` attribute.
    pub fn to_data_url(&self) -> String {
        self.image.to_data_url()
    }
}

/// Snapshot of everything the form displays.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerState {
    subject_description: String,
    modification_text: String,
    exclusion_text: String,
    image: Option<RenderedImage>,
    outstanding: u32,
    last_error: Option<String>,
    generations: u64,
    // Ticket of the newest admitted submission; only it may install a result.
    latest_ticket: u64,
    // Bumped by reset; results from an older session are dropped.
    session: u64,
}

impl ControllerState {
    /// The face description typed by the user.
    pub fn subject_description(&self) -> &str {
        &self.subject_description
    }

    /// Follow-up edit text.
    pub fn modification_text(&self) -> &str {
        &self.modification_text
    }

    /// Attributes to suppress.
    pub fn exclusion_text(&self) -> &str {
        &self.exclusion_text
    }

    /// The image from the latest successful submission, if any.
    pub fn image(&self) -> Option<&RenderedImage> {
        self.image.as_ref()
    }

    /// True while at least one submission is outstanding.
    pub fn is_in_flight(&self) -> bool {
        self.outstanding > 0
    }

    /// Display text of the most recent failure, cleared on the next submission.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Number of images rendered since the last reset.
    pub fn generations(&self) -> u64 {
        self.generations
    }

    /// Whether the "generate" button should be enabled.
    pub fn can_generate(&self) -> bool {
        !self.is_in_flight()
    }

    /// Whether the "modify" button should be enabled.
    pub fn can_modify(&self) -> bool {
        !self.is_in_flight() && self.image.is_some() && !self.modification_text.is_empty()
    }
}

/// How a submission settled.
#[derive(Debug)]
#[must_use]
pub enum SubmitOutcome {
    /// Precondition not met; nothing was sent and state is unchanged.
    Ignored,
    /// The provider returned an image, now held in state.
    Rendered(RenderedImage),
    /// The provider call failed; state holds no image.
    Failed(SketchError),
    /// The submission task was aborted, or the state was reset, before it
    /// settled.
    Cancelled,
    /// A newer submission started before this one settled, so its result
    /// was discarded.
    Superseded,
}

impl SubmitOutcome {
    /// Returns true if an image was rendered.
    pub fn is_rendered(&self) -> bool {
        matches!(self, Self::Rendered(_))
    }

    /// Returns the failure, if the submission failed.
    pub fn error(&self) -> Option<&SketchError> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Handle to a submission running as a tokio task.
#[derive(Debug)]
pub struct SubmitHandle {
    task: JoinHandle<SubmitOutcome>,
}

impl SubmitHandle {
    /// Aborts the submission. The busy flag is still cleared and any bytes
    /// received so far are dropped.
    pub fn cancel(&self) {
        self.task.abort();
    }

    /// Returns a handle that can abort the submission after this one is
    /// consumed by [`outcome`](Self::outcome).
    pub fn abort_handle(&self) -> AbortHandle {
        self.task.abort_handle()
    }

    /// Returns true once the submission has settled or been cancelled.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the submission to settle.
    pub async fn outcome(self) -> SubmitOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => {
                tracing::warn!("image submission cancelled");
                SubmitOutcome::Cancelled
            }
            Err(e) => std::panic::resume_unwind(e.into_panic()),
        }
    }
}

struct Inner {
    provider: Arc<dyn ImageProvider>,
    variant: Variant,
    state: watch::Sender<ControllerState>,
}

/// Owns the form state and submits generation requests.
///
/// Cloning is cheap; clones share state.
#[derive(Clone)]
pub struct ImageRequestController {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ImageRequestController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageRequestController")
            .field("provider", &self.inner.provider.name())
            .field("variant", &self.inner.variant)
            .field("state", &*self.inner.state.borrow())
            .finish()
    }
}

impl ImageRequestController {
    /// Creates a controller with empty inputs.
    pub fn new(provider: Arc<dyn ImageProvider>, variant: Variant) -> Self {
        let (state, _) = watch::channel(ControllerState::default());
        Self {
            inner: Arc::new(Inner {
                provider,
                variant,
                state,
            }),
        }
    }

    /// The form variant chosen at construction.
    pub fn variant(&self) -> Variant {
        self.inner.variant
    }

    /// Returns a snapshot of the current state.
    pub fn state(&self) -> ControllerState {
        self.inner.state.borrow().clone()
    }

    /// Subscribes to state changes.
    pub fn subscribe(&self) -> watch::Receiver<ControllerState> {
        self.inner.state.subscribe()
    }

    /// Sets the face description.
    pub fn set_subject_description(&self, text: impl Into<String>) {
        let text = text.into();
        self.inner.state.send_modify(|s| s.subject_description = text);
    }

    /// Sets the follow-up edit text.
    pub fn set_modification_text(&self, text: impl Into<String>) {
        let text = text.into();
        self.inner.state.send_modify(|s| s.modification_text = text);
    }

    /// Sets the attributes to suppress.
    pub fn set_exclusion_text(&self, text: impl Into<String>) {
        let text = text.into();
        self.inner.state.send_modify(|s| s.exclusion_text = text);
    }

    /// Restores every field to its initial value and drops the held image.
    /// A submission still in flight settles without touching the new state.
    pub fn reset(&self) {
        self.inner.state.send_modify(|s| {
            let session = s.session.wrapping_add(1);
            *s = ControllerState {
                session,
                ..ControllerState::default()
            };
        });
    }

    /// Builds the request `submit(is_modification)` would send right now.
    pub fn compose_request(&self, is_modification: bool) -> GenerationRequest {
        let state = self.inner.state.borrow();
        self.build_request(&state, self.effective_modification(is_modification))
    }

    fn effective_modification(&self, is_modification: bool) -> bool {
        is_modification && self.inner.variant == Variant::Modify
    }

    fn build_request(&self, state: &ControllerState, is_modification: bool) -> GenerationRequest {
        let modification = is_modification.then_some(state.modification_text.as_str());
        let request =
            GenerationRequest::new(prompt::final_prompt(&state.subject_description, modification));

        match self.inner.variant {
            Variant::Modify => request,
            Variant::Exclude => {
                request.with_negative_prompt(prompt::exclusion_clause(&state.exclusion_text))
            }
        }
    }

    /// Submits one generation request and waits for it to settle.
    ///
    /// A plain generation with an empty subject description is ignored. In
    /// every other case the busy flag is set, the old image is dropped, and
    /// the flag is cleared again once the provider answers, fails, or the
    /// future is dropped. When submissions overlap, the flag stays set until
    /// the last one settles and only the newest may install its result.
    /// Failures are logged and returned, never raised.
    pub async fn submit(&self, is_modification: bool) -> SubmitOutcome {
        let is_modification = self.effective_modification(is_modification);

        let Some((request, in_flight)) = self.admit(is_modification) else {
            tracing::debug!("empty subject description, submission ignored");
            return SubmitOutcome::Ignored;
        };
        let (session, ticket) = (in_flight.session, in_flight.ticket);

        tracing::debug!(
            provider = self.inner.provider.name(),
            modification = is_modification,
            prompt_len = request.prompt.len(),
            ticket,
            "submitting image request"
        );

        let image = match self.inner.provider.generate(&request).await {
            Ok(image) => image,
            Err(e) => {
                tracing::error!(
                    provider = self.inner.provider.name(),
                    error = %e,
                    "error generating image"
                );
                let message = e.to_string();
                self.inner.state.send_if_modified(|s| {
                    if s.session != session || s.latest_ticket != ticket {
                        return false;
                    }
                    s.last_error = Some(message);
                    true
                });
                return SubmitOutcome::Failed(e);
            }
        };

        let mut outcome = SubmitOutcome::Cancelled;
        self.inner.state.send_if_modified(|s| {
            if s.session != session {
                return false;
            }
            if s.latest_ticket != ticket {
                outcome = SubmitOutcome::Superseded;
                return false;
            }
            s.generations += 1;
            let rendered = RenderedImage {
                image: Arc::new(image),
                generation: s.generations,
            };
            s.image = Some(rendered.clone());
            outcome = SubmitOutcome::Rendered(rendered);
            true
        });

        match &outcome {
            SubmitOutcome::Rendered(image) => tracing::debug!(
                generation = image.generation(),
                size = image.bytes().len(),
                "image rendered"
            ),
            SubmitOutcome::Superseded => {
                tracing::debug!(ticket, "newer submission started, result discarded")
            }
            _ => tracing::debug!("state reset while in flight, result discarded"),
        }
        outcome
    }

    /// Checks the precondition, builds the request and raises the busy flag
    /// in a single state update.
    fn admit(&self, is_modification: bool) -> Option<(GenerationRequest, InFlight<'_>)> {
        let mut admitted = None;
        self.inner.state.send_if_modified(|s| {
            if !is_modification && s.subject_description.is_empty() {
                return false;
            }
            let request = self.build_request(s, is_modification);
            s.outstanding += 1;
            s.latest_ticket += 1;
            s.image = None;
            s.last_error = None;
            admitted = Some((request, s.session, s.latest_ticket));
            true
        });
        let (request, session, ticket) = admitted?;
        Some((
            request,
            InFlight {
                state: &self.inner.state,
                session,
                ticket,
            },
        ))
    }

    /// Runs [`submit`](Self::submit) on the tokio runtime.
    pub fn spawn_submit(&self, is_modification: bool) -> SubmitHandle {
        let controller = self.clone();
        SubmitHandle {
            task: tokio::spawn(async move { controller.submit(is_modification).await }),
        }
    }
}

/// One outstanding submission. Dropping it releases its share of the busy
/// flag, unless the state was reset in between.
struct InFlight<'a> {
    state: &'a watch::Sender<ControllerState>,
    session: u64,
    ticket: u64,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let session = self.session;
        self.state.send_if_modified(|s| {
            if s.session != session {
                return false;
            }
            s.outstanding = s.outstanding.saturating_sub(1);
            true
        });
    }
}
