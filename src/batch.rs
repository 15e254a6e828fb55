//! The batch text-extraction job: a sequential, resumable-progress run over
//! a selection of extracted images.
//!
//! ## Shape of a run
//!
//! [`run_batch`] validates the request up front (returning `Err` before any
//! side effect) and then hands back a **lazy, forward-only** stream of
//! [`ProgressEvent`]s. Nothing happens until the stream is polled; a
//! consumer that stops reading early simply orphans the run, and whatever
//! was already written stays on disk.
//!
//! The run itself is strictly sequential: one image at a time, in the
//! caller-given order, with no internal parallelism. Per image the stream
//! emits a Started event *before* the external call (the call may be slow;
//! this is what lets a consumer render progress while it happens), then
//! either writes the result silently or emits an error event and moves on.
//! One failing image never aborts the batch. A single terminal Complete
//! event always closes a run that got past session construction.
//!
//! There is no cancellation signal and no locking: the caller layer must
//! ensure only one run is in flight against a given store.

use crate::error::{GleanError, ItemError};
use crate::ocr::{ImagePayload, TextExtractor, TextExtractorFactory, DEFAULT_MODEL};
use crate::progress::ProgressEvent;
use crate::store::{is_safe_name, WorkingSetStore};
use futures::stream::{self, Stream};
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A boxed stream of batch progress events.
pub type EventStream = Pin<Box<dyn Stream<Item = ProgressEvent> + Send>>;

/// Inputs for one batch run. The credential is supplied explicitly on
/// every invocation; the job never reads ambient state and never persists
/// the key.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    /// Image names to process, in order. The order is preserved exactly.
    pub selection: Vec<String>,
    /// Free-text prompt passed to the model alongside each image.
    pub prompt: String,
    /// Model identifier; defaults to [`DEFAULT_MODEL`].
    pub model: String,
    /// Opaque API credential for the external capability.
    pub api_key: String,
}

impl BatchRequest {
    pub fn new(
        selection: Vec<String>,
        prompt: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            selection,
            prompt: prompt.into(),
            model: DEFAULT_MODEL.to_string(),
            api_key: api_key.into(),
        }
    }

    /// Override the model identifier.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn validate(&self) -> Result<(), GleanError> {
        if self.api_key.is_empty() || self.prompt.is_empty() {
            return Err(GleanError::InvalidRequest(
                "Please provide both API Key and Prompt.".into(),
            ));
        }
        if self.selection.is_empty() {
            return Err(GleanError::InvalidRequest("No images selected.".into()));
        }
        Ok(())
    }
}

/// Start a batch run over `request.selection`.
///
/// # Errors
/// Returns `Err(GleanError::InvalidRequest)` when the selection, prompt, or
/// credential is empty; in that case nothing has been written to disk.
/// All later failures surface inside the stream: session-construction
/// problems as a single terminal error event, per-image problems as item
/// error events.
pub fn run_batch(
    store: WorkingSetStore,
    factory: Arc<dyn TextExtractorFactory>,
    request: BatchRequest,
) -> Result<EventStream, GleanError> {
    request.validate()?;

    let total = request.selection.len();
    info!("Starting batch run over {total} images (model {})", request.model);

    let ctx = RunCtx {
        store,
        factory,
        request,
        total,
        extractor: None,
        success: 0,
    };

    let stream = stream::unfold((ctx, RunState::Init), |(mut ctx, mut state)| async move {
        loop {
            match state {
                RunState::Init => match ctx.init() {
                    Ok(()) => state = RunState::Scan(0),
                    Err(e) => {
                        return Some((ProgressEvent::fatal(&e.to_string()), (ctx, RunState::Done)))
                    }
                },
                RunState::Scan(from) => {
                    return match ctx.next_processable(from) {
                        Some(idx) => {
                            let name = &ctx.request.selection[idx];
                            let event = ProgressEvent::started(idx, ctx.total, name);
                            Some((event, (ctx, RunState::Call(idx))))
                        }
                        None => {
                            info!(
                                "Batch run complete: {}/{} images succeeded",
                                ctx.success, ctx.total
                            );
                            Some((ProgressEvent::completed(ctx.total), (ctx, RunState::Done)))
                        }
                    };
                }
                RunState::Call(idx) => {
                    let name = ctx.request.selection[idx].clone();
                    match ctx.process_one(&name).await {
                        Ok(()) => {
                            ctx.success += 1;
                            state = RunState::Scan(idx + 1);
                        }
                        Err(reason) => {
                            warn!("Image {name} failed: {reason}");
                            let event = ProgressEvent::item_failed(&name, &reason);
                            return Some((event, (ctx, RunState::Scan(idx + 1))));
                        }
                    }
                }
                RunState::Done => return None,
            }
        }
    });

    Ok(Box::pin(stream))
}

enum RunState {
    /// Construct the extractor session and truncate the merged artifact.
    Init,
    /// Find the next processable selection entry at or after this index.
    Scan(usize),
    /// The Started event for this index has been emitted; make the call.
    Call(usize),
    Done,
}

struct RunCtx {
    store: WorkingSetStore,
    factory: Arc<dyn TextExtractorFactory>,
    request: BatchRequest,
    total: usize,
    extractor: Option<Arc<dyn TextExtractor>>,
    success: usize,
}

impl RunCtx {
    /// Session construction plus the fresh-run invalidation of the merged
    /// artifact. A failure here ends the run without touching anything
    /// beyond what already succeeded.
    fn init(&mut self) -> Result<(), GleanError> {
        let extractor = self
            .factory
            .create(&self.request.api_key, &self.request.model)?;
        self.extractor = Some(extractor);
        self.store.reset_merged()
    }

    /// Index of the next selection entry that is both path-safe and present
    /// on disk. Unsafe and stale names are skipped silently, with no event.
    fn next_processable(&self, from: usize) -> Option<usize> {
        (from..self.total).find(|&i| {
            let name = &self.request.selection[i];
            if !is_safe_name(name) {
                warn!("Rejected unsafe selection entry: {name:?}");
                return false;
            }
            if !self.store.image_path(name).is_file() {
                debug!("Selection entry {name} no longer on disk, skipping");
                return false;
            }
            true
        })
    }

    /// One external call plus its artifact writes. On success the per-image
    /// text is overwritten and the text (plus separator) appended to the
    /// merged artifact; on failure neither is written.
    async fn process_one(&self, name: &str) -> Result<(), String> {
        let bytes = std::fs::read(self.store.image_path(name))
            .map_err(|e| ItemError::UnreadableImage(e.to_string()).to_string())?;
        let payload = ImagePayload::new(name, bytes);

        let extractor = self
            .extractor
            .as_ref()
            .ok_or_else(|| "extractor session not initialised".to_string())?;
        let text = extractor
            .extract_text(&self.request.prompt, &payload)
            .await
            .map_err(|e| e.to_string())?;

        self.store
            .write_text(name, &text)
            .and_then(|()| self.store.append_merged(&text))
            .map_err(|e| e.to_string())
    }
}
