use image::RgbaImage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cutout::{self, CutoutObject};
use crate::decode::{DecodeOutcome, PromptCheckpoint, PromptSession, Selection};
use crate::embedding::{EmbeddingSession, EmbeddingState, EmbeddingUpdate, ImageId};
use crate::errors::{CutoutError, Result};
use crate::fill::FillOrchestrator;
use crate::mask_codec::{render_overlay, OVERLAY_COLOR};
use crate::traits::{RemoteFillService, WorkerTransport};
use crate::worker::{PointPrompt, RequestId, RequestIdGenerator, WorkerRequest, WorkerResponse};

/// What a worker response changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorEvent {
    EmbeddingStarted,
    EmbeddingReady(ImageId),
    MaskReady(RequestId),
    /// Response for a request nobody waits for any more.
    Stale(RequestId),
}

/// One editing session: a background, the prompts placed on it and the
/// objects cut out of it so far.
///
/// Both sessions share the worker and one request id sequence. Responses
/// arrive on a single channel and are routed by their tag.
pub struct Editor<W> {
    transport: W,
    responses: mpsc::Receiver<WorkerResponse>,
    ids: RequestIdGenerator,
    background: Option<Arc<RgbaImage>>,
    embedding: EmbeddingSession,
    prompts: PromptSession,
    objects: Vec<CutoutObject>,
}

impl<W: WorkerTransport> Editor<W> {
    pub fn new(transport: W, responses: mpsc::Receiver<WorkerResponse>) -> Self {
        Self {
            transport,
            responses,
            ids: RequestIdGenerator::new(),
            background: None,
            embedding: EmbeddingSession::new(),
            prompts: PromptSession::new(),
            objects: Vec::new(),
        }
    }

    pub const fn transport(&self) -> &W {
        &self.transport
    }

    pub fn background(&self) -> Option<&RgbaImage> {
        self.background.as_deref()
    }

    pub fn objects(&self) -> &[CutoutObject] {
        &self.objects
    }

    pub fn prompts(&self) -> &[PointPrompt] {
        self.prompts.prompts()
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.prompts.selection()
    }

    pub const fn is_ready(&self) -> bool {
        self.embedding.is_ready()
    }

    /// Replaces the background. Prompts and the current selection are
    /// dropped and a new embedding is requested; results still in flight
    /// for the old image are ignored when they arrive.
    ///
    /// The session is left untouched if the `segment` request cannot be
    /// delivered.
    pub async fn set_background(&mut self, image: RgbaImage) -> Result<ImageId> {
        let (image_id, request) = self.embedding.prepare(&image, &self.ids)?;
        let id = request.id();
        self.transport.send(request).await?;

        self.embedding.begin(image_id, id);
        self.prompts.clear();
        self.background = Some(Arc::new(image));
        info!(?image_id, "background set");
        Ok(image_id)
    }

    /// Adds a prompt and requests a decode for the whole list.
    pub async fn add_point(&mut self, prompt: PointPrompt) -> Result<RequestId> {
        let background = self.ready_background()?;
        let checkpoint = self.prompts.checkpoint();
        let request = self.prompts.push(prompt, &background, &self.ids);
        self.dispatch(checkpoint, request)
            .await?
            .ok_or_else(|| CutoutError::protocol("add point", "no decode request issued"))
    }

    /// Removes the last prompt. Returns the id of the follow-up decode, or
    /// `None` when no prompt is left.
    pub async fn undo_point(&mut self) -> Result<Option<RequestId>> {
        let background = self.ready_background()?;
        let checkpoint = self.prompts.checkpoint();
        let request = self.prompts.undo(&background, &self.ids);
        self.dispatch(checkpoint, request).await
    }

    pub fn clear_points(&mut self) {
        self.prompts.clear();
    }

    pub fn handle_response(&mut self, response: WorkerResponse) -> Result<EditorEvent> {
        match response {
            WorkerResponse::SegmentResult { id, data } => Ok(match self.embedding.accept(id, data) {
                EmbeddingUpdate::Started => EditorEvent::EmbeddingStarted,
                EmbeddingUpdate::Ready(image) => EditorEvent::EmbeddingReady(image),
                EmbeddingUpdate::Stale => EditorEvent::Stale(id),
            }),
            WorkerResponse::DecodeResult { id, data } => {
                Ok(match self.prompts.accept(id, &data)? {
                    DecodeOutcome::Accepted(_) => EditorEvent::MaskReady(id),
                    DecodeOutcome::Stale => EditorEvent::Stale(id),
                })
            }
        }
    }

    /// Waits for the next worker response and applies it.
    pub async fn next_event(
        &mut self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<EditorEvent> {
        let response = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(CutoutError::Cancelled {
                    operation: "wait for worker".to_string(),
                })
            }
            response = tokio::time::timeout(timeout, self.responses.recv()) => response,
        };

        match response {
            Ok(Some(response)) => self.handle_response(response),
            Ok(None) => Err(CutoutError::Worker {
                operation: "receive worker response".to_string(),
                source: "worker channel closed".into(),
            }),
            Err(_) => Err(CutoutError::Timeout {
                operation: "wait for worker".to_string(),
                after: timeout,
            }),
        }
    }

    pub async fn wait_for_embedding(
        &mut self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ImageId> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.embedding.state() {
                EmbeddingState::Ready { image, .. } => return Ok(*image),
                EmbeddingState::Idle => return Err(CutoutError::DecodingUnavailable),
                EmbeddingState::Computing { .. } => {}
            }
            let remaining = remaining(deadline, "wait for embedding", timeout)?;
            if let EditorEvent::Stale(id) = self.next_event(remaining, cancel).await? {
                debug!(%id, "ignored while waiting for embedding");
            }
        }
    }

    /// Waits until the latest decode request has produced the selection.
    pub async fn wait_for_mask(
        &mut self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<&Selection> {
        let latest = self.prompts.latest().ok_or(CutoutError::NoSelection)?;
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.prompts.selection().is_some_and(|s| s.request == latest) {
                break;
            }
            let remaining = remaining(deadline, "wait for mask", timeout)?;
            self.next_event(remaining, cancel).await?;
        }
        self.prompts.selection().ok_or(CutoutError::NoSelection)
    }

    /// Coloured overlay of the current selection, for display.
    pub fn mask_overlay(&self) -> Option<RgbaImage> {
        self.prompts
            .selection()
            .map(|selection| render_overlay(&selection.mask, OVERLAY_COLOR))
    }

    /// Turns the current selection into an object. The cutout is taken from
    /// the background the decode was requested for, and the prompts are
    /// cleared.
    pub fn commit_selection(&mut self) -> Result<&CutoutObject> {
        let selection = self.prompts.selection().ok_or(CutoutError::NoSelection)?;
        let object = cutout::extract(&selection.source, &selection.mask)?;
        self.prompts.consume();
        Ok(self.push_object(object))
    }

    /// Erases the current selection from the background and starts over on
    /// the filled image.
    pub async fn erase_selection<S: RemoteFillService>(
        &mut self,
        orchestrator: &FillOrchestrator<S>,
        cancel: &CancellationToken,
    ) -> Result<ImageId> {
        let selection = self.prompts.selection().ok_or(CutoutError::NoSelection)?;
        let filled = orchestrator
            .remove(&selection.source, &selection.mask, cancel)
            .await?;
        self.set_background(filled).await
    }

    /// Moves the selection into an object layer and erases it from the
    /// background. Nothing changes unless the fill succeeds and the new
    /// background reaches the worker.
    pub async fn commit_and_erase<S: RemoteFillService>(
        &mut self,
        orchestrator: &FillOrchestrator<S>,
        cancel: &CancellationToken,
    ) -> Result<&CutoutObject> {
        let selection = self.prompts.selection().ok_or(CutoutError::NoSelection)?;
        let object = cutout::extract(&selection.source, &selection.mask)?;
        let filled = orchestrator
            .remove(&selection.source, &selection.mask, cancel)
            .await
            .inspect_err(|e| warn!(error = %e, "fill failed, keeping background"))?;

        self.set_background(filled).await?;
        Ok(self.push_object(object))
    }

    fn ready_background(&self) -> Result<Arc<RgbaImage>> {
        match &self.background {
            Some(background) if self.embedding.is_ready() => Ok(Arc::clone(background)),
            _ => Err(CutoutError::DecodingUnavailable),
        }
    }

    /// Sends a decode request. If it cannot be delivered the prompt list
    /// goes back to `checkpoint`.
    async fn dispatch(
        &mut self,
        checkpoint: PromptCheckpoint,
        request: Option<WorkerRequest>,
    ) -> Result<Option<RequestId>> {
        let Some(request) = request else {
            return Ok(None);
        };
        let id = request.id();
        if let Err(e) = self.transport.send(request).await {
            warn!(%id, error = %e, "decode request not delivered, prompts restored");
            self.prompts.rollback(checkpoint);
            return Err(e);
        }
        Ok(Some(id))
    }

    fn push_object(&mut self, object: CutoutObject) -> &CutoutObject {
        info!(bbox = ?object.bounding_box, "object placed");
        self.objects.push(object);
        &self.objects[self.objects.len() - 1]
    }
}

fn remaining(deadline: tokio::time::Instant, operation: &str, timeout: Duration) -> Result<Duration> {
    let now = tokio::time::Instant::now();
    if now >= deadline {
        return Err(CutoutError::Timeout {
            operation: operation.to_string(),
            after: timeout,
        });
    }
    Ok(deadline - now)
}
