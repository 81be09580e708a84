use image::RgbaImage;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::errors::Result;
use crate::mask_codec::{select_best_candidate, BestMask, MaskCandidateSet};
use crate::worker::{PointPrompt, RequestId, RequestIdGenerator, WorkerRequest};

/// Best mask for the latest prompt set, with the background it was
/// requested for.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub mask: BestMask,
    /// Background snapshot taken when the decode was requested.
    pub source: Arc<RgbaImage>,
    pub request: RequestId,
}

#[derive(Debug)]
struct PendingDecode {
    source: Arc<RgbaImage>,
}

/// Prompt list and latest request as they were before a mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptCheckpoint {
    prompts: Vec<PointPrompt>,
    latest: Option<RequestId>,
}

#[derive(Debug, PartialEq)]
pub enum DecodeOutcome<'a> {
    Accepted(&'a Selection),
    Stale,
}

/// Ordered point prompts and the decode requests they produced.
///
/// Every change to the prompt list issues a new `decode` with the whole
/// list. Only the most recent request is authoritative; results for any
/// other id are dropped whatever order they arrive in.
#[derive(Debug, Default)]
pub struct PromptSession {
    prompts: Vec<PointPrompt>,
    latest: Option<RequestId>,
    pending: HashMap<RequestId, PendingDecode>,
    selection: Option<Selection>,
}

impl PromptSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        prompt: PointPrompt,
        source: &Arc<RgbaImage>,
        ids: &RequestIdGenerator,
    ) -> Option<WorkerRequest> {
        self.prompts.push(prompt);
        self.dispatch(source, ids)
    }

    /// Removes the last prompt. Does nothing when the list is already empty.
    pub fn undo(&mut self, source: &Arc<RgbaImage>, ids: &RequestIdGenerator) -> Option<WorkerRequest> {
        self.prompts.pop()?;
        self.dispatch(source, ids)
    }

    /// Forgets prompts, selection and every outstanding request.
    pub fn clear(&mut self) {
        self.prompts.clear();
        self.forget();
    }

    /// Hands out the current selection and starts over with an empty
    /// prompt list.
    pub fn consume(&mut self) -> Option<Selection> {
        let selection = self.selection.take();
        self.clear();
        selection
    }

    pub fn checkpoint(&self) -> PromptCheckpoint {
        PromptCheckpoint {
            prompts: self.prompts.clone(),
            latest: self.latest,
        }
    }

    /// Undoes a [`Self::push`] or [`Self::undo`] whose decode request never
    /// reached the worker. The request is forgotten and the prompt list
    /// goes back to `checkpoint`.
    pub fn rollback(&mut self, checkpoint: PromptCheckpoint) {
        if let Some(id) = self.latest.filter(|&id| Some(id) != checkpoint.latest) {
            self.pending.remove(&id);
            debug!(%id, "decode request withdrawn");
        }
        self.prompts = checkpoint.prompts;
        self.latest = checkpoint.latest;
    }

    pub fn accept(&mut self, id: RequestId, candidates: &MaskCandidateSet) -> Result<DecodeOutcome<'_>> {
        let pending = self.pending.remove(&id);
        let pending = match pending {
            Some(pending) if self.latest == Some(id) => pending,
            _ => {
                debug!(%id, latest = ?self.latest, "dropping stale decode result");
                return Ok(DecodeOutcome::Stale);
            }
        };
        self.pending.clear();

        let mask = select_best_candidate(candidates)?;
        debug!(%id, score = mask.score, pixels = mask.count_set(), "decode accepted");

        let selection = self.selection.insert(Selection {
            mask,
            source: pending.source,
            request: id,
        });
        Ok(DecodeOutcome::Accepted(selection))
    }

    pub fn prompts(&self) -> &[PointPrompt] {
        &self.prompts
    }

    pub const fn latest(&self) -> Option<RequestId> {
        self.latest
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn dispatch(&mut self, source: &Arc<RgbaImage>, ids: &RequestIdGenerator) -> Option<WorkerRequest> {
        if self.prompts.is_empty() {
            self.forget();
            return None;
        }

        let id = ids.next();
        self.pending.insert(
            id,
            PendingDecode {
                source: Arc::clone(source),
            },
        );
        self.latest = Some(id);
        debug!(%id, prompts = self.prompts.len(), "requesting decode");

        Some(WorkerRequest::Decode {
            id,
            data: self.prompts.clone(),
        })
    }

    fn forget(&mut self) {
        self.selection = None;
        self.latest = None;
        self.pending.clear();
    }
}
