use serde::{Deserialize, Serialize};

use crate::errors::{CutoutError, Result};
use crate::mask_codec::{check_len, BestMask};

/// Candidate masks returned by one decode call.
///
/// The labels of all candidates are interleaved: `data[scores.len() * i + k]`
/// is pixel `i` under candidate `k`. On the wire this is the worker's
/// `{ mask: { width, height, data }, scores }` shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "DecodeResultWire", into = "DecodeResultWire")]
pub struct MaskCandidateSet {
    pub width: u32,
    pub height: u32,
    pub scores: Vec<f32>,
    pub data: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct DecodeResultWire {
    mask: MaskWire,
    scores: Vec<f32>,
}

#[derive(Serialize, Deserialize)]
struct MaskWire {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl From<DecodeResultWire> for MaskCandidateSet {
    fn from(wire: DecodeResultWire) -> Self {
        Self {
            width: wire.mask.width,
            height: wire.mask.height,
            scores: wire.scores,
            data: wire.mask.data,
        }
    }
}

impl From<MaskCandidateSet> for DecodeResultWire {
    fn from(set: MaskCandidateSet) -> Self {
        Self {
            mask: MaskWire {
                width: set.width,
                height: set.height,
                data: set.data,
            },
            scores: set.scores,
        }
    }
}

impl MaskCandidateSet {
    pub fn validate(&self) -> Result<()> {
        if self.scores.is_empty() {
            return Err(CutoutError::InvalidMask {
                reason: "no candidates".to_string(),
            });
        }
        check_len(
            "candidate data",
            self.data.len(),
            self.width,
            self.height,
            self.scores.len(),
        )
    }
}

/// Picks the candidate with the highest score and deinterleaves its labels.
///
/// Ties go to the lowest index. Only a strictly greater score replaces the
/// current best, so a NaN never wins.
pub fn select_best_candidate(candidates: &MaskCandidateSet) -> Result<BestMask> {
    candidates.validate()?;

    let (best_index, best_score) = candidates
        .scores
        .iter()
        .copied()
        .enumerate()
        .skip(1)
        .fold((0, candidates.scores[0]), |(index, score), (i, s)| {
            if s > score {
                (i, s)
            } else {
                (index, score)
            }
        });

    let data = candidates
        .data
        .iter()
        .skip(best_index)
        .step_by(candidates.scores.len())
        .copied()
        .collect();

    BestMask::new(data, candidates.width, candidates.height, best_score)
}
