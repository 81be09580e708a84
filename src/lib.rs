pub mod config;
pub mod coords;
pub mod cutout;
pub mod data_url;
pub mod decode;
pub mod editor;
pub mod embedding;
pub mod errors;
pub mod fill;
pub mod mask_codec;
pub mod traits;
pub mod worker;

pub mod mocks;

pub use config::{Config, FillBackend};
pub use coords::{DisplayPoint, DisplayRect, DisplayScale, DisplaySize, NormalizedPoint, SourcePoint};
pub use cutout::{extract, CutoutObject};
pub use decode::{DecodeOutcome, PromptCheckpoint, PromptSession, Selection};
pub use editor::{Editor, EditorEvent};
pub use embedding::{EmbeddingSession, EmbeddingState, EmbeddingUpdate, ImageId};
pub use errors::{CutoutError, Result};
pub use fill::{FillArtifacts, FillConfig, FillOrchestrator, GradioFillService, InpaintFillService, RetryPolicy};
pub use mask_codec::{select_best_candidate, BestMask, BoundingBox, MaskCandidateSet, StencilColor};
pub use traits::*;
pub use worker::{
    Embedding, PointPrompt, PromptLabel, RequestId, RequestIdGenerator, SegmentPayload, StdioWorker,
    WorkerRequest, WorkerResponse,
};
