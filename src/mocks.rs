use crate::errors::{CutoutError, Result};
use crate::fill::FillArtifacts;
use crate::mask_codec::{BoundingBox, MaskCandidateSet, StencilColor};
use crate::traits::{RemoteFillService, WorkerTransport};
use crate::worker::{Embedding, SegmentPayload, WorkerRequest, WorkerResponse};
use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const MOCK_CHANNEL_SIZE: usize = 64;

type Responder = Box<dyn Fn(&WorkerRequest) -> Vec<WorkerResponse> + Send + Sync>;

/// In-memory worker that records every request and optionally answers it.
pub struct MockWorker {
    requests: Mutex<Vec<WorkerRequest>>,
    sender: mpsc::Sender<WorkerResponse>,
    responder: Option<Responder>,
    failing: Mutex<bool>,
}

impl MockWorker {
    /// Never answers on its own; tests push responses with [`Self::respond`].
    pub fn new() -> (Self, mpsc::Receiver<WorkerResponse>) {
        Self::build(None)
    }

    /// Answers every request with whatever `responder` returns for it.
    pub fn with_responder<F>(responder: F) -> (Self, mpsc::Receiver<WorkerResponse>)
    where
        F: Fn(&WorkerRequest) -> Vec<WorkerResponse> + Send + Sync + 'static,
    {
        Self::build(Some(Box::new(responder)))
    }

    /// Worker that acknowledges `segment` with the start sentinel followed by
    /// a dummy embedding, and answers every `decode` with two candidates
    /// whose better one covers `selection` on a `width x height` grid.
    pub fn segmenter(
        width: u32,
        height: u32,
        selection: Option<BoundingBox>,
    ) -> (Self, mpsc::Receiver<WorkerResponse>) {
        Self::with_responder(move |request| match request {
            WorkerRequest::Segment { id, .. } => vec![
                WorkerResponse::SegmentResult {
                    id: *id,
                    data: SegmentPayload::Started,
                },
                WorkerResponse::SegmentResult {
                    id: *id,
                    data: SegmentPayload::Ready(Embedding(json!({ "dims": [1, 256, 64, 64] }))),
                },
            ],
            WorkerRequest::Decode { id, .. } => vec![WorkerResponse::DecodeResult {
                id: *id,
                data: candidates(width, height, selection),
            }],
        })
    }

    fn build(responder: Option<Responder>) -> (Self, mpsc::Receiver<WorkerResponse>) {
        let (sender, receiver) = mpsc::channel(MOCK_CHANNEL_SIZE);
        (
            Self {
                requests: Mutex::new(Vec::new()),
                sender,
                responder,
                failing: Mutex::new(false),
            },
            receiver,
        )
    }

    /// While set, every `send` fails as if the worker had gone away and
    /// nothing is recorded.
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    pub fn requests(&self) -> Vec<WorkerRequest> {
        self.requests.lock().clone()
    }

    pub fn last_request(&self) -> Option<WorkerRequest> {
        self.requests.lock().last().cloned()
    }

    pub async fn respond(&self, response: WorkerResponse) -> Result<()> {
        self.sender
            .send(response)
            .await
            .map_err(|e| CutoutError::Worker {
                operation: "deliver mock response".to_string(),
                source: Box::new(e),
            })
    }
}

#[async_trait]
impl WorkerTransport for MockWorker {
    async fn send(&self, request: WorkerRequest) -> Result<()> {
        if *self.failing.lock() {
            return Err(CutoutError::Worker {
                operation: format!("send {} request", request.kind()),
                source: "mock worker is down".into(),
            });
        }
        let responses = self
            .responder
            .as_ref()
            .map(|responder| responder(&request))
            .unwrap_or_default();
        self.requests.lock().push(request);

        for response in responses {
            self.respond(response).await?;
        }
        Ok(())
    }
}

/// Two interleaved candidates over `width x height`: candidate 0 (score
/// 0.25) is empty, candidate 1 (score 0.75) covers `selection`.
pub fn candidates(width: u32, height: u32, selection: Option<BoundingBox>) -> MaskCandidateSet {
    let data = (0..height)
        .flat_map(|y| (0..width).map(move |x| (x, y)))
        .flat_map(|(x, y)| {
            let set = selection.is_some_and(|bbox| bbox.contains(x, y));
            [0, u8::from(set)]
        })
        .collect();

    MaskCandidateSet {
        width,
        height,
        scores: vec![0.25, 0.75],
        data,
    }
}

#[derive(Debug, Clone)]
enum MockFillResponse {
    Solid(Rgba<u8>),
    Bytes(Vec<u8>),
    Status(u16),
}

/// Fill service double that records the artifacts it receives.
#[derive(Debug, Clone)]
pub struct MockFillService {
    response: MockFillResponse,
    composite: bool,
    pending: bool,
    stencil_color: StencilColor,
    calls: Arc<Mutex<Vec<FillArtifacts>>>,
}

impl MockFillService {
    /// Answers with a PNG of the working size filled with `color`.
    pub fn solid(color: Rgba<u8>) -> Self {
        Self::build(MockFillResponse::Solid(color))
    }

    /// Answers with fixed bytes.
    pub fn bytes(bytes: Vec<u8>) -> Self {
        Self::build(MockFillResponse::Bytes(bytes))
    }

    /// Fails with a transport error carrying `status`.
    pub fn failing(status: u16) -> Self {
        Self::build(MockFillResponse::Status(status))
    }

    /// Never answers.
    pub fn pending(mut self) -> Self {
        self.pending = true;
        self
    }

    pub fn with_composite(mut self, composite: bool) -> Self {
        self.composite = composite;
        self
    }

    pub fn with_stencil_color(mut self, color: StencilColor) -> Self {
        self.stencil_color = color;
        self
    }

    pub fn calls(&self) -> Vec<FillArtifacts> {
        self.calls.lock().clone()
    }

    fn build(response: MockFillResponse) -> Self {
        Self {
            response,
            composite: false,
            pending: false,
            stencil_color: StencilColor::White,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl RemoteFillService for MockFillService {
    fn name(&self) -> &str {
        "mock"
    }

    fn stencil_color(&self) -> StencilColor {
        self.stencil_color
    }

    fn wants_composite(&self) -> bool {
        self.composite
    }

    async fn fill(&self, artifacts: &FillArtifacts, cancel: &CancellationToken) -> Result<Vec<u8>> {
        self.calls.lock().push(artifacts.clone());

        if self.pending {
            cancel.cancelled().await;
            return Err(CutoutError::Cancelled {
                operation: "mock fill".to_string(),
            });
        }

        match &self.response {
            MockFillResponse::Solid(color) => {
                let (width, height) = artifacts.dimensions();
                crate::data_url::png_bytes(&RgbaImage::from_pixel(width, height, *color))
            }
            MockFillResponse::Bytes(bytes) => Ok(bytes.clone()),
            MockFillResponse::Status(status) => Err(CutoutError::transport(
                "mock fill",
                Some(*status),
                std::io::Error::other("mock failure"),
            )),
        }
    }
}
