use crate::coords::NormalizedPoint;
use crate::errors::{CutoutError, Result};
use crate::mask_codec::MaskCandidateSet;
use crate::traits::WorkerTransport;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

const RESPONSE_BUFFER: usize = 64;

/// Identifier attached to every command sent to the worker and echoed back
/// in its response. Ids grow monotonically across both sub-protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Default)]
pub struct RequestIdGenerator(AtomicU64);

impl RequestIdGenerator {
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn next(&self) -> RequestId {
        RequestId(self.0.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// Foreground (1) or background (0) click.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PromptLabel {
    Negative,
    Positive,
}

impl TryFrom<u8> for PromptLabel {
    type Error = CutoutError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Negative),
            1 => Ok(Self::Positive),
            other => Err(CutoutError::validation(
                "label",
                format!("must be 0 or 1, got {other}"),
            )),
        }
    }
}

impl From<PromptLabel> for u8 {
    fn from(label: PromptLabel) -> Self {
        match label {
            PromptLabel::Negative => 0,
            PromptLabel::Positive => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointPrompt {
    pub point: NormalizedPoint,
    pub label: PromptLabel,
}

impl PointPrompt {
    pub const fn positive(point: NormalizedPoint) -> Self {
        Self {
            point,
            label: PromptLabel::Positive,
        }
    }

    pub const fn negative(point: NormalizedPoint) -> Self {
        Self {
            point,
            label: PromptLabel::Negative,
        }
    }
}

/// Opaque per-image features computed by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding(pub serde_json::Value);

/// Body of a `segment_result`. The worker announces that it started with
/// the string `"start"` before it sends the real embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum SegmentPayload {
    Started,
    Ready(Embedding),
}

const START_SENTINEL: &str = "start";

impl From<serde_json::Value> for SegmentPayload {
    fn from(value: serde_json::Value) -> Self {
        if value.as_str() == Some(START_SENTINEL) {
            Self::Started
        } else {
            Self::Ready(Embedding(value))
        }
    }
}

impl From<SegmentPayload> for serde_json::Value {
    fn from(payload: SegmentPayload) -> Self {
        match payload {
            SegmentPayload::Started => serde_json::Value::from(START_SENTINEL),
            SegmentPayload::Ready(Embedding(value)) => value,
        }
    }
}

/// Commands sent to the worker. One JSON object per message, tagged by
/// `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerRequest {
    /// Compute the embedding of a background given as a data URL.
    Segment { id: RequestId, data: String },
    /// Decode candidate masks for the full prompt list.
    Decode {
        id: RequestId,
        data: Vec<PointPrompt>,
    },
}

impl WorkerRequest {
    pub const fn id(&self) -> RequestId {
        match self {
            Self::Segment { id, .. } | Self::Decode { id, .. } => *id,
        }
    }

    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Segment { .. } => "segment",
            Self::Decode { .. } => "decode",
        }
    }
}

/// Messages coming back from the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerResponse {
    SegmentResult {
        id: RequestId,
        data: SegmentPayload,
    },
    DecodeResult {
        id: RequestId,
        data: MaskCandidateSet,
    },
}

impl WorkerResponse {
    pub const fn id(&self) -> RequestId {
        match self {
            Self::SegmentResult { id, .. } | Self::DecodeResult { id, .. } => *id,
        }
    }
}

/// Worker running as a child process that reads requests as JSON lines on
/// stdin and writes responses as JSON lines on stdout.
pub struct StdioWorker {
    stdin: Mutex<ChildStdin>,
    child: Mutex<Child>,
    tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl StdioWorker {
    /// Starts `program` and returns the transport together with the stream
    /// of responses it produces.
    pub fn spawn(program: &str, args: &[String]) -> Result<(Self, mpsc::Receiver<WorkerResponse>)> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CutoutError::Worker {
                operation: format!("spawn `{program}`"),
                source: Box::new(e),
            })?;

        let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;

        let (sender, receiver) = mpsc::channel(RESPONSE_BUFFER);
        let tracker = TaskTracker::new();
        let cancellation_token = CancellationToken::new();
        tracker.spawn(read_responses(stdout, sender, cancellation_token.clone()));

        debug!(program, "worker started");

        Ok((
            Self {
                stdin: Mutex::new(stdin),
                child: Mutex::new(child),
                tracker,
                cancellation_token,
            },
            receiver,
        ))
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.cancellation_token.cancel();
        self.tracker.close();
        {
            let mut child = self.child.lock().await;
            if child.try_wait()?.is_none() {
                child.kill().await?;
            }
        }
        self.tracker.wait().await;
        Ok(())
    }
}

#[async_trait]
impl WorkerTransport for StdioWorker {
    async fn send(&self, request: WorkerRequest) -> Result<()> {
        let mut line = serde_json::to_vec(&request)?;
        line.push(b'\n');

        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(&line)
            .await
            .map_err(|e| CutoutError::Worker {
                operation: format!("send {} {}", request.kind(), request.id()),
                source: Box::new(e),
            })?;
        stdin.flush().await?;
        Ok(())
    }
}

async fn read_responses(
    stdout: ChildStdout,
    sender: mpsc::Sender<WorkerResponse>,
    cancellation_token: CancellationToken,
) {
    let mut lines = BufReader::new(stdout).lines();

    loop {
        let line = tokio::select! {
            _ = cancellation_token.cancelled() => break,
            line = lines.next_line() => line,
        };

        match line {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match serde_json::from_str::<WorkerResponse>(&line) {
                Ok(response) => {
                    if sender.send(response).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "skipping undecodable worker line"),
            },
            Ok(None) => {
                debug!("worker closed stdout");
                break;
            }
            Err(e) => {
                warn!(error = %e, "failed to read from worker");
                break;
            }
        }
    }
}

fn missing_pipe(name: &str) -> CutoutError {
    CutoutError::Worker {
        operation: format!("open worker {name}"),
        source: Box::new(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            format!("{name} was not captured"),
        )),
    }
}
