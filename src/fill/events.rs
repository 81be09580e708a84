//! Server-sent event parsing for the fill job status stream, and the state
//! machine of one fill job.

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::errors::{CutoutError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FillEventKind {
    Generating,
    Complete,
    Error,
    Heartbeat,
    Other(String),
}

impl FillEventKind {
    fn from_name(name: &str) -> Self {
        match name {
            "generating" | "progress" | "process_generating" => Self::Generating,
            "complete" | "process_completed" => Self::Complete,
            "error" => Self::Error,
            "heartbeat" => Self::Heartbeat,
            other => Self::Other(other.to_string()),
        }
    }
}

/// One dispatched event. `data` is the JSON carried by its `data:` lines.
#[derive(Debug, Clone, PartialEq)]
pub struct FillEvent {
    pub kind: FillEventKind,
    pub data: Option<Value>,
}

/// Incremental `text/event-stream` parser.
///
/// Chunks may split lines (and UTF-8 sequences) anywhere. Lines are only
/// interpreted once their terminating newline has arrived, and an event is
/// dispatched on the blank line that ends it.
#[derive(Debug, Default)]
pub struct EventStreamParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl EventStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<FillEvent>> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(end) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = self.line(line.trim_end_matches(['\n', '\r']))? {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Flushes a trailing line without newline and any undispatched event.
    pub fn finish(mut self) -> Result<Option<FillEvent>> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest);
            if let Some(event) = self.line(line.trim_end_matches('\r'))? {
                return Ok(Some(event));
            }
        }
        self.dispatch()
    }

    fn line(&mut self, line: &str) -> Result<Option<FillEvent>> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return Ok(None);
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        Ok(None)
    }

    fn dispatch(&mut self) -> Result<Option<FillEvent>> {
        let name = self.event.take();
        let data = std::mem::take(&mut self.data);
        if name.is_none() && data.is_empty() {
            return Ok(None);
        }

        let kind = FillEventKind::from_name(name.as_deref().unwrap_or("message"));
        let data = if data.is_empty() {
            None
        } else {
            let joined = data.join("\n");
            let value = serde_json::from_str(&joined).map_err(|e| {
                CutoutError::protocol("parse event data", format!("{e}: {joined}"))
            })?;
            Some(value)
        };
        Ok(Some(FillEvent { kind, data }))
    }
}

/// File uploaded to the fill service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    /// Server-side path returned by the upload.
    pub path: String,
    /// Directly fetchable URL of the file.
    pub url: String,
}

impl FileHandle {
    /// Reference to the file inside a job submission.
    pub fn to_payload(&self) -> Value {
        json!({
            "path": self.path,
            "url": self.url,
            "meta": { "_type": "gradio.FileData" }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillJobState {
    Submitted,
    Polling,
    Completed,
    Failed,
}

/// One in-flight fill call. Dropped once the result has been fetched.
#[derive(Debug, Clone)]
pub struct FillJob {
    pub event_id: String,
    pub handles: Vec<FileHandle>,
    state: FillJobState,
    last_payload: Option<Value>,
}

impl FillJob {
    pub fn new(event_id: impl Into<String>, handles: Vec<FileHandle>) -> Self {
        Self {
            event_id: event_id.into(),
            handles,
            state: FillJobState::Submitted,
            last_payload: None,
        }
    }

    pub const fn state(&self) -> FillJobState {
        self.state
    }

    pub const fn last_payload(&self) -> Option<&Value> {
        self.last_payload.as_ref()
    }

    /// Feeds one event into the job. Returns `true` once the job is done.
    pub fn observe(&mut self, event: FillEvent) -> Result<bool> {
        match self.state {
            FillJobState::Completed => return Ok(true),
            FillJobState::Failed => {
                return Err(CutoutError::protocol("poll fill job", "job already failed"))
            }
            FillJobState::Submitted => self.state = FillJobState::Polling,
            FillJobState::Polling => {}
        }

        match event.kind {
            FillEventKind::Heartbeat => Ok(false),
            FillEventKind::Error => {
                self.state = FillJobState::Failed;
                let details = match event.data {
                    Some(Value::String(message)) => message,
                    Some(Value::Null) | None => "no details".to_string(),
                    Some(other) => other.to_string(),
                };
                Err(CutoutError::protocol(
                    "poll fill job",
                    format!("service reported an error: {details}"),
                ))
            }
            FillEventKind::Complete => {
                self.remember(event.data);
                self.state = FillJobState::Completed;
                debug!(event_id = %self.event_id, "fill job complete");
                Ok(true)
            }
            FillEventKind::Generating | FillEventKind::Other(_) => {
                self.remember(event.data);
                Ok(false)
            }
        }
    }

    /// The stream closed. A job that never completed still succeeds when
    /// some payload was seen, since that payload is the last known result.
    pub fn end_of_stream(&mut self) -> Result<()> {
        match self.state {
            FillJobState::Completed => Ok(()),
            _ if self.last_payload.is_some() => {
                warn!(event_id = %self.event_id, "event stream ended without completion, using last payload");
                self.state = FillJobState::Completed;
                Ok(())
            }
            _ => {
                self.state = FillJobState::Failed;
                Err(CutoutError::protocol(
                    "poll fill job",
                    "event stream ended without any payload",
                ))
            }
        }
    }

    pub fn result_url(&self) -> Result<String> {
        let payload = self
            .last_payload
            .as_ref()
            .ok_or_else(|| CutoutError::protocol("read fill result", "no payload received"))?;
        extract_result_url(payload)
    }

    fn remember(&mut self, data: Option<Value>) {
        if let Some(data) = data.filter(|d| !d.is_null()) {
            self.last_payload = Some(data);
        }
    }
}

/// URL of the filled image: the `url` of the payload's second element, with
/// `/call/file` rewritten to the directly fetchable `/file`.
pub fn extract_result_url(payload: &Value) -> Result<String> {
    let url = payload
        .get(1)
        .and_then(|output| output.get("url"))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            CutoutError::protocol("read fill result", format!("no result url in {payload}"))
        })?;
    Ok(url.replacen("/call/file", "/file", 1))
}
