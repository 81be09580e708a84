use std::time::Duration;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Structured error types for the cutout pipeline.
///
/// # Why structured errors
///
/// The pipeline crosses three very different boundaries (the segmentation
/// worker, per-pixel image code and a remote fill service). Each variant
/// keeps the context of its boundary so the caller can tell a retryable
/// network hiccup from a fatal protocol violation or an empty selection
/// without parsing strings.
#[derive(Error, Debug)]
pub enum CutoutError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Image processing error: {operation} failed")]
    ImageProcessing {
        operation: String,
        #[source]
        source: BoxError,
    },

    #[error("Invalid mask: {reason}")]
    InvalidMask { reason: String },

    #[error("No selection: the mask does not cover any pixel")]
    NoSelection,

    #[error("Decoding unavailable: the image embedding is not ready")]
    DecodingUnavailable,

    #[error("Worker error: {operation} failed")]
    Worker {
        operation: String,
        #[source]
        source: BoxError,
    },

    #[error("Transport error: {operation} failed{}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Transport {
        operation: String,
        status: Option<u16>,
        #[source]
        source: BoxError,
    },

    #[error("Protocol error: {operation}: {reason}")]
    Protocol { operation: String, reason: String },

    #[error("Cancelled: {operation}")]
    Cancelled { operation: String },

    #[error("Timeout: {operation} did not finish within {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("Validation error: {field} {reason}")]
    Validation { field: String, reason: String },
}

pub type Result<T> = std::result::Result<T, CutoutError>;

impl CutoutError {
    pub fn protocol(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Protocol {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn transport(
        operation: impl Into<String>,
        status: Option<u16>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Transport {
            operation: operation.into(),
            status,
            source: source.into(),
        }
    }

    /// Whether a retry of the same request may succeed.
    ///
    /// Only transport failures qualify: connection errors, 5xx and 429.
    /// A 4xx means the request itself is wrong and protocol errors are fatal
    /// for the job.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { status: None, .. } => true,
            Self::Transport {
                status: Some(status),
                ..
            } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Convert I/O errors to worker errors.
///
/// # Why worker category
///
/// The only I/O the library does on its own is talking to the worker
/// process over stdio. Code with a more specific context should construct
/// the variant directly.
impl From<std::io::Error> for CutoutError {
    fn from(err: std::io::Error) -> Self {
        Self::Worker {
            operation: "worker i/o".to_string(),
            source: Box::new(err),
        }
    }
}

/// Convert image crate errors to image processing errors.
impl From<image::ImageError> for CutoutError {
    fn from(err: image::ImageError) -> Self {
        Self::ImageProcessing {
            operation: "image processing".to_string(),
            source: Box::new(err),
        }
    }
}

/// Convert JSON errors to protocol errors.
///
/// Every JSON document the crate reads comes from a peer (worker or fill
/// service), so a parse failure means the peer broke the contract.
impl From<serde_json::Error> for CutoutError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol {
            operation: "json decoding".to_string(),
            reason: err.to_string(),
        }
    }
}

/// Convert HTTP client errors to transport errors, keeping the status code
/// when the server answered.
impl From<reqwest::Error> for CutoutError {
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());
        let operation = err
            .url()
            .map(|url| format!("request to {}", url.path()))
            .unwrap_or_else(|| "http request".to_string());
        Self::Transport {
            operation,
            status,
            source: Box::new(err),
        }
    }
}
