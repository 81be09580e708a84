use crate::errors::Result;
use crate::fill::FillArtifacts;
use crate::mask_codec::StencilColor;
use crate::worker::WorkerRequest;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Channel to the segmentation worker.
///
/// Only the outgoing half lives here. Responses are delivered on a separate
/// receiver so that one task can own them and demultiplex by tag.
#[async_trait]
pub trait WorkerTransport: Send + Sync {
    async fn send(&self, request: WorkerRequest) -> Result<()>;
}

#[async_trait]
impl<T: WorkerTransport + ?Sized> WorkerTransport for Arc<T> {
    async fn send(&self, request: WorkerRequest) -> Result<()> {
        (**self).send(request).await
    }
}

/// Remote service that fills a masked region of an image.
///
/// Implementations receive artifacts already resized to the working
/// resolution and return the raw bytes of the filled image. Decoding and
/// resizing back is left to the caller.
#[async_trait]
pub trait RemoteFillService: Send + Sync {
    /// Backend name used in logs.
    fn name(&self) -> &str;

    /// Colour the selected region must be painted in.
    fn stencil_color(&self) -> StencilColor {
        StencilColor::White
    }

    /// Whether the backend expects a preview of the stencil over the
    /// background next to the stencil itself.
    fn wants_composite(&self) -> bool {
        false
    }

    async fn fill(&self, artifacts: &FillArtifacts, cancel: &CancellationToken) -> Result<Vec<u8>>;
}
