use image::RgbaImage;
use tracing::{debug, info};

use crate::data_url;
use crate::errors::Result;
use crate::worker::{Embedding, RequestId, RequestIdGenerator, SegmentPayload, WorkerRequest};

/// Generation number of a background. Every new background gets a fresh one
/// so that results computed for an older image can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(pub u64);

#[derive(Debug, Clone, PartialEq)]
pub enum EmbeddingState {
    Idle,
    Computing { image: ImageId, request: RequestId },
    Ready { image: ImageId, embedding: Embedding },
}

/// What a `segment_result` did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingUpdate {
    /// The worker acknowledged the request; still computing.
    Started,
    Ready(ImageId),
    /// Not the request currently awaited. Dropped.
    Stale,
}

/// Tracks the embedding of the current background.
#[derive(Debug)]
pub struct EmbeddingSession {
    state: EmbeddingState,
    generation: u64,
}

impl Default for EmbeddingSession {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingSession {
    pub const fn new() -> Self {
        Self {
            state: EmbeddingState::Idle,
            generation: 0,
        }
    }

    /// Starts computing the embedding of a new background and returns the
    /// `segment` command to send. Any previous embedding is discarded.
    pub fn request(
        &mut self,
        background: &RgbaImage,
        ids: &RequestIdGenerator,
    ) -> Result<(ImageId, WorkerRequest)> {
        let (image, request) = self.prepare(background, ids)?;
        self.begin(image, request.id());
        Ok((image, request))
    }

    /// Builds the `segment` command for a new background without touching
    /// the current state. Call [`Self::begin`] once it has been delivered.
    pub fn prepare(
        &mut self,
        background: &RgbaImage,
        ids: &RequestIdGenerator,
    ) -> Result<(ImageId, WorkerRequest)> {
        let data = data_url::encode_png(background)?;

        self.generation += 1;
        let image = ImageId(self.generation);
        let request = ids.next();

        debug!(?image, %request, "requesting embedding");
        Ok((image, WorkerRequest::Segment { id: request, data }))
    }

    /// Waits for `request` from now on. The previous embedding is dropped.
    pub fn begin(&mut self, image: ImageId, request: RequestId) {
        self.state = EmbeddingState::Computing { image, request };
    }

    pub fn accept(&mut self, id: RequestId, payload: SegmentPayload) -> EmbeddingUpdate {
        let image = match self.state {
            EmbeddingState::Computing { image, request } if request == id => image,
            _ => {
                debug!(%id, "dropping stale segment result");
                return EmbeddingUpdate::Stale;
            }
        };

        match payload {
            SegmentPayload::Started => {
                debug!(%id, "worker started computing embedding");
                EmbeddingUpdate::Started
            }
            SegmentPayload::Ready(embedding) => {
                info!(?image, "embedding ready");
                self.state = EmbeddingState::Ready { image, embedding };
                EmbeddingUpdate::Ready(image)
            }
        }
    }

    pub fn reset(&mut self) {
        self.state = EmbeddingState::Idle;
    }

    pub const fn state(&self) -> &EmbeddingState {
        &self.state
    }

    pub const fn is_ready(&self) -> bool {
        matches!(self.state, EmbeddingState::Ready { .. })
    }

    pub const fn embedding(&self) -> Option<&Embedding> {
        match &self.state {
            EmbeddingState::Ready { embedding, .. } => Some(embedding),
            _ => None,
        }
    }

    pub const fn image(&self) -> Option<ImageId> {
        match self.state {
            EmbeddingState::Idle => None,
            EmbeddingState::Computing { image, .. } | EmbeddingState::Ready { image, .. } => {
                Some(image)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use serde_json::json;

    fn background() -> RgbaImage {
        RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255]))
    }

    fn ready(value: serde_json::Value) -> SegmentPayload {
        SegmentPayload::Ready(Embedding(value))
    }

    #[test]
    fn test_start_sentinel_keeps_computing() -> Result<()> {
        let ids = RequestIdGenerator::new();
        let mut session = EmbeddingSession::new();
        let (image, request) = session.request(&background(), &ids)?;

        assert_eq!(
            session.accept(request.id(), SegmentPayload::Started),
            EmbeddingUpdate::Started
        );
        assert!(!session.is_ready());

        assert_eq!(
            session.accept(request.id(), ready(json!([1, 2, 3]))),
            EmbeddingUpdate::Ready(image)
        );
        assert!(session.is_ready());
        assert_eq!(session.embedding(), Some(&Embedding(json!([1, 2, 3]))));
        Ok(())
    }

    #[test]
    fn test_segment_request_carries_png_data_url() -> Result<()> {
        let ids = RequestIdGenerator::new();
        let mut session = EmbeddingSession::new();
        let (_, request) = session.request(&background(), &ids)?;

        match request {
            WorkerRequest::Segment { data, .. } => {
                assert!(data.starts_with("data:image/png;base64,"))
            }
            other => panic!("Expected segment request, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_result_for_previous_background_is_stale() -> Result<()> {
        let ids = RequestIdGenerator::new();
        let mut session = EmbeddingSession::new();
        let (_, first) = session.request(&background(), &ids)?;
        let (second_image, second) = session.request(&background(), &ids)?;

        assert_eq!(
            session.accept(first.id(), ready(json!("old"))),
            EmbeddingUpdate::Stale
        );
        assert!(!session.is_ready());

        assert_eq!(
            session.accept(second.id(), ready(json!("new"))),
            EmbeddingUpdate::Ready(second_image)
        );
        assert_eq!(session.embedding(), Some(&Embedding(json!("new"))));
        Ok(())
    }

    #[test]
    fn test_new_background_discards_embedding() -> Result<()> {
        let ids = RequestIdGenerator::new();
        let mut session = EmbeddingSession::new();
        let (_, request) = session.request(&background(), &ids)?;
        session.accept(request.id(), ready(json!(1)));
        assert!(session.is_ready());

        let (image, _) = session.request(&background(), &ids)?;
        assert!(!session.is_ready());
        assert_eq!(session.image(), Some(image));

        session.reset();
        assert_eq!(session.state(), &EmbeddingState::Idle);
        assert_eq!(session.image(), None);
        Ok(())
    }

    #[test]
    fn test_prepare_keeps_current_embedding() -> Result<()> {
        let ids = RequestIdGenerator::new();
        let mut session = EmbeddingSession::new();
        let (image, request) = session.request(&background(), &ids)?;
        session.accept(request.id(), ready(json!(1)));

        let (next_image, next) = session.prepare(&background(), &ids)?;
        assert!(session.is_ready());
        assert_eq!(session.image(), Some(image));
        assert_eq!(
            session.accept(next.id(), ready(json!(2))),
            EmbeddingUpdate::Stale
        );

        session.begin(next_image, next.id());
        assert_eq!(
            session.accept(next.id(), ready(json!(2))),
            EmbeddingUpdate::Ready(next_image)
        );
        Ok(())
    }
}
