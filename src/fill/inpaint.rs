use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::data_url;
use crate::errors::Result;
use crate::fill::{FillArtifacts, RetryPolicy};
use crate::traits::RemoteFillService;

#[derive(Serialize)]
struct InpaintRequest<'a> {
    image: &'a str,
    mask: &'a str,
}

/// Fill backend for a single `POST /inpaint` endpoint that takes the
/// background and the white paint-out mask as PNG data URLs and answers
/// with the filled image.
#[derive(Debug, Clone)]
pub struct InpaintFillService {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
    request_timeout: Duration,
}

impl InpaintFillService {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    async fn try_inpaint(&self, url: &str, body: &InpaintRequest<'_>) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(url)
            .json(body)
            .timeout(self.request_timeout)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl RemoteFillService for InpaintFillService {
    fn name(&self) -> &str {
        "inpaint"
    }

    async fn fill(&self, artifacts: &FillArtifacts, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let image = data_url::encode_png(&artifacts.background)?;
        let mask = data_url::encode_png(&artifacts.mask)?;
        let body = InpaintRequest {
            image: &image,
            mask: &mask,
        };
        let url = format!("{}/inpaint", self.base_url);

        let bytes = self
            .retry
            .run("inpaint", cancel, || self.try_inpaint(&url, &body))
            .await?;
        debug!(len = bytes.len(), "inpaint response received");

        let (width, height) = artifacts.dimensions();
        Ok(data_url::resize_bytes(bytes, width, height))
    }
}
