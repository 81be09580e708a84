use async_trait::async_trait;
use futures::StreamExt;
use image::RgbaImage;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::data_url;
use crate::errors::{CutoutError, Result};
use crate::fill::events::{EventStreamParser, FileHandle, FillJob};
use crate::fill::{FillArtifacts, RetryPolicy};
use crate::mask_codec::StencilColor;
use crate::traits::RemoteFillService;

#[derive(Deserialize)]
struct SubmitResponse {
    event_id: String,
}

/// Fill backend speaking the hosted job API: upload the artifacts, submit a
/// job that references them, follow the job's event stream, then download
/// the result file.
#[derive(Debug, Clone)]
pub struct GradioFillService {
    client: Client,
    base_url: String,
    job: String,
    model: String,
    retry: RetryPolicy,
    request_timeout: Duration,
    poll_timeout: Duration,
    stencil_color: StencilColor,
    composite: bool,
}

impl GradioFillService {
    pub fn new(base_url: impl Into<String>, job: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            job: job.into(),
            model: model.into(),
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(60),
            poll_timeout: Duration::from_secs(300),
            stencil_color: StencilColor::White,
            composite: false,
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

    pub const fn with_timeouts(mut self, request: Duration, poll: Duration) -> Self {
        self.request_timeout = request;
        self.poll_timeout = poll;
        self
    }

    pub const fn with_stencil_color(mut self, color: StencilColor) -> Self {
        self.stencil_color = color;
        self
    }

    pub const fn with_composite(mut self, composite: bool) -> Self {
        self.composite = composite;
        self
    }

    /// Fetchable URL of an uploaded file.
    pub fn file_url(&self, path: &str) -> String {
        format!("{}/file={}", self.base_url, path)
    }

    pub async fn upload(
        &self,
        name: &str,
        image: &RgbaImage,
        cancel: &CancellationToken,
    ) -> Result<FileHandle> {
        let bytes = data_url::png_bytes(image)?;
        let url = format!("{}/upload", self.base_url);

        let paths: Vec<String> = self
            .retry
            .run("upload", cancel, || self.try_upload(&url, name, bytes.clone()))
            .await?;
        let path = paths
            .into_iter()
            .next()
            .ok_or_else(|| CutoutError::protocol("upload", "server returned no file path"))?;

        debug!(name, path = %path, "uploaded fill artifact");
        Ok(FileHandle {
            url: self.file_url(&path),
            path,
        })
    }

    pub async fn submit(&self, handles: &[FileHandle], cancel: &CancellationToken) -> Result<String> {
        let mut data: Vec<Value> = handles.iter().map(FileHandle::to_payload).collect();
        data.push(Value::String(self.model.clone()));
        let body = json!({ "data": data });
        let url = format!("{}/call/{}", self.base_url, self.job);

        let response: SubmitResponse = self
            .retry
            .run("submit", cancel, || self.try_submit(&url, &body))
            .await?;
        info!(job = %self.job, event_id = %response.event_id, "fill job submitted");
        Ok(response.event_id)
    }

    /// Follows the job's event stream until it completes, fails or ends.
    /// Opening the stream counts against the poll timeout.
    pub async fn poll(&self, job: &mut FillJob, cancel: &CancellationToken) -> Result<()> {
        let url = format!("{}/call/{}/{}", self.base_url, self.job, job.event_id);
        let follow = async {
            let response = self
                .retry
                .run("open event stream", cancel, || self.try_open_stream(&url))
                .await?;
            read_events(response, job).await
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(CutoutError::Cancelled {
                operation: "poll fill job".to_string(),
            }),
            result = tokio::time::timeout(self.poll_timeout, follow) => {
                result.map_err(|_| CutoutError::Timeout {
                    operation: "poll fill job".to_string(),
                    after: self.poll_timeout,
                })?
            }
        }
    }

    pub async fn fetch(&self, url: &str, cancel: &CancellationToken) -> Result<Vec<u8>> {
        self.retry
            .run("fetch fill result", cancel, || self.try_fetch(url))
            .await
    }

    /// Absolute form of a result URL the service may have sent relative.
    fn absolute_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}/{}", self.base_url, url.trim_start_matches('/'))
        }
    }

    async fn try_upload(&self, url: &str, name: &str, bytes: Vec<u8>) -> Result<Vec<String>> {
        let part = Part::bytes(bytes)
            .file_name(format!("{name}.png"))
            .mime_str("image/png")?;
        let form = Form::new().part("files", part);

        let response = self
            .client
            .post(url)
            .multipart(form)
            .timeout(self.request_timeout)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn try_submit(&self, url: &str, body: &Value) -> Result<SubmitResponse> {
        let response = self
            .client
            .post(url)
            .json(body)
            .timeout(self.request_timeout)
            .send()
            .await?
            .error_for_status()?;
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| CutoutError::protocol("submit", format!("{e}: {text}")))
    }

    async fn try_open_stream(&self, url: &str) -> Result<Response> {
        Ok(self.client.get(url).send().await?.error_for_status()?)
    }

    async fn try_fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

async fn read_events(response: Response, job: &mut FillJob) -> Result<()> {
    let mut stream = response.bytes_stream();
    let mut parser = EventStreamParser::new();

    while let Some(chunk) = stream.next().await {
        for event in parser.push(&chunk?)? {
            if job.observe(event)? {
                return Ok(());
            }
        }
    }
    if let Some(event) = parser.finish()? {
        if job.observe(event)? {
            return Ok(());
        }
    }
    job.end_of_stream()
}

#[async_trait]
impl RemoteFillService for GradioFillService {
    fn name(&self) -> &str {
        "gradio"
    }

    fn stencil_color(&self) -> StencilColor {
        self.stencil_color
    }

    fn wants_composite(&self) -> bool {
        self.composite
    }

    async fn fill(&self, artifacts: &FillArtifacts, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let mut handles = vec![
            self.upload("background", &artifacts.background, cancel).await?,
            self.upload("mask", &artifacts.mask, cancel).await?,
        ];
        if let Some(composite) = &artifacts.composite {
            handles.push(self.upload("composite", composite, cancel).await?);
        }

        let event_id = self.submit(&handles, cancel).await?;
        let mut job = FillJob::new(event_id, handles);
        self.poll(&mut job, cancel).await?;

        let url = self.absolute_url(&job.result_url()?);
        debug!(url = %url, "fetching fill result");
        self.fetch(&url, cancel).await
    }
}
