mod events;
mod gradio;
mod inpaint;
mod retry;

pub use events::{
    extract_result_url, EventStreamParser, FileHandle, FillEvent, FillEventKind, FillJob,
    FillJobState,
};
pub use gradio::GradioFillService;
pub use inpaint::InpaintFillService;
pub use retry::RetryPolicy;

use image::imageops::{self, FilterType};
use image::RgbaImage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::errors::{CutoutError, Result};
use crate::mask_codec::{render_paint_out, BestMask};
use crate::traits::RemoteFillService;

pub const DEFAULT_DILATE_RADIUS: u32 = 10;
pub const DEFAULT_WORKING_SIZE: (u32, u32) = (1024, 1024);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillConfig {
    /// Resolution the service works at. `None` sends the background at its
    /// own size.
    pub working_size: Option<(u32, u32)>,
    /// Growth of the selection before paint-out, in pixels.
    pub dilate_radius: u32,
}

impl Default for FillConfig {
    fn default() -> Self {
        Self {
            working_size: Some(DEFAULT_WORKING_SIZE),
            dilate_radius: DEFAULT_DILATE_RADIUS,
        }
    }
}

/// Images handed to a fill backend, all at the working resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct FillArtifacts {
    pub background: RgbaImage,
    /// Paint-out stencil: the selection opaque, everything else transparent.
    pub mask: RgbaImage,
    /// Stencil drawn over the background, for backends that want it.
    pub composite: Option<RgbaImage>,
}

impl FillArtifacts {
    pub fn dimensions(&self) -> (u32, u32) {
        self.background.dimensions()
    }
}

/// Erases a selection from a background through a [`RemoteFillService`].
#[derive(Debug, Clone)]
pub struct FillOrchestrator<S> {
    service: S,
    config: FillConfig,
}

impl<S: RemoteFillService> FillOrchestrator<S> {
    pub const fn new(service: S, config: FillConfig) -> Self {
        Self { service, config }
    }

    pub const fn service(&self) -> &S {
        &self.service
    }

    pub const fn config(&self) -> &FillConfig {
        &self.config
    }

    /// Dilates the mask, paints it out and scales everything to the working
    /// resolution. Non-square working sizes stretch the image.
    pub fn prepare(&self, background: &RgbaImage, mask: &BestMask) -> Result<FillArtifacts> {
        if mask.is_empty() {
            return Err(CutoutError::NoSelection);
        }

        let dilated = mask.dilated(self.config.dilate_radius)?;
        let stencil = render_paint_out(&dilated, self.service.stencil_color());

        let (width, height) = self.config.working_size.unwrap_or(background.dimensions());
        if width == 0 || height == 0 {
            return Err(CutoutError::validation("working size", "must be non-zero"));
        }

        let background = fit(background, width, height, FilterType::Lanczos3);
        let mask = fit(&stencil, width, height, FilterType::Nearest);
        let composite = self.service.wants_composite().then(|| {
            let mut composite = background.clone();
            imageops::overlay(&mut composite, &mask, 0, 0);
            composite
        });

        Ok(FillArtifacts {
            background,
            mask,
            composite,
        })
    }

    /// Returns `background` with the masked region filled in, at the
    /// background's original size. Nothing is returned unless every step
    /// succeeded.
    pub async fn remove(
        &self,
        background: &RgbaImage,
        mask: &BestMask,
        cancel: &CancellationToken,
    ) -> Result<RgbaImage> {
        let artifacts = self.prepare(background, mask)?;
        info!(
            backend = self.service.name(),
            working_size = ?artifacts.dimensions(),
            radius = self.config.dilate_radius,
            "starting fill"
        );

        let bytes = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(CutoutError::Cancelled {
                    operation: "remote fill".to_string(),
                })
            }
            bytes = self.service.fill(&artifacts, cancel) => bytes?,
        };

        let filled = image::load_from_memory(&bytes)
            .map_err(|e| CutoutError::ImageProcessing {
                operation: "decode fill result".to_string(),
                source: Box::new(e),
            })?
            .to_rgba8();
        debug!(size = ?filled.dimensions(), "fill result decoded");

        let (width, height) = background.dimensions();
        Ok(fit(&filled, width, height, FilterType::Lanczos3))
    }
}

fn fit(image: &RgbaImage, width: u32, height: u32, filter: FilterType) -> RgbaImage {
    if image.dimensions() == (width, height) {
        image.clone()
    } else {
        imageops::resize(image, width, height, filter)
    }
}
