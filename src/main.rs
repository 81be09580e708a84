use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use image::ImageFormat;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cutout_rs::{
    Config, CutoutObject, DisplayScale, Editor, FillBackend, FillOrchestrator, GradioFillService,
    InpaintFillService, RemoteFillService, StdioWorker,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::parse();
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, cancelling");
                cancel.cancel();
            }
        });
    }

    let background = image::open(&config.image)
        .with_context(|| format!("Failed to open image: {}", config.image.display()))?
        .to_rgba8();
    fs::create_dir_all(&config.output_dir).with_context(|| {
        format!("Failed to create output directory: {}", config.output_dir.display())
    })?;

    let (worker, responses) = StdioWorker::spawn(&config.worker, &config.worker_args)?;
    let mut editor = Editor::new(worker, responses);

    let result = run(&config, &mut editor, background, &cancel).await;
    if let Err(e) = editor.transport().shutdown().await {
        warn!(error = %e, "worker did not shut down cleanly");
    }
    result
}

async fn run(
    config: &Config,
    editor: &mut Editor<StdioWorker>,
    background: image::RgbaImage,
    cancel: &CancellationToken,
) -> Result<()> {
    let spinner = spinner("computing embedding")?;
    let background_size = background.dimensions();
    editor.set_background(background).await?;
    editor
        .wait_for_embedding(config.worker_timeout(), cancel)
        .await
        .context("Embedding was not computed")?;

    spinner.set_message("decoding mask");
    for prompt in &config.points {
        editor.add_point(*prompt).await?;
    }
    let selection = editor
        .wait_for_mask(config.worker_timeout(), cancel)
        .await
        .context("Mask was not decoded")?;
    info!(score = selection.mask.score, pixels = selection.mask.count_set(), "mask ready");

    // zero-based, taken before the commit adds the new layer
    let index = editor.objects().len();

    let object = match config.fill {
        FillBackend::None => editor.commit_selection()?.clone(),
        FillBackend::Gradio => {
            spinner.set_message("erasing selection");
            let url = fill_url(config)?;
            let service = GradioFillService::new(url, &config.fill_job, &config.fill_model)
                .with_retry(config.retry_policy())
                .with_timeouts(config.request_timeout(), config.poll_timeout())
                .with_stencil_color(config.stencil)
                .with_composite(config.composite);
            erase(config, editor, service, cancel).await?
        }
        FillBackend::Inpaint => {
            spinner.set_message("erasing selection");
            let service = InpaintFillService::new(fill_url(config)?)
                .with_retry(config.retry_policy())
                .with_request_timeout(config.request_timeout());
            erase(config, editor, service, cancel).await?
        }
    };
    spinner.finish_and_clear();

    save_object(config, background_size, index, &object)?;
    Ok(())
}

async fn erase<S: RemoteFillService>(
    config: &Config,
    editor: &mut Editor<StdioWorker>,
    service: S,
    cancel: &CancellationToken,
) -> Result<CutoutObject> {
    let orchestrator = FillOrchestrator::new(service, config.fill_config());
    let object = editor
        .commit_and_erase(&orchestrator, cancel)
        .await
        .context("Failed to erase the selection")?
        .clone();

    if let Some(background) = editor.background() {
        let path = config.output_dir.join("background").with_extension(&config.format);
        save_image(background, &path, &config.format)?;
        info!(path = %path.display(), "filled background written");
    }
    Ok(object)
}

/// Writes the cutout and a JSON sidecar with its bounding box and where it
/// sits on a background fitted to the viewport.
fn save_object(
    config: &Config,
    background_size: (u32, u32),
    index: usize,
    object: &CutoutObject,
) -> Result<()> {
    let (path, sidecar_path) = object_paths(&config.output_dir, &config.format, index);
    save_image(&object.image, &path, &config.format)?;

    let (_, scale) = DisplayScale::fit(background_size, config.viewport_size())?;
    let sidecar = json!({
        "image": path.file_name().map(|name| name.to_string_lossy()),
        "boundingBox": object.bounding_box,
        "placement": object.placement(scale),
    });
    fs::write(&sidecar_path, serde_json::to_vec_pretty(&sidecar)?)
        .with_context(|| format!("Failed to write {}", sidecar_path.display()))?;

    info!(path = %path.display(), width = object.width(), height = object.height(), "object written");
    Ok(())
}

/// Image and sidecar paths of the object layer at `index`.
fn object_paths(output_dir: &Path, format: &str, index: usize) -> (PathBuf, PathBuf) {
    let stem = output_dir.join(format!("object_{index}"));
    (stem.with_extension(format), stem.with_extension("json"))
}

fn save_image(image: &image::RgbaImage, path: &Path, format: &str) -> Result<()> {
    let format = ImageFormat::from_extension(format).unwrap_or(ImageFormat::Png);
    let image = image::DynamicImage::ImageRgba8(image.clone());
    let image = match format {
        ImageFormat::Jpeg => image::DynamicImage::ImageRgb8(image.to_rgb8()),
        _ => image,
    };
    image
        .save_with_format(path, format)
        .with_context(|| format!("Failed to save image: {}", path.display()))
}

fn fill_url(config: &Config) -> Result<String> {
    config
        .fill_url
        .clone()
        .context("--fill-url is required with a fill backend")
}

fn spinner(message: &'static str) -> Result<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.green} [{elapsed}] {msg}")?);
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    Ok(spinner)
}
