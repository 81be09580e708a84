use clap::{Parser, ValueEnum};
use image::ImageFormat;
use std::path::PathBuf;
use std::time::Duration;

use crate::coords::{DisplaySize, NormalizedPoint};
use crate::fill::{FillConfig, RetryPolicy, DEFAULT_DILATE_RADIUS};
use crate::mask_codec::StencilColor;
use crate::worker::{PointPrompt, PromptLabel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FillBackend {
    /// Only cut the object out.
    None,
    /// Hosted job API with upload, submit and event stream.
    Gradio,
    /// Single `/inpaint` endpoint taking data URLs.
    Inpaint,
}

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Background image to cut objects out of.
    pub image: PathBuf,

    #[arg(default_value = "output")]
    pub output_dir: PathBuf,

    #[arg(short, long, default_value = "png", value_parser = check_format)]
    pub format: String,

    /// Segmentation worker executable, speaking JSON lines on stdio.
    #[arg(short, long)]
    pub worker: String,

    #[arg(long = "worker-arg", allow_hyphen_values = true)]
    pub worker_args: Vec<String>,

    /// Prompt as `x,y[,label]` in normalized coordinates, label 1 (default)
    /// for foreground and 0 for background.
    #[arg(short, long = "point", required = true, value_parser = parse_point)]
    pub points: Vec<PointPrompt>,

    /// Viewport the placement in the sidecar file is computed for.
    #[arg(long, default_value = "1280x800", value_parser = parse_size)]
    pub viewport: (u32, u32),

    #[arg(long, value_enum, default_value_t = FillBackend::None)]
    pub fill: FillBackend,

    #[arg(long, required_if_eq_any([("fill", "gradio"), ("fill", "inpaint")]))]
    pub fill_url: Option<String>,

    #[arg(long, default_value = "predict")]
    pub fill_job: String,

    #[arg(long, default_value = "lama")]
    pub fill_model: String,

    /// Resolution the fill service works at, `WxH`.
    #[arg(long, default_value = "1024x1024", value_parser = parse_size)]
    pub working_size: (u32, u32),

    /// Growth of the selection before paint-out, in pixels.
    #[arg(long, default_value_t = DEFAULT_DILATE_RADIUS)]
    pub dilate_radius: u32,

    #[arg(long, value_enum, default_value_t = StencilColor::White)]
    pub stencil: StencilColor,

    /// Also upload the stencil drawn over the background.
    #[arg(long)]
    pub composite: bool,

    #[arg(long, default_value_t = 120)]
    pub worker_timeout_secs: u64,

    #[arg(long, default_value_t = 60)]
    pub request_timeout_secs: u64,

    #[arg(long, default_value_t = 300)]
    pub poll_timeout_secs: u64,

    #[arg(long, default_value_t = 3)]
    pub max_attempts: u32,

    #[arg(long, default_value_t = 500)]
    pub retry_backoff_ms: u64,
}

impl Config {
    pub fn fill_config(&self) -> FillConfig {
        FillConfig {
            working_size: Some(self.working_size),
            dilate_radius: self.dilate_radius,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let initial_backoff = Duration::from_millis(self.retry_backoff_ms);
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff,
            max_backoff: initial_backoff.saturating_mul(16),
        }
    }

    pub const fn worker_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_timeout_secs)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub const fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn viewport_size(&self) -> DisplaySize {
        DisplaySize {
            width: self.viewport.0 as f32,
            height: self.viewport.1 as f32,
        }
    }
}

fn check_format(s: &str) -> Result<String, String> {
    let supported: Vec<_> = ImageFormat::all()
        .filter(|f| f.writing_enabled())
        .flat_map(|f| f.extensions_str())
        .map(|s| format!("`{}`", s))
        .collect();
    let supported_message = format!("Supported formats: {}", supported.join(", "));

    let format = ImageFormat::from_extension(s)
        .ok_or(format!("{} is not supported. {}", s, supported_message))?;
    if !format.writing_enabled() {
        return Err(format!("{} is not supported. {}", s, supported_message));
    }

    Ok(s.to_string())
}

fn parse_point(s: &str) -> Result<PointPrompt, String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    let (x, y, label) = match parts.as_slice() {
        [x, y] => (*x, *y, "1"),
        [x, y, label] => (*x, *y, *label),
        _ => return Err(format!("`{s}` is not `x,y[,label]`")),
    };

    let coord = |v: &str| v.parse::<f32>().map_err(|e| format!("`{v}`: {e}"));
    let point = NormalizedPoint::new(coord(x)?, coord(y)?).map_err(|e| e.to_string())?;
    let label = label
        .parse::<u8>()
        .map_err(|e| e.to_string())
        .and_then(|l| PromptLabel::try_from(l).map_err(|e| e.to_string()))?;

    Ok(PointPrompt { point, label })
}

fn parse_size(s: &str) -> Result<(u32, u32), String> {
    let (width, height) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("`{s}` is not `WxH`"))?;
    let width: u32 = width.trim().parse().map_err(|e| format!("`{width}`: {e}"))?;
    let height: u32 = height.trim().parse().map_err(|e| format!("`{height}`: {e}"))?;
    if width == 0 || height == 0 {
        return Err(format!("`{s}` must be non-zero on both axes"));
    }
    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Config, clap::Error> {
        Config::try_parse_from(std::iter::once("cutout-rs").chain(args.iter().copied()))
    }

    #[test]
    fn test_defaults() -> Result<(), clap::Error> {
        let config = parse(&["photo.png", "--worker", "sam-worker", "--point", "0.5,0.5"])?;

        assert_eq!(config.output_dir, PathBuf::from("output"));
        assert_eq!(config.fill, FillBackend::None);
        assert_eq!(config.points.len(), 1);
        assert_eq!(config.points[0].label, PromptLabel::Positive);
        assert_eq!(
            config.fill_config(),
            FillConfig {
                working_size: Some((1024, 1024)),
                dilate_radius: 10
            }
        );
        assert_eq!(config.retry_policy().max_attempts, 3);
        assert_eq!(config.poll_timeout(), Duration::from_secs(300));
        Ok(())
    }

    #[test]
    fn test_points_and_sizes() -> Result<(), clap::Error> {
        let config = parse(&[
            "photo.png",
            "--worker",
            "python",
            "--worker-arg",
            "worker.py",
            "--point",
            "0.25, 0.75, 0",
            "--point",
            "0.1,0.2,1",
            "--working-size",
            "512x768",
            "--fill",
            "inpaint",
            "--fill-url",
            "http://localhost:7860",
        ])?;

        assert_eq!(config.worker_args, vec!["worker.py".to_string()]);
        assert_eq!(config.points[0].label, PromptLabel::Negative);
        assert_eq!(config.points[0].point.x(), 0.25);
        assert_eq!(config.working_size, (512, 768));
        assert_eq!(config.fill, FillBackend::Inpaint);
        Ok(())
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(parse(&["a.png", "--worker", "w", "--point", "1.5,0.5"]).is_err());
        assert!(parse(&["a.png", "--worker", "w", "--point", "0.5,0.5,2"]).is_err());
        assert!(parse(&["a.png", "--worker", "w", "--point", "0.5"]).is_err());
        assert!(parse(&["a.png", "--worker", "w"]).is_err());
        assert!(parse(&["a.png", "--worker", "w", "--point", "0.5,0.5", "--format", "xyz"]).is_err());
        assert!(parse(&["a.png", "--worker", "w", "--point", "0.5,0.5", "--fill", "gradio"]).is_err());
        assert!(parse_size("0x10").is_err());
        assert!(parse_size("10-10").is_err());
    }
}
