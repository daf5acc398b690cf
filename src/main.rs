use anyhow::{Context, Result};
use camola_bgswap::background::parse_hex_color;
use camola_bgswap::capture::{CaptureSource, StillFrame, WebcamCapture};
use camola_bgswap::imaging::SmoothingQuality;
use camola_bgswap::output::V4L2Output;
use camola_bgswap::pipeline::{self, NoSegmentation, RunOptions, SegmentationWorker};
use camola_bgswap::segmentation;
use camola_bgswap::{
    BackgroundSelection, DisplayMode, MaskSource, Pipeline, PipelineConfig, PipelineControl,
    PipelineEvent,
};
use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input webcam device index
    #[arg(short, long, default_value_t = 0)]
    input_device: u32,

    /// Replay this picture instead of opening the webcam
    #[arg(long)]
    input_image: Option<PathBuf>,

    /// Output v4l2loopback device path
    #[arg(short, long, default_value = "/dev/video10")]
    output_device: String,

    /// Capture resolution width
    #[arg(long, default_value_t = 1280)]
    capture_width: u32,

    /// Capture resolution height
    #[arg(long, default_value_t = 720)]
    capture_height: u32,

    /// Target frames per second (0 = unthrottled)
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Stop after this many frames
    #[arg(long)]
    frames: Option<u64>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Path to segmentation model (ONNX file)
    /// If not provided, runs in passthrough mode without segmentation
    #[arg(long)]
    model: Option<String>,

    /// Show matte visualization (grayscale silhouette) instead of the composite
    #[arg(long)]
    show_matte: bool,

    /// Start with the unmodified camera image
    #[arg(long)]
    show_original: bool,

    /// Background image; live blur is used when neither this nor a colour is given
    #[arg(long, conflicts_with = "background_color")]
    background: Option<PathBuf>,

    /// Solid background colour, e.g. "#0052CC"
    #[arg(long, value_parser = parse_hex_color)]
    background_color: Option<[u8; 3]>,

    /// Pre-rendered RGBA overlay drawn over the composite (e.g. a name banner)
    #[arg(long)]
    overlay: Option<PathBuf>,

    /// Mask threshold; samples above it count as foreground
    #[arg(long, default_value_t = 128)]
    threshold: u8,

    /// Minimum foreground pixels for a mask to be used
    #[arg(long, default_value_t = 50)]
    min_mask_pixels: usize,

    /// Minimum peak alpha after feathering for a mask to be used
    #[arg(long, default_value_t = 50)]
    min_alpha: u8,

    /// Fraction of the video resolution given to the model
    #[arg(long, default_value_t = 0.7)]
    model_scale: f32,

    /// Mask upscaling quality
    #[arg(long, value_enum, default_value_t = SmoothingQuality::Medium)]
    rescale_quality: SmoothingQuality,

    /// Edge feathering radius in pixels
    #[arg(long, default_value_t = 4.0)]
    soften_radius: f32,

    /// Fraction of the video resolution the blurred background is built at
    #[arg(long, default_value_t = 0.4)]
    background_scale: f32,

    /// Blur radius for the live background, in downscaled pixels
    #[arg(long, default_value_t = 10.0)]
    background_blur: f32,

    /// Milliseconds to wait for the model before showing the raw frame
    #[arg(long, default_value_t = 200)]
    inference_timeout_ms: u64,

    /// Ticks that may reuse the last good mask when the model has none
    #[arg(long, default_value_t = 0)]
    mask_hold_ticks: u32,

    /// Frames between telemetry log lines
    #[arg(long, default_value_t = 30)]
    stats_interval: u64,

    /// Consecutive capture failures before giving up on the camera
    #[arg(long, default_value_t = 30)]
    max_capture_failures: u32,
}

impl Args {
    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            threshold: self.threshold,
            min_mask_pixels: self.min_mask_pixels,
            min_alpha: self.min_alpha,
            model_scale: self.model_scale,
            rescale_quality: self.rescale_quality,
            soften_radius: self.soften_radius,
            background_scale: self.background_scale,
            background_blur_radius: self.background_blur,
            inference_timeout: Duration::from_millis(self.inference_timeout_ms),
            mask_hold_ticks: self.mask_hold_ticks,
            stats_interval: self.stats_interval,
        }
    }

    fn initial_mode(&self) -> DisplayMode {
        if self.show_original {
            DisplayMode::ShowOriginal
        } else if self.show_matte {
            DisplayMode::Matte
        } else {
            DisplayMode::Composited
        }
    }

    fn background_selection(&self) -> BackgroundSelection {
        match (&self.background, self.background_color) {
            (Some(path), _) => BackgroundSelection::Image(path.clone()),
            (None, Some(rgb)) => BackgroundSelection::Color(rgb),
            (None, None) => BackgroundSelection::None,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("Camola background replacement starting");
    tracing::info!("Capture: {}x{}", args.capture_width, args.capture_height);
    tracing::info!("Target FPS: {}", args.fps);

    let config = args.pipeline_config();
    config.validate().context("Invalid pipeline settings")?;

    // Initialize capture
    let mut capture: Box<dyn CaptureSource> = match &args.input_image {
        Some(path) => Box::new(StillFrame::open(path)?),
        None => Box::new(
            WebcamCapture::new(
                args.input_device,
                args.capture_width,
                args.capture_height,
                args.fps,
            )
            .context("Failed to initialize webcam capture")?,
        ),
    };

    // Output always matches the captured video
    let (width, height) = capture.resolution();
    let mut output = V4L2Output::new(&args.output_device, width, height)
        .context("Failed to initialize v4l2loopback output")?;

    // Initialize segmentation model if provided
    let source: Box<dyn MaskSource> = if let Some(model_path) = &args.model {
        tracing::info!("Loading segmentation model from {}", model_path);
        let model = segmentation::create_default_model(model_path)
            .context("Failed to load segmentation model")?;
        tracing::info!("Segmentation model loaded successfully");
        Box::new(SegmentationWorker::spawn(model, config.inference_timeout)?)
    } else {
        tracing::info!("Running in passthrough mode (no segmentation)");
        Box::new(NoSegmentation)
    };

    let initial_mode = if args.model.is_some() {
        args.initial_mode()
    } else {
        DisplayMode::ShowOriginal
    };
    let mut pipeline = Pipeline::new(config, source)
        .context("Failed to build pipeline")?
        .with_initial_mode(initial_mode);

    let control = pipeline.control();
    control.select_background(args.background_selection());
    if let Some(path) = &args.overlay {
        let overlay = image::open(path)
            .with_context(|| format!("Failed to load overlay {}", path.display()))?
            .to_rgba8();
        control.send(PipelineEvent::SetOverlay(Some(overlay)));
    }
    spawn_stdin_control(control)?;

    tracing::info!("Commands: o=toggle original, m=toggle matte, b <path>=image background, c <#hex>=colour background, n=blur background, q=quit");

    let options = RunOptions {
        target_fps: Some(args.fps),
        frame_limit: args.frames,
        max_capture_failures: args.max_capture_failures,
    };
    pipeline::run(&mut pipeline, &mut *capture, &mut output, &options)?;

    Ok(())
}

/// Reads control commands from stdin and forwards them as pipeline events.
fn spawn_stdin_control(control: PipelineControl) -> Result<()> {
    std::thread::Builder::new()
        .name("stdin-control".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                match parse_command(&line) {
                    Ok(Some(event)) => {
                        if !control.send(event) {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(msg) => tracing::warn!("{msg}"),
                }
            }
        })?;
    Ok(())
}

fn parse_command(line: &str) -> std::result::Result<Option<PipelineEvent>, String> {
    let line = line.trim();
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    let event = match command {
        "" => return Ok(None),
        "o" => PipelineEvent::ToggleOriginal,
        "m" => PipelineEvent::ToggleMatte,
        "n" => PipelineEvent::SelectBackground(BackgroundSelection::None),
        "b" if !rest.is_empty() => {
            PipelineEvent::SelectBackground(BackgroundSelection::Image(PathBuf::from(rest)))
        }
        "c" => PipelineEvent::SelectBackground(BackgroundSelection::Color(parse_hex_color(rest)?)),
        "q" => PipelineEvent::Stop,
        other => return Err(format!("Unknown command {other:?}")),
    };
    Ok(Some(event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn defaults_map_to_default_config() {
        let args = Args::parse_from(["camola-bgswap"]);
        let config = args.pipeline_config();
        let defaults = PipelineConfig::default();
        assert_eq!(config.threshold, defaults.threshold);
        assert_eq!(config.model_scale, defaults.model_scale);
        assert_eq!(config.inference_timeout, defaults.inference_timeout);
        assert_eq!(args.background_selection(), BackgroundSelection::None);
        assert_eq!(args.initial_mode(), DisplayMode::Composited);
    }

    #[test]
    fn parses_background_colour_flag() {
        let args = Args::parse_from(["camola-bgswap", "--background-color", "#0052CC"]);
        assert_eq!(
            args.background_selection(),
            BackgroundSelection::Color([0x00, 0x52, 0xCC])
        );
    }

    #[test]
    fn parses_stdin_commands() {
        assert!(matches!(
            parse_command("o"),
            Ok(Some(PipelineEvent::ToggleOriginal))
        ));
        assert!(matches!(
            parse_command("b /tmp/beach.png"),
            Ok(Some(PipelineEvent::SelectBackground(BackgroundSelection::Image(p)))) if p == PathBuf::from("/tmp/beach.png")
        ));
        assert!(matches!(parse_command("  "), Ok(None)));
        assert!(parse_command("c nope").is_err());
        assert!(parse_command("x").is_err());
    }
}
