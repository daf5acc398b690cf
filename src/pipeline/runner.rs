use super::{FrameSource, MaskSource, Pipeline};
use crate::capture::CaptureSource;
use crate::output::OutputSink;
use anyhow::Result;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Upper bound on the tick rate. `None` runs as fast as frames arrive.
    pub target_fps: Option<u32>,
    /// Stop after this many ticks.
    pub frame_limit: Option<u64>,
    /// Consecutive capture failures tolerated before the source counts as lost.
    pub max_capture_failures: u32,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            target_fps: Some(30),
            frame_limit: None,
            max_capture_failures: 30,
        }
    }
}

/// Drives `pipeline` from `capture` to `output` until it stops.
///
/// Returns the number of frames written. Only losing the video source ends
/// the loop with an error; individual bad frames and write failures are
/// logged and skipped.
pub fn run<S, C, O>(
    pipeline: &mut Pipeline<S>,
    capture: &mut C,
    output: &mut O,
    options: &RunOptions,
) -> Result<u64>
where
    S: MaskSource,
    C: CaptureSource + ?Sized,
    O: OutputSink + ?Sized,
{
    let frame_duration = options
        .target_fps
        .filter(|&fps| fps > 0)
        .map(|fps| Duration::from_secs_f64(1.0 / fps as f64));
    let mut ticks = 0u64;
    let mut written = 0u64;
    let mut capture_failures = 0u32;

    tracing::info!("Starting main pipeline loop");

    while !pipeline.is_stopped() {
        if options.frame_limit.is_some_and(|limit| ticks >= limit) {
            pipeline.stop();
            break;
        }
        let loop_start = Instant::now();

        let frame = match capture.capture_frame() {
            Ok(frame) => {
                capture_failures = 0;
                frame
            }
            Err(err) => {
                capture_failures += 1;
                if capture_failures > options.max_capture_failures {
                    pipeline.stop();
                    return Err(err.context(format!(
                        "Video source lost after {capture_failures} consecutive capture failures"
                    )));
                }
                tracing::warn!(error = %format!("{err:#}"), "Failed to capture frame, skipping");
                continue;
            }
        };

        let report = pipeline.tick(&frame);
        ticks += 1;
        if report.source == FrameSource::Stopped {
            break;
        }

        match output.write_frame(pipeline.output()) {
            Ok(()) => written += 1,
            Err(err) => tracing::warn!(error = %format!("{err:#}"), "Failed to write frame"),
        }

        if let Some(frame_duration) = frame_duration {
            let elapsed = loop_start.elapsed();
            if elapsed < frame_duration {
                std::thread::sleep(frame_duration - elapsed);
            }
        }
    }

    tracing::info!(frames = written, "Pipeline loop finished");
    Ok(written)
}
