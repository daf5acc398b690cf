//! Per-frame driver for the background replacement pipeline.
//!
//! One `tick` turns one captured frame into one output frame. All state that
//! survives between ticks (display mode, background selection, scratch
//! buffers, the optional last good mask) lives on `Pipeline`. Control events
//! are queued through `PipelineControl` and applied only at the start of a
//! tick, never while one is in progress.

mod runner;
mod worker;

pub use runner::{run, RunOptions};
pub use worker::SegmentationWorker;

use crate::background::{BackgroundProvider, BackgroundSelection};
use crate::composite::{render_matte, FrameCompositor};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::imaging::{ensure_rgba, Rescaler, SmoothingQuality};
use crate::mask::{EdgeSoftener, MaskBuffer, MorphologyEngine, RawMask};
use crate::telemetry::{Telemetry, TickTimings};
use image::RgbaImage;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Instant;

/// Produces one raw mask per request.
///
/// `frame` is already scaled to the resolution the mask must have.
pub trait MaskSource {
    fn acquire(&mut self, frame: &RgbaImage) -> Result<RawMask>;

    /// Drops any temporal state, e.g. after a resolution change.
    fn reset(&mut self) {}
}

impl<T: MaskSource + ?Sized> MaskSource for Box<T> {
    fn acquire(&mut self, frame: &RgbaImage) -> Result<RawMask> {
        (**self).acquire(frame)
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}

/// Mask source used when no model is loaded. Every request is unavailable.
#[derive(Debug, Default)]
pub struct NoSegmentation;

impl MaskSource for NoSegmentation {
    fn acquire(&mut self, _frame: &RgbaImage) -> Result<RawMask> {
        Err(PipelineError::MaskUnavailable("no segmentation model loaded".into()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    /// Person over the replaced background.
    Composited,
    /// Raw camera frame, no masking at all.
    ShowOriginal,
    /// Softened mask rendered as grayscale.
    Matte,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    Running(DisplayMode),
    Stopped,
}

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Flip between `ShowOriginal` and `Composited`.
    ToggleOriginal,
    /// Flip between `Matte` and `Composited`.
    ToggleMatte,
    SetMode(DisplayMode),
    SelectBackground(BackgroundSelection),
    SetOverlay(Option<RgbaImage>),
    Stop,
}

/// Cloneable handle for queuing events from other threads.
#[derive(Debug, Clone)]
pub struct PipelineControl {
    events: Sender<PipelineEvent>,
}

impl PipelineControl {
    /// Queues an event. Returns `false` once the pipeline is gone.
    pub fn send(&self, event: PipelineEvent) -> bool {
        self.events.send(event).is_ok()
    }

    pub fn toggle_original(&self) -> bool {
        self.send(PipelineEvent::ToggleOriginal)
    }

    pub fn select_background(&self, selection: BackgroundSelection) -> bool {
        self.send(PipelineEvent::SelectBackground(selection))
    }

    pub fn stop(&self) -> bool {
        self.send(PipelineEvent::Stop)
    }
}

/// Where the pixels of a tick's output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSource {
    Composited,
    /// Composited with the previous good mask because this tick had none.
    HeldMask,
    Original,
    Matte,
    /// The tick failed and emitted the raw frame; carries the error kind.
    Fallback(&'static str),
    /// The pipeline is stopped; the output was left untouched.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    pub source: FrameSource,
    pub timings: TickTimings,
}

impl TickReport {
    pub fn fell_back(&self) -> bool {
        matches!(self.source, FrameSource::Fallback(_))
    }
}

pub struct Pipeline<S> {
    config: PipelineConfig,
    source: S,
    state: PipelineState,
    initial_mode: DisplayMode,
    events: Receiver<PipelineEvent>,
    control: PipelineControl,

    morphology: MorphologyEngine,
    mask_rescaler: Rescaler,
    frame_rescaler: Rescaler,
    softener: EdgeSoftener,
    background: BackgroundProvider,
    compositor: FrameCompositor,

    model_input: RgbaImage,
    upscaled: MaskBuffer,
    last_good: MaskBuffer,
    has_last_good: bool,
    held_ticks: u32,
    output: RgbaImage,
    model_dims: Option<(u32, u32)>,
    stage: &'static str,

    telemetry: Telemetry,
}

impl<S: MaskSource> Pipeline<S> {
    pub fn new(config: PipelineConfig, source: S) -> Result<Self> {
        config.validate()?;
        let (tx, rx) = mpsc::channel();
        Ok(Self {
            morphology: MorphologyEngine::new(config.threshold, config.min_mask_pixels),
            mask_rescaler: Rescaler::new(config.rescale_quality),
            frame_rescaler: Rescaler::new(SmoothingQuality::Medium),
            softener: EdgeSoftener::new(config.soften_radius),
            background: BackgroundProvider::new(
                config.background_scale,
                config.background_blur_radius,
            ),
            compositor: FrameCompositor::new(),
            telemetry: Telemetry::new(config.stats_interval),
            config,
            source,
            state: PipelineState::Init,
            initial_mode: DisplayMode::Composited,
            events: rx,
            control: PipelineControl { events: tx },
            model_input: RgbaImage::new(0, 0),
            upscaled: MaskBuffer::default(),
            last_good: MaskBuffer::default(),
            has_last_good: false,
            held_ticks: 0,
            output: RgbaImage::new(0, 0),
            model_dims: None,
            stage: "idle",
        })
    }

    /// Mode entered on the first tick.
    pub fn with_initial_mode(mut self, mode: DisplayMode) -> Self {
        self.initial_mode = mode;
        self
    }

    pub fn control(&self) -> PipelineControl {
        self.control.clone()
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn is_stopped(&self) -> bool {
        self.state == PipelineState::Stopped
    }

    /// Moves straight to `Stopped`; later ticks produce nothing.
    pub fn stop(&mut self) {
        if self.state != PipelineState::Stopped {
            tracing::info!("Pipeline stopped");
            self.state = PipelineState::Stopped;
        }
    }

    /// The frame produced by the most recent tick.
    pub fn output(&self) -> &RgbaImage {
        &self.output
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn background(&self) -> &BackgroundProvider {
        &self.background
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Processes one captured frame into `output()`.
    ///
    /// Never fails: any per-frame problem degrades to emitting `frame` as is.
    pub fn tick(&mut self, frame: &RgbaImage) -> TickReport {
        let start = Instant::now();
        let mut timings = TickTimings::default();

        self.apply_events();
        if self.state == PipelineState::Init {
            self.state = PipelineState::Running(self.initial_mode);
            tracing::info!(mode = ?self.initial_mode, "Pipeline running");
        }
        let mode = match self.state {
            PipelineState::Running(mode) => mode,
            _ => {
                return TickReport {
                    source: FrameSource::Stopped,
                    timings,
                }
            }
        };

        let source = match mode {
            DisplayMode::ShowOriginal => {
                self.emit_original(frame);
                FrameSource::Original
            }
            DisplayMode::Composited | DisplayMode::Matte => {
                match self.process_guarded(frame, mode, &mut timings) {
                    Ok(source) => source,
                    Err(err) => {
                        match &err {
                            PipelineError::MaskUnavailable(_) | PipelineError::MaskTooSparse { .. } => {
                                tracing::debug!(error = %err, "No usable mask, showing original frame")
                            }
                            _ => tracing::warn!(error = %err, "Frame processing failed, showing original frame"),
                        }
                        self.emit_original(frame);
                        FrameSource::Fallback(err.kind())
                    }
                }
            }
        };

        timings.total = start.elapsed();
        let report = TickReport { source, timings };
        self.telemetry.record(timings, report.fell_back());
        report
    }

    fn apply_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.apply_event(event);
        }
    }

    fn apply_event(&mut self, event: PipelineEvent) {
        let current = match self.state {
            PipelineState::Init => self.initial_mode,
            PipelineState::Running(mode) => mode,
            PipelineState::Stopped => return,
        };
        let next = match event {
            PipelineEvent::ToggleOriginal => match current {
                DisplayMode::ShowOriginal => DisplayMode::Composited,
                _ => DisplayMode::ShowOriginal,
            },
            PipelineEvent::ToggleMatte => match current {
                DisplayMode::Matte => DisplayMode::Composited,
                _ => DisplayMode::Matte,
            },
            PipelineEvent::SetMode(mode) => mode,
            PipelineEvent::SelectBackground(selection) => {
                tracing::info!(?selection, "Background selected");
                if let Err(err) = self.background.select(selection) {
                    tracing::warn!(error = %err, "Background unavailable, using live blur");
                }
                current
            }
            PipelineEvent::SetOverlay(overlay) => {
                self.compositor.set_overlay(overlay);
                current
            }
            PipelineEvent::Stop => {
                self.stop();
                return;
            }
        };

        if next != current {
            tracing::info!(from = ?current, to = ?next, "Display mode changed");
        }
        self.state = match self.state {
            PipelineState::Init => {
                self.initial_mode = next;
                PipelineState::Init
            }
            _ => PipelineState::Running(next),
        };
    }

    fn emit_original(&mut self, frame: &RgbaImage) {
        ensure_rgba(&mut self.output, frame.width(), frame.height());
        let out: &mut [u8] = &mut self.output;
        out.copy_from_slice(frame.as_raw());
    }

    /// Runs the masking stages, turning a panic in any of them into
    /// `CompositingFailure` so the loop survives.
    fn process_guarded(
        &mut self,
        frame: &RgbaImage,
        mode: DisplayMode,
        timings: &mut TickTimings,
    ) -> Result<FrameSource> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Err(PipelineError::DimensionMismatch {
                expected: (width.max(1), height.max(1)),
                actual: (width, height),
            });
        }

        self.stage = "start";
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.process(frame, mode, timings)));
        match outcome {
            Ok(result) => result,
            Err(payload) => {
                let message = payload
                    .downcast_ref::<String>()
                    .cloned()
                    .or_else(|| payload.downcast_ref::<&str>().map(|s| s.to_string()))
                    .unwrap_or_else(|| "unknown panic".into());
                // Scratch state may be half written; never reuse it.
                self.has_last_good = false;
                Err(PipelineError::CompositingFailure {
                    stage: self.stage,
                    message,
                })
            }
        }
    }

    fn process(
        &mut self,
        frame: &RgbaImage,
        mode: DisplayMode,
        timings: &mut TickTimings,
    ) -> Result<FrameSource> {
        let (width, height) = frame.dimensions();

        if mode == DisplayMode::Composited {
            self.stage = "background";
            let t = Instant::now();
            self.background.refresh(frame);
            timings.background = t.elapsed();
        }

        self.stage = "inference";
        let t = Instant::now();
        let mask = self.acquire_mask(frame);
        timings.inference = t.elapsed();

        self.stage = "refine";
        let t = Instant::now();
        let refined = mask.and_then(|raw| self.refine(&raw, width, height));
        timings.refine = t.elapsed();

        let held = match refined {
            Ok(()) => {
                self.held_ticks = 0;
                if self.config.mask_hold_ticks > 0 {
                    self.last_good.copy_from(self.softener.softened());
                    self.has_last_good = true;
                }
                false
            }
            Err(err) => {
                let can_hold = self.has_last_good
                    && self.held_ticks < self.config.mask_hold_ticks
                    && self.last_good.dimensions() == (width, height);
                if !can_hold {
                    return Err(err);
                }
                self.held_ticks += 1;
                tracing::debug!(error = %err, held = self.held_ticks, "Reusing last good mask");
                true
            }
        };

        self.stage = "composite";
        let t = Instant::now();
        let mask = if held {
            &self.last_good
        } else {
            self.softener.softened()
        };
        let source = match mode {
            DisplayMode::Matte => {
                render_matte(mask, &mut self.output);
                FrameSource::Matte
            }
            _ => {
                self.compositor
                    .composite(frame, mask, self.background.plane(), &mut self.output);
                if held {
                    FrameSource::HeldMask
                } else {
                    FrameSource::Composited
                }
            }
        };
        timings.composite = t.elapsed();

        Ok(source)
    }

    /// Downscales the frame to model resolution and asks the source for a mask.
    fn acquire_mask(&mut self, frame: &RgbaImage) -> Result<RawMask> {
        let (mw, mh) = self
            .config
            .model_resolution(frame.width(), frame.height());
        if self.model_dims != Some((mw, mh)) {
            if self.model_dims.is_some() {
                tracing::info!(width = mw, height = mh, "Mask resolution changed, resetting model state");
                self.source.reset();
                self.has_last_good = false;
            }
            self.model_dims = Some((mw, mh));
        }

        self.frame_rescaler
            .rescale_rgba(frame, &mut self.model_input, mw, mh);
        let _span = tracing::debug_span!("inference").entered();
        let raw = self.source.acquire(&self.model_input)?;
        if raw.dimensions() != (mw, mh) {
            return Err(PipelineError::DimensionMismatch {
                expected: (mw, mh),
                actual: raw.dimensions(),
            });
        }
        Ok(raw)
    }

    /// Morphology, upscale to output resolution, feathering and the final
    /// content check. Leaves the result in the softener.
    fn refine(&mut self, raw: &RawMask, width: u32, height: u32) -> Result<()> {
        let refined = self.morphology.refine(raw)?;
        self.mask_rescaler
            .rescale_mask(refined, &mut self.upscaled, width, height);
        let softened = self.softener.soften(&self.upscaled);

        let min_alpha = self.config.min_alpha;
        let peak = softened.max_value();
        if peak <= min_alpha {
            return Err(PipelineError::MaskTooSparse {
                count: peak as usize,
                min: min_alpha as usize + 1,
            });
        }
        Ok(())
    }
}
