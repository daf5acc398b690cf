//! Per-tick timing and frame-rate reporting.
//!
//! Timings are for display and logging only; nothing in the pipeline reacts
//! to them.

use std::time::Duration;

/// Wall-clock cost of each stage of one tick. Stages that did not run are zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TickTimings {
    pub background: Duration,
    pub inference: Duration,
    pub refine: Duration,
    pub composite: Duration,
    pub total: Duration,
}

impl TickTimings {
    fn accumulate(&mut self, other: &TickTimings) {
        self.background += other.background;
        self.inference += other.inference;
        self.refine += other.refine;
        self.composite += other.composite;
        self.total += other.total;
    }
}

/// Exponentially smoothed frames-per-second estimate.
#[derive(Debug, Clone)]
pub struct FpsMeter {
    smoothing: f64,
    fps: Option<f64>,
}

impl FpsMeter {
    pub fn new(smoothing: f64) -> Self {
        Self {
            smoothing: smoothing.clamp(0.0, 0.99),
            fps: None,
        }
    }

    pub fn record(&mut self, frame_time: Duration) {
        let secs = frame_time.as_secs_f64();
        if secs <= 0.0 {
            return;
        }
        let instant = 1.0 / secs;
        self.fps = Some(match self.fps {
            Some(prev) => prev * self.smoothing + instant * (1.0 - self.smoothing),
            None => instant,
        });
    }

    pub fn fps(&self) -> f64 {
        self.fps.unwrap_or(0.0)
    }
}

impl Default for FpsMeter {
    fn default() -> Self {
        Self::new(0.9)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySummary {
    pub ticks: u64,
    pub fallbacks: u64,
    pub avg_background_ms: f64,
    pub avg_inference_ms: f64,
    pub avg_refine_ms: f64,
    pub avg_composite_ms: f64,
    pub avg_total_ms: f64,
    pub fps: f64,
}

/// Aggregates tick timings and logs a summary every `interval` ticks.
#[derive(Debug)]
pub struct Telemetry {
    interval: u64,
    ticks: u64,
    fallbacks: u64,
    window_ticks: u64,
    window: TickTimings,
    last: TickTimings,
    fps: FpsMeter,
}

impl Telemetry {
    pub fn new(interval: u64) -> Self {
        Self {
            interval: interval.max(1),
            ticks: 0,
            fallbacks: 0,
            window_ticks: 0,
            window: TickTimings::default(),
            last: TickTimings::default(),
            fps: FpsMeter::default(),
        }
    }

    pub fn record(&mut self, timings: TickTimings, fell_back: bool) {
        self.ticks += 1;
        self.window_ticks += 1;
        if fell_back {
            self.fallbacks += 1;
        }
        self.window.accumulate(&timings);
        self.last = timings;
        self.fps.record(timings.total);

        if self.ticks % self.interval == 0 {
            let s = self.summary();
            tracing::info!(
                "Frame {}: background={:.1}ms, inference={:.1}ms, refine={:.1}ms, composite={:.1}ms, total={:.1}ms, fps={:.1}, fallbacks={}",
                s.ticks,
                s.avg_background_ms,
                s.avg_inference_ms,
                s.avg_refine_ms,
                s.avg_composite_ms,
                s.avg_total_ms,
                s.fps,
                s.fallbacks
            );
            self.window = TickTimings::default();
            self.window_ticks = 0;
        }
    }

    /// Averages over the current reporting window.
    pub fn summary(&self) -> TelemetrySummary {
        let n = self.window_ticks.max(1) as f64;
        let avg = |d: Duration| d.as_secs_f64() * 1000.0 / n;
        TelemetrySummary {
            ticks: self.ticks,
            fallbacks: self.fallbacks,
            avg_background_ms: avg(self.window.background),
            avg_inference_ms: avg(self.window.inference),
            avg_refine_ms: avg(self.window.refine),
            avg_composite_ms: avg(self.window.composite),
            avg_total_ms: avg(self.window.total),
            fps: self.fps.fps(),
        }
    }

    pub fn last(&self) -> &TickTimings {
        &self.last
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn fallbacks(&self) -> u64 {
        self.fallbacks
    }

    pub fn fps(&self) -> f64 {
        self.fps.fps()
    }
}
