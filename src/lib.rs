//! Real-time background replacement for a webcam stream.
//!
//! A segmentation model supplies a coarse person mask each frame; this crate
//! cleans the mask up (threshold, mirror, 3x3 opening), scales it to the
//! video resolution, feathers its edges and blends the live frame over a
//! replacement background.

pub mod background;
pub mod capture;
pub mod composite;
pub mod config;
pub mod error;
pub mod imaging;
pub mod mask;
pub mod output;
pub mod pipeline;
pub mod segmentation;
pub mod telemetry;

pub use background::{BackgroundProvider, BackgroundSelection};
pub use composite::FrameCompositor;
pub use config::PipelineConfig;
pub use error::PipelineError;
pub use pipeline::{
    DisplayMode, FrameSource, MaskSource, Pipeline, PipelineControl, PipelineEvent,
    PipelineState, TickReport,
};
