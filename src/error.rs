//! Error taxonomy for the per-frame pipeline.
//!
//! Every variant except `InvalidConfig` is contained within a single tick:
//! the orchestrator logs it and emits the unmodified video frame instead.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The segmentation model produced nothing for this frame, failed, or timed out.
    #[error("segmentation mask unavailable: {0}")]
    MaskUnavailable(String),

    /// The mask did not contain enough foreground to be worth compositing.
    #[error("segmentation mask too sparse: {count} foreground pixels, need {min}")]
    MaskTooSparse { count: usize, min: usize },

    /// A selected static background could not be read or decoded.
    #[error("failed to decode background {}: {source}", path.display())]
    BackgroundDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Buffers of one compositing pass disagree on resolution. Only raised by
    /// stage assertions; reaching it means a bug in the caller.
    #[error("dimension mismatch: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    /// Anything unexpected during a tick, including recovered panics.
    #[error("compositing failed in {stage}: {message}")]
    CompositingFailure { stage: &'static str, message: String },

    #[error("invalid pipeline config: {0}")]
    InvalidConfig(String),
}

impl PipelineError {
    /// Short label used in telemetry and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MaskUnavailable(_) => "mask_unavailable",
            Self::MaskTooSparse { .. } => "mask_too_sparse",
            Self::BackgroundDecode { .. } => "background_decode",
            Self::DimensionMismatch { .. } => "dimension_mismatch",
            Self::CompositingFailure { .. } => "compositing_failure",
            Self::InvalidConfig(_) => "invalid_config",
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Panics with a `DimensionMismatch` message when two grids disagree.
#[track_caller]
pub(crate) fn assert_same_dimensions(expected: (u32, u32), actual: (u32, u32)) {
    if expected != actual {
        panic!("{}", PipelineError::DimensionMismatch { expected, actual });
    }
}
