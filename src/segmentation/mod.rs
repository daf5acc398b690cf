//! Person segmentation backends.
//!
//! A backend turns a frame that is already at mask resolution into a
//! [`RawMask`](crate::mask::RawMask) of the same size. Everything after that
//! (thresholding, cleanup, feathering) happens in the mask stages.

mod preprocess;
mod rvm;
mod types;

pub use preprocess::{InputTensor, Preprocessor};
pub use rvm::RobustVideoMatting;
pub use types::SegmentationModel;

use anyhow::{bail, Result};
use std::path::Path;

/// Loads the segmentation backend for `model_path`.
///
/// Only RobustVideoMatting ONNX exports are supported.
pub fn create_default_model<P: AsRef<Path>>(model_path: P) -> Result<Box<dyn SegmentationModel>> {
    let path = model_path.as_ref();
    if !path.is_file() {
        bail!("Segmentation model {} does not exist", path.display());
    }
    if path.extension().and_then(|ext| ext.to_str()) != Some("onnx") {
        tracing::warn!("{} has no .onnx extension, loading it anyway", path.display());
    }
    Ok(Box::new(RobustVideoMatting::new(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_model_file_is_an_error() {
        let err = create_default_model("/nonexistent/rvm.onnx")
            .err()
            .expect("missing file must not load");
        assert!(err.to_string().contains("does not exist"));
    }
}
