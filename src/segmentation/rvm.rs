use super::preprocess::Preprocessor;
use super::types::SegmentationModel;
use crate::mask::RawMask;
use anyhow::{anyhow, Context, Result};
use image::RgbaImage;
use ndarray::Array4;
use ort::execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;

/// RobustVideoMatting segmentation model
///
/// This model uses recurrent connections to maintain temporal consistency.
/// Hidden states (r1-r4) are carried between frames for smooth results.
pub struct RobustVideoMatting {
    session: Session,
    preprocessor: Preprocessor,
    width: u32,
    height: u32,

    // Recurrent hidden states
    // These are updated after each inference and fed back in the next frame
    r1: Option<Array4<f32>>,
    r2: Option<Array4<f32>>,
    r3: Option<Array4<f32>>,
    r4: Option<Array4<f32>>,

    // Downsample ratio for hidden states
    downsample_ratio: f32,
}

impl RobustVideoMatting {
    /// Create a new RVM model from an ONNX file
    ///
    /// # Default Configuration
    /// - Input size: 512x512 (can be adjusted for performance/quality tradeoff)
    /// - Downsample ratio: 0.25 (hidden states are 1/4 of input resolution)
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let path = model_path.as_ref();

        tracing::info!("Loading RVM model from {}", path.display());

        let session = Session::builder()
            .map_err(|e| anyhow!("Failed to create session builder: {e}"))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| anyhow!("Failed to set optimization level: {e}"))?
            .with_intra_threads(4)
            .map_err(|e| anyhow!("Failed to set intra threads: {e}"))?
            .with_execution_providers([
                TensorRTExecutionProvider::default().build(),
                CUDAExecutionProvider::default().build(),
            ])
            .map_err(|e| anyhow!("Failed to register execution providers: {e}"))?
            .commit_from_file(path)
            .map_err(|e| anyhow!("{e}"))
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        tracing::info!("RVM model loaded successfully");

        let width = 512;
        let height = 512;

        Ok(Self {
            session,
            preprocessor: Preprocessor::new(width, height),
            width,
            height,
            r1: None,
            r2: None,
            r3: None,
            r4: None,
            downsample_ratio: 0.25,
        })
    }

    /// Initialize hidden states to zeros
    fn init_hidden_states(&mut self) {
        let h = (self.height as f32 * self.downsample_ratio) as usize;
        let w = (self.width as f32 * self.downsample_ratio) as usize;

        tracing::debug!("Initializing hidden states to {}x{}", w, h);

        self.r1 = Some(Array4::zeros((1, 16, h / 2, w / 2)));
        self.r2 = Some(Array4::zeros((1, 20, h / 4, w / 4)));
        self.r3 = Some(Array4::zeros((1, 40, h / 8, w / 8)));
        self.r4 = Some(Array4::zeros((1, 64, h / 16, w / 16)));
    }

    fn hidden_state(&self, index: usize) -> Result<Tensor<f32>> {
        let state = [&self.r1, &self.r2, &self.r3, &self.r4][index]
            .as_ref()
            .ok_or_else(|| anyhow!("hidden state r{} not initialized", index + 1))?;
        array_to_tensor(state)
    }
}

fn array_to_tensor(array: &Array4<f32>) -> Result<Tensor<f32>> {
    let shape = array.shape().to_vec();
    let data: Vec<f32> = array.iter().copied().collect();
    Tensor::from_array((shape, data.into_boxed_slice()))
        .map_err(|e| anyhow!("Failed to build tensor: {e}"))
}

fn extract_state(value: &ort::value::DynValue) -> Result<Array4<f32>> {
    let (shape, data) = value
        .try_extract_tensor::<f32>()
        .map_err(|e| anyhow!("Failed to extract hidden state: {e}"))?;
    anyhow::ensure!(shape.len() == 4, "hidden state has rank {}", shape.len());
    let dims = (
        shape[0] as usize,
        shape[1] as usize,
        shape[2] as usize,
        shape[3] as usize,
    );
    Ok(Array4::from_shape_vec(dims, data.to_vec())?)
}

impl SegmentationModel for RobustVideoMatting {
    fn segment(&mut self, frame: &RgbaImage) -> Result<Option<RawMask>> {
        let _span = tracing::debug_span!("rvm_segment").entered();

        // Initialize hidden states on first frame
        if self.r1.is_none() {
            self.init_hidden_states();
        }

        let input = self.preprocessor.preprocess(frame)?;
        let src = Tensor::from_array((input.shape, input.data.into_boxed_slice()))
            .map_err(|e| anyhow!("Failed to build input tensor: {e}"))?;
        let ratio = Tensor::from_array((vec![1usize], vec![self.downsample_ratio].into_boxed_slice()))
            .map_err(|e| anyhow!("Failed to build ratio tensor: {e}"))?;
        let r1 = self.hidden_state(0)?;
        let r2 = self.hidden_state(1)?;
        let r3 = self.hidden_state(2)?;
        let r4 = self.hidden_state(3)?;

        // RVM expects: src, r1i, r2i, r3i, r4i, downsample_ratio
        let _infer_span = tracing::debug_span!("inference").entered();
        let outputs = self
            .session
            .run(ort::inputs![src, r1, r2, r3, r4, ratio])
            .map_err(|e| anyhow!("Failed to run inference: {e}"))?;
        drop(_infer_span);

        // Outputs: fgr, pha, r1o, r2o, r3o, r4o. Only the alpha matte and the
        // recurrent state are used.
        let (pha_shape, pha) = outputs[1]
            .try_extract_tensor::<f32>()
            .map_err(|e| anyhow!("Failed to extract matte: {e}"))?;
        anyhow::ensure!(pha_shape.len() == 4, "matte has rank {}", pha_shape.len());
        let matte_height = pha_shape[2] as u32;
        let matte_width = pha_shape[3] as u32;

        if pha.is_empty() {
            return Ok(None);
        }

        let (frame_width, frame_height) = frame.dimensions();
        let mask = Preprocessor::postprocess_matte(
            pha,
            matte_width,
            matte_height,
            frame_width,
            frame_height,
        )?;

        let next = [
            extract_state(&outputs[2])?,
            extract_state(&outputs[3])?,
            extract_state(&outputs[4])?,
            extract_state(&outputs[5])?,
        ];
        drop(outputs);
        let [r1, r2, r3, r4] = next;
        self.r1 = Some(r1);
        self.r2 = Some(r2);
        self.r3 = Some(r3);
        self.r4 = Some(r4);

        Ok(Some(mask))
    }

    fn reset_state(&mut self) {
        tracing::info!("Resetting RVM hidden states");
        self.r1 = None;
        self.r2 = None;
        self.r3 = None;
        self.r4 = None;
    }

    fn input_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
