use crate::labels::LabelSet;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Invalid input buffer: {0}")]
    InvalidInput(String),
    #[error("Model session unavailable: {0}")]
    SessionUnavailable(String),
    #[error("Inference failed: {0}")]
    Runtime(String),
    #[error("Unexpected model output: {0}")]
    Output(String),
    #[error("Inference task aborted: {0}")]
    Aborted(String),
}

/// A single prediction as produced by the model, before label resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawPrediction {
    /// `[x1, y1, x2, y2]` in source-image pixels.
    pub bbox: [f32; 4],
    pub class_id: usize,
    pub confidence: f32,
}

/// A loaded object detector.
///
/// Implementations are shared read-only between every live session, so
/// `infer` must not depend on per-call mutable state visible to other
/// callers. Calls are blocking and are expected to run off the async
/// scheduler.
pub trait Detector: Send + Sync + 'static {
    fn infer(&self, image: &RgbImage) -> Result<Vec<RawPrediction>, InferenceError>;

    fn labels(&self) -> &LabelSet;
}
