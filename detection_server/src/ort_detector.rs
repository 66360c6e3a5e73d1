use crate::{
    config::{ModelConfig, Validatable},
    detector::{Detector, InferenceError, RawPrediction},
    labels::LabelSet,
};
use image::{imageops::FilterType, RgbImage};
use ndarray::{Array, ArrayView2, Axis, Ix3, Ix4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};
use thiserror::Error;

const OUTPUT_NAME: &str = "output0";

#[derive(Error, Debug)]
pub enum OrtDetectorError {
    #[error("ONNX runtime error: {0}")]
    Ort(#[from] ort::Error),
    #[error("Model output has {outputs} classes but only {labels} labels are loaded")]
    LabelMismatch { outputs: usize, labels: usize },
}

#[derive(Debug, Clone, Copy)]
struct Thresholds {
    min_probability: f32,
    iou: f32,
}

fn intersection(box1: &RawPrediction, box2: &RawPrediction) -> f32 {
    let width = box1.bbox[2].min(box2.bbox[2]) - box1.bbox[0].max(box2.bbox[0]);
    let height = box1.bbox[3].min(box2.bbox[3]) - box1.bbox[1].max(box2.bbox[1]);
    width.max(0.) * height.max(0.)
}

fn area(prediction: &RawPrediction) -> f32 {
    (prediction.bbox[2] - prediction.bbox[0]) * (prediction.bbox[3] - prediction.bbox[1])
}

fn iou(box1: &RawPrediction, box2: &RawPrediction) -> f32 {
    let inter = intersection(box1, box2);
    let union = area(box1) + area(box2) - inter;
    if union <= 0. {
        0.
    } else {
        inter / union
    }
}

fn transform_image(image: &RgbImage, input_size: u32) -> Result<Array<f32, Ix4>, InferenceError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(InferenceError::InvalidInput(format!(
            "image has zero extent ({}x{})",
            width, height
        )));
    }

    let resized = image::imageops::resize(image, input_size, input_size, FilterType::CatmullRom);

    let size = input_size as usize;
    let mut input = Array::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let x = x as usize;
        let y = y as usize;
        let [r, g, b] = pixel.0;
        input[[0, 0, y, x]] = (r as f32) / 255.;
        input[[0, 1, y, x]] = (g as f32) / 255.;
        input[[0, 2, y, x]] = (b as f32) / 255.;
    }

    Ok(input)
}

/// Decodes a `[anchors, 4 + classes]` YOLOv8 output into source-image
/// predictions, keeping the detector's confidence order after per-class
/// non-maximum suppression.
fn extract_predictions(
    output: ArrayView2<f32>,
    input_size: u32,
    image_width: u32,
    image_height: u32,
    thresholds: Thresholds,
) -> Vec<RawPrediction> {
    let scale_x = image_width as f32 / input_size as f32;
    let scale_y = image_height as f32 / input_size as f32;
    let max_x = image_width as f32;
    let max_y = image_height as f32;

    let mut boxes = Vec::new();
    for row in output.axis_iter(Axis(0)) {
        let best = row
            .iter()
            .skip(4)
            .copied()
            .enumerate()
            .reduce(|accum, candidate| if candidate.1 > accum.1 { candidate } else { accum });

        let Some((class_id, prob)) = best else {
            continue;
        };
        if prob < thresholds.min_probability {
            continue;
        }

        let xc = row[0] * scale_x;
        let yc = row[1] * scale_y;
        let w = row[2] * scale_x;
        let h = row[3] * scale_y;

        boxes.push(RawPrediction {
            bbox: [
                (xc - w / 2.).clamp(0., max_x),
                (yc - h / 2.).clamp(0., max_y),
                (xc + w / 2.).clamp(0., max_x),
                (yc + h / 2.).clamp(0., max_y),
            ],
            class_id,
            confidence: prob,
        });
    }

    boxes.sort_by(|box1, box2| box2.confidence.total_cmp(&box1.confidence));

    let mut result: Vec<RawPrediction> = Vec::new();
    for candidate in boxes {
        let suppressed = result.iter().any(|kept| {
            kept.class_id == candidate.class_id && iou(kept, &candidate) >= thresholds.iou
        });
        if !suppressed {
            result.push(candidate);
        }
    }

    result
}

/// YOLOv8 detector backed by a small pool of ONNX Runtime sessions.
///
/// Each session sits behind its own mutex and calls are spread round-robin,
/// so concurrent frames only contend when they land on the same instance.
#[derive(Clone)]
pub struct OrtDetector {
    sessions: Arc<Vec<Mutex<Session>>>,
    counter: Arc<AtomicUsize>,
    labels: LabelSet,
    input_size: u32,
    thresholds: Thresholds,
}

impl OrtDetector {
    pub fn new(model_config: &ModelConfig, labels: LabelSet) -> Result<Self, OrtDetectorError> {
        ort::init().with_name("detection_server").commit()?;

        let num_instances = model_config.num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(model_config.get_path())?;
                Ok(Mutex::new(session))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        tracing::info!(
            "Created {} ONNX sessions from {:?}",
            num_instances,
            model_config.get_path()
        );

        Ok(Self {
            sessions: Arc::new(sessions),
            counter: Arc::new(AtomicUsize::new(0)),
            labels,
            input_size: model_config.input_size,
            thresholds: Thresholds {
                min_probability: model_config.min_probability,
                iou: model_config.iou_threshold,
            },
        })
    }

    fn run_inference(&self, input: &Array<f32, Ix4>) -> Result<ndarray::ArrayD<f32>, InferenceError> {
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|e| InferenceError::SessionUnavailable(format!("session mutex poisoned: {}", e)))?;

        tracing::debug!("Handling frame with session {}", index);
        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| InferenceError::InvalidInput(format!("failed to build tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| InferenceError::Runtime(e.to_string()))?;

        let (shape, data) = outputs[OUTPUT_NAME]
            .try_extract_tensor::<f32>()
            .map_err(|e| InferenceError::Output(format!("failed to extract tensor: {}", e)))?;

        ndarray::ArrayD::from_shape_vec(shape.to_ixdyn(), data.to_vec())
            .map_err(|e| InferenceError::Output(format!("invalid tensor shape: {}", e)))
    }
}

impl Detector for OrtDetector {
    fn infer(&self, image: &RgbImage) -> Result<Vec<RawPrediction>, InferenceError> {
        let input = transform_image(image, self.input_size)?;
        let outputs = self.run_inference(&input)?;

        let outputs = outputs
            .into_dimensionality::<Ix3>()
            .map_err(|e| InferenceError::Output(format!("expected [1, 4 + classes, anchors]: {}", e)))?;
        if outputs.shape()[0] == 0 || outputs.shape()[1] <= 4 {
            return Err(InferenceError::Output(format!(
                "unexpected output shape {:?}",
                outputs.shape()
            )));
        }

        let classes = outputs.shape()[1] - 4;
        if classes > self.labels.len() {
            return Err(InferenceError::Output(
                OrtDetectorError::LabelMismatch {
                    outputs: classes,
                    labels: self.labels.len(),
                }
                .to_string(),
            ));
        }

        let output = outputs.index_axis(Axis(0), 0).reversed_axes();
        let (width, height) = image.dimensions();

        Ok(extract_predictions(
            output,
            self.input_size,
            width,
            height,
            self.thresholds,
        ))
    }

    fn labels(&self) -> &LabelSet {
        &self.labels
    }
}
