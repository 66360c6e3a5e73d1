use crate::{detector::RawPrediction, labels::LabelSet};
use detection_wire::{Detection, FrameResult};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AggregateError {
    #[error("Class index {class_id} is outside the label set ({labels} labels)")]
    UnknownClass { class_id: usize, labels: usize },
}

/// Resolves labels and tallies per-label counts, keeping the detector's
/// output order.
///
/// Counts are computed from the resolved detections themselves, so a
/// label can never be counted without a matching detection.
pub fn summarize(
    predictions: &[RawPrediction],
    labels: &LabelSet,
) -> Result<FrameResult, AggregateError> {
    let detections = predictions
        .iter()
        .map(|prediction| -> Result<Detection, AggregateError> {
            let label = labels
                .get(prediction.class_id)
                .ok_or(AggregateError::UnknownClass {
                    class_id: prediction.class_id,
                    labels: labels.len(),
                })?;
            Ok(Detection {
                bbox: prediction.bbox,
                label: label.to_string(),
                conf: prediction.confidence,
            })
        })
        .collect::<Result<Vec<_>, AggregateError>>()?;

    Ok(FrameResult::from_detections(detections))
}
