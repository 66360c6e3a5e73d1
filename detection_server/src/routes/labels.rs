use crate::server::SharedState;
use axum::{extract::State, response::Json};
use detection_wire::LabelList;

/// Every label the detector can emit, in class-index order.
pub async fn labels(State(state): State<SharedState>) -> Json<LabelList> {
    Json(LabelList {
        labels: state.detector.labels().names().to_vec(),
    })
}
