use crate::server::SharedState;
use axum::{extract::State, response::IntoResponse, response::Json};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub struct Status {
    status: String,
    schema_version: u32,
    active_sessions: usize,
}

pub async fn healthcheck(State(state): State<SharedState>) -> impl IntoResponse {
    Json(Status {
        status: "Available".into(),
        schema_version: detection_wire::SCHEMA_VERSION,
        active_sessions: state.registry.active_sessions(),
    })
}
