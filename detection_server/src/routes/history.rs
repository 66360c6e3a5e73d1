use crate::{history::HistoryError, server::SharedState};
use axum::{
    body::Bytes,
    extract::{
        multipart::{Field, MultipartError},
        Multipart, Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use detection_wire::{HistoryList, HistoryRecord, StatusReply};
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinError};
use tracing::instrument;

const UPLOAD_FIELD: &str = "video";
const UPLOAD_CHUNK_BUFFER: usize = 16;

enum UploadChunk {
    Data(Bytes),
    Done,
}

#[derive(Error, Debug)]
pub enum HistoryRouteError {
    #[error("No file selected")]
    NoFile,
    #[error("Invalid multipart body: {0}")]
    Multipart(#[from] MultipartError),
    #[error("{0}")]
    Store(#[from] HistoryError),
    #[error("Storage task failed: {0}")]
    Task(#[from] JoinError),
}

impl IntoResponse for HistoryRouteError {
    fn into_response(self) -> Response {
        match self {
            HistoryRouteError::NoFile
            | HistoryRouteError::Multipart(_)
            | HistoryRouteError::Store(HistoryError::InvalidName(_)) => {
                (StatusCode::BAD_REQUEST, Json(StatusReply::fail(self.to_string()))).into_response()
            }
            HistoryRouteError::Store(_) | HistoryRouteError::Task(_) => {
                tracing::error!("History request failed: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(StatusReply::error(self.to_string())),
                )
                    .into_response()
            }
        }
    }
}

#[instrument(skip(state))]
pub async fn get_history(
    State(state): State<SharedState>,
) -> Result<Json<HistoryList>, HistoryRouteError> {
    let history = state.history.clone();
    let records = tokio::task::spawn_blocking(move || history.list()).await??;

    Ok(Json(HistoryList { history: records }))
}

#[instrument(skip(state, multipart))]
pub async fn upload_video(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Result<Json<StatusReply>, HistoryRouteError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        if file_name.is_empty() {
            return Err(HistoryRouteError::NoFile);
        }

        let record = stream_upload(&state, file_name, field).await?;
        return Ok(Json(StatusReply::with_record(record)));
    }

    Err(HistoryRouteError::NoFile)
}

/// Writes the field to disk chunk by chunk on the blocking pool. The file
/// is only recorded once the whole body has arrived.
async fn stream_upload(
    state: &SharedState,
    file_name: String,
    mut field: Field<'_>,
) -> Result<HistoryRecord, HistoryRouteError> {
    let (tx, mut rx) = mpsc::channel(UPLOAD_CHUNK_BUFFER);
    let history = state.history.clone();
    let writer = tokio::task::spawn_blocking(move || -> Result<_, HistoryError> {
        let mut upload = history.begin_upload(&file_name)?;
        while let Some(chunk) = rx.blocking_recv() {
            match chunk {
                UploadChunk::Data(data) => upload.write_chunk(&data)?,
                UploadChunk::Done => return history.commit_upload(upload).map(Some),
            }
        }
        Ok(None)
    });

    let streamed = async {
        while let Some(data) = field.chunk().await? {
            if tx.send(UploadChunk::Data(data)).await.is_err() {
                // Writer gave up; its error is reported below.
                return Ok(());
            }
        }
        let _ = tx.send(UploadChunk::Done).await;
        Ok::<_, MultipartError>(())
    }
    .await;
    drop(tx);

    let written = writer.await?;
    streamed?;
    match written? {
        Some(record) => Ok(record),
        None => Err(HistoryRouteError::NoFile),
    }
}

#[instrument(skip(state))]
pub async fn delete_history(
    State(state): State<SharedState>,
    Path(record_id): Path<u64>,
) -> Result<Json<StatusReply>, HistoryRouteError> {
    let history = state.history.clone();
    let removed = tokio::task::spawn_blocking(move || history.delete(record_id)).await??;
    if removed.is_none() {
        tracing::debug!("No history record with id {}", record_id);
    }

    Ok(Json(StatusReply::success()))
}
