use crate::{server::SharedState, session::StreamSession};
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::StreamExt;

pub async fn video_ws(ws: WebSocketUpgrade, State(state): State<SharedState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: SharedState) {
    let guard = state.registry.open();
    tracing::info!(
        session_id = guard.id(),
        active_sessions = state.registry.active_sessions(),
        "WebSocket connection accepted"
    );

    let session = StreamSession::new(guard.id(), state.detector.clone())
        .with_metrics(state.metrics.clone());
    let (sender, receiver) = socket.split();

    if let Err(e) = session.run(receiver, sender).await {
        tracing::debug!(session_id = guard.id(), "Session ended: {}", e);
    }
}
