use crate::{
    aggregator::{summarize, AggregateError},
    detector::{Detector, InferenceError},
    frame_decoder::{decode_frame, DecodeError},
    telemetry::Metrics,
};
use axum::extract::ws::Message;
use detection_wire::{ClientFrame, FrameResult};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::{fmt::Display, sync::Arc, time::Instant};
use thiserror::Error;
use tracing::instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closed,
}

/// Why a single frame produced no result. None of these end the session.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Malformed message: {0}")]
    Transport(String),
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),
    #[error("Aggregation error: {0}")]
    Aggregate(#[from] AggregateError),
    #[error("Failed to encode result: {0}")]
    Encode(#[from] serde_json::Error),
}

impl FrameError {
    pub fn reason(&self) -> &'static str {
        match self {
            FrameError::Transport(_) => "transport",
            FrameError::Decode(_) => "decode",
            FrameError::Inference(_) => "inference",
            FrameError::Aggregate(_) => "aggregate",
            FrameError::Encode(_) => "encode",
        }
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),
    #[error("Invalid transition from {0:?}")]
    InvalidTransition(SessionState),
}

/// Decode, infer and summarize one frame. Runs on the blocking pool.
pub fn process_frame(detector: &dyn Detector, data_uri: &str) -> Result<FrameResult, FrameError> {
    let image = decode_frame(data_uri)?;
    let predictions = detector.infer(&image)?;
    let result = summarize(&predictions, detector.labels())?;
    Ok(result)
}

/// One live connection.
///
/// Frames are handled strictly in arrival order, one at a time; the next
/// message is not read until the previous result has been sent.
pub struct StreamSession {
    id: u64,
    state: SessionState,
    detector: Arc<dyn Detector>,
    metrics: Option<Arc<Metrics>>,
}

impl StreamSession {
    pub fn new(id: u64, detector: Arc<dyn Detector>) -> Self {
        Self {
            id,
            state: SessionState::Connecting,
            detector,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn accept(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Connecting => {
                self.state = SessionState::Open;
                Ok(())
            }
            state => Err(SessionError::InvalidTransition(state)),
        }
    }

    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    /// Runs one receive-process cycle for a text message.
    ///
    /// `Ok(None)` means the message carried no frame and nothing is sent.
    pub async fn process_message(&self, text: &str) -> Result<Option<FrameResult>, FrameError> {
        if self.state != SessionState::Open {
            return Err(FrameError::Transport(format!(
                "session is {:?}",
                self.state
            )));
        }

        let message =
            ClientFrame::from_json(text).map_err(|e| FrameError::Transport(e.to_string()))?;
        let Some(image) = message.image else {
            return Ok(None);
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_frame_received();
        }

        let detector = Arc::clone(&self.detector);
        let started = Instant::now();
        let result = tokio::task::spawn_blocking(move || process_frame(detector.as_ref(), &image))
            .await
            .map_err(|e| InferenceError::Aborted(e.to_string()))??;

        if let Some(metrics) = &self.metrics {
            metrics.record_processing_duration(started.elapsed().as_millis() as u64);
        }

        Ok(Some(result))
    }

    /// Drives the session over a message stream and sink until the peer
    /// disconnects or a send fails.
    #[instrument(name = "session", skip_all, fields(session_id = self.id))]
    pub async fn run<R, W, E>(mut self, mut inbound: R, mut outbound: W) -> Result<(), SessionError>
    where
        R: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
        W: Sink<Message> + Unpin,
        W::Error: Display,
    {
        if self.state == SessionState::Connecting {
            self.accept()?;
        }
        tracing::info!("Session opened");

        while let Some(message) = inbound.next().await {
            let text = match message {
                Ok(Message::Text(text)) => text,
                Ok(Message::Binary(data)) => {
                    tracing::debug!("Ignoring binary message of {} bytes", data.len());
                    continue;
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                Ok(Message::Close(_)) => {
                    tracing::debug!("Client closed the connection");
                    break;
                }
                Err(e) => {
                    tracing::warn!("Transport error, closing session: {}", e);
                    break;
                }
            };

            let outcome = match self.process_message(text.as_str()).await {
                Ok(Some(result)) => result.to_json().map(Some).map_err(FrameError::from),
                other => other.map(|_| None),
            };

            match outcome {
                Ok(Some(json)) => {
                    if let Err(e) = outbound.send(Message::Text(json.into())).await {
                        self.close();
                        tracing::info!("Session closed while sending: {}", e);
                        return Err(SessionError::ConnectionClosed(e.to_string()));
                    }
                }
                Ok(None) => tracing::debug!("Message without image ignored"),
                Err(err) => {
                    tracing::warn!(reason = err.reason(), "Frame dropped: {}", err);
                    if let Some(metrics) = &self.metrics {
                        metrics.record_frame_dropped(err.reason());
                    }
                }
            }
        }

        self.close();
        tracing::info!("Session closed");
        Ok(())
    }
}
