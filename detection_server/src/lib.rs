mod aggregator;
mod frame_decoder;
mod ort_detector;
mod routes;
mod session;

pub mod accounts;
pub mod app;
pub mod config;
pub mod detector;
pub mod history;
pub mod labels;
pub mod registry;
pub mod server;
pub mod telemetry;

pub use aggregator::{summarize, AggregateError};
pub use app::start_app;
pub use frame_decoder::{decode_frame, DecodeError, EncodedFrame};
pub use ort_detector::{OrtDetector, OrtDetectorError};
pub use session::{process_frame, FrameError, SessionError, SessionState, StreamSession};
