use opentelemetry::{
    global,
    metrics::{Counter, Histogram, MeterProvider, UpDownCounter},
    KeyValue,
};
use prometheus::Registry;
use std::collections::HashSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogLevel;

/// JSON logs, filtered by `RUST_LOG` when set and by the configured level
/// otherwise.
pub fn init_tracing(log_level: &LogLevel) {
    let log_level = &format!("{},ort=info", log_level.as_str());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().json().with_level(true))
        .init();
}

pub struct Metrics {
    frames_received: Counter<u64>,
    frames_dropped: Counter<u64>,
    processing_duration: Histogram<u64>,
    active_sessions: UpDownCounter<i64>,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()?;

        let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();

        let meter = provider.meter("detection_server");
        global::set_meter_provider(provider);

        let frames_received = meter
            .u64_counter("frames_received_total")
            .with_description("Frames received over live sessions")
            .build();

        let frames_dropped = meter
            .u64_counter("frames_dropped_total")
            .with_description("Frames that produced no result, by reason")
            .build();

        let boundaries = generate_boundaries((5, 25, 60, 500, 1000));

        let processing_duration = meter
            .u64_histogram("frame_processing_duration_ms")
            .with_boundaries(boundaries)
            .with_description("Decode, inference and summary time per frame in milliseconds")
            .build();

        let active_sessions = meter
            .i64_up_down_counter("active_sessions")
            .with_description("Currently open streaming sessions")
            .build();

        Ok(Metrics {
            frames_received,
            frames_dropped,
            processing_duration,
            active_sessions,
            registry,
        })
    }

    pub fn record_frame_received(&self) {
        self.frames_received.add(1, &[]);
    }

    pub fn record_frame_dropped(&self, reason: &'static str) {
        let attributes = [KeyValue::new("reason", reason)];
        self.frames_dropped.add(1, &attributes);
    }

    pub fn record_processing_duration(&self, duration_ms: u64) {
        self.processing_duration.record(duration_ms, &[]);
    }

    pub fn record_session_opened(&self) {
        self.active_sessions.add(1, &[]);
    }

    pub fn record_session_closed(&self) {
        self.active_sessions.add(-1, &[]);
    }
}

fn generate_boundaries(parts: (i32, i32, i32, i32, i32)) -> Vec<f64> {
    let first_step: usize = 5;
    let middle_step: usize = 5;
    let end_step: usize = 20;
    let tail_step: usize = 100;
    let first_part = (parts.0..=parts.1).step_by(first_step);
    let middle_part = (parts.1..=parts.2).step_by(middle_step);
    let end_part = (parts.2..=parts.3).step_by(end_step);
    let tail_part = (parts.3..=parts.4).step_by(tail_step);

    let mut seen = HashSet::new();
    first_part
        .chain(middle_part)
        .chain(end_part)
        .chain(tail_part)
        .filter(|&x| seen.insert(x))
        .map(|x| x as f64)
        .collect()
}
