use crate::{
    accounts::{InMemoryAccountStore, TokenIssuer},
    config::{Config, Validatable},
    history::MediaHistoryStore,
    labels::LabelSet,
    ort_detector::OrtDetector,
    server::{HttpServer, SharedState},
    telemetry::Metrics,
};
use anyhow::Context;
use std::sync::Arc;
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Config) -> anyhow::Result<()> {
    let labels = LabelSet::load(&config.labels.get_path())
        .with_context(|| format!("failed to load labels from {:?}", config.labels.get_path()))?;
    tracing::info!("Loaded {} labels", labels.len());

    let detector = match OrtDetector::new(&config.model, labels) {
        Ok(detector) => Arc::new(detector),
        Err(e) => {
            tracing::error!("Failed to initialize detector: {:?}", e);
            return Err(e.into());
        }
    };

    let history = Arc::new(
        MediaHistoryStore::open(&config.storage.media_dir).context("failed to open media storage")?,
    );
    let metrics = Arc::new(Metrics::new()?);

    let accounts = Arc::new(InMemoryAccountStore::new());
    let tokens = Arc::new(TokenIssuer::new(
        &config.auth.token_secret,
        config.auth.token_ttl_secs,
    ));

    let state = SharedState::new(
        detector,
        history,
        accounts,
        tokens,
        metrics,
        config.storage.max_upload_bytes,
    );
    let server = HttpServer::new(state, &config.server).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_handle = server.run(shutdown_tx.subscribe()).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    server_handle.await??;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
