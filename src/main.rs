mod telemetry;

use std::sync::Arc;

use anyhow::{Context, bail};
use api::{ApiConfig, AppState};
use embedding_client::{Embedder, EmbeddingConfig, HttpEmbedder};
use file_search::{SearchConfig, SearchOrchestrator};
use index_sync::{SyncConfig, SyncService};
use tokio::sync::watch;
use tracing::{error, info};
use vector_index::IndexConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; the process environment is authoritative.
    let _ = dotenvy::dotenv();
    telemetry::init()?;

    let embedding_cfg = EmbeddingConfig::from_env().context("embedding configuration")?;
    let index_cfg = IndexConfig::from_env().context("vector index configuration")?;
    let sync_cfg = SyncConfig::from_env().context("sync configuration")?;
    let search_cfg = SearchConfig::from_env().context("search configuration")?;
    let api_cfg = ApiConfig::from_env().context("api configuration")?;

    if embedding_cfg.dim != index_cfg.dim {
        bail!(
            "embedding dimension {} does not match vector index dimension {}",
            embedding_cfg.dim,
            index_cfg.dim
        );
    }

    let embedder: Arc<dyn Embedder> =
        Arc::new(HttpEmbedder::new(embedding_cfg).context("embedding client")?);
    embedding_client::verify_dimension(embedder.as_ref())
        .await
        .context("embedding service dimension check")?;

    let index = vector_index::connect(&index_cfg).context("vector index")?;
    index
        .ensure_collection()
        .await
        .context("vector collection check")?;

    info!(root = %sync_cfg.watch_root.display(), "starting sync service");
    let sync = SyncService::start(sync_cfg, embedder.clone(), index.clone())
        .await
        .context("sync service startup")?;
    let search = Arc::new(SearchOrchestrator::new(embedder, index, search_cfg));
    let state = AppState::new(search, sync.handle());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let wait_shutdown = |mut rx: watch::Receiver<bool>| async move {
        let _ = rx.wait_for(|stop| *stop).await;
    };

    let mut sync_task = tokio::spawn(sync.run(wait_shutdown(shutdown_rx.clone())));
    let mut api_task = tokio::spawn({
        let shutdown = wait_shutdown(shutdown_rx);
        async move { api::start(state, &api_cfg, shutdown).await }
    });

    let failure = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            None
        }
        res = &mut sync_task => Some(match res {
            Ok(Ok(())) => anyhow::anyhow!("sync service exited"),
            Ok(Err(e)) => anyhow::Error::new(e).context("sync service"),
            Err(e) => anyhow::Error::new(e).context("sync task"),
        }),
        res = &mut api_task => Some(match res {
            Ok(Ok(())) => anyhow::anyhow!("http api exited"),
            Ok(Err(e)) => anyhow::Error::new(e).context("http api"),
            Err(e) => anyhow::Error::new(e).context("api task"),
        }),
    };

    let _ = shutdown_tx.send(true);
    if !sync_task.is_finished() {
        if let Ok(Err(e)) = sync_task.await {
            error!(error = %e, "sync service stopped with error");
        }
    }
    if !api_task.is_finished() {
        if let Ok(Err(e)) = api_task.await {
            error!(error = %e, "http api stopped with error");
        }
    }

    match failure {
        Some(e) => {
            error!(error = %e, "fatal");
            Err(e)
        }
        None => Ok(()),
    }
}
