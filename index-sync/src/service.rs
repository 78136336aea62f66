//! Wires records, queue, detector and coordinator workers together.

use std::future::Future;
use std::sync::Arc;

use embedding_client::Embedder;
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use vector_index::VectorIndex;

use crate::config::SyncConfig;
use crate::coordinator::{IndexingCoordinator, MutationReport, StatsSnapshot};
use crate::detector::{ChangeDetector, DetectorSignal};
use crate::errors::{Result, SyncError};
use crate::filter::PathFilter;
use crate::queue::EventQueue;
use crate::reconcile::{ReconcileReport, reconcile};
use crate::records::RecordStore;

/// Point-in-time view for the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SyncHealth {
    pub watch_root: String,
    pub queue_depth: usize,
    pub in_flight: usize,
    pub records: usize,
    pub stats: StatsSnapshot,
}

/// Cloneable entry point for request handlers.
#[derive(Clone)]
pub struct SyncHandle {
    coordinator: Arc<IndexingCoordinator>,
    queue: Arc<EventQueue>,
    signals: UnboundedSender<DetectorSignal>,
    manual_batch_max: usize,
}

impl SyncHandle {
    fn check_batch(&self, paths: &[String]) -> Result<()> {
        if paths.len() > self.manual_batch_max {
            return Err(SyncError::BatchTooLarge {
                got: paths.len(),
                max: self.manual_batch_max,
            });
        }
        Ok(())
    }

    /// Indexes the paths now and waits for every mutation to finish.
    pub async fn index_paths(&self, paths: &[String]) -> Result<MutationReport> {
        self.check_batch(paths)?;
        Ok(self.coordinator.index_paths(paths).await)
    }

    /// Removes index entries for the paths now. Files are not touched.
    pub async fn remove_paths(&self, paths: &[String]) -> Result<MutationReport> {
        self.check_batch(paths)?;
        Ok(self.coordinator.remove_paths(paths).await)
    }

    /// Asks the service to run a reconciliation scan in the background.
    pub fn request_rescan(&self) -> Result<()> {
        self.signals
            .send(DetectorSignal::Rescan)
            .map_err(|_| SyncError::WatchLost("sync service stopped".into()))
    }

    pub async fn health(&self) -> SyncHealth {
        SyncHealth {
            watch_root: self.coordinator.root().to_string(),
            queue_depth: self.queue.len(),
            in_flight: self.coordinator.in_flight(),
            records: self.coordinator.records().len().await,
            stats: self.coordinator.stats(),
        }
    }
}

pub struct SyncService {
    coordinator: Arc<IndexingCoordinator>,
    queue: Arc<EventQueue>,
    detector: Option<ChangeDetector>,
    workers: JoinSet<()>,
    signals_tx: UnboundedSender<DetectorSignal>,
    signals_rx: UnboundedReceiver<DetectorSignal>,
    manual_batch_max: usize,
}

impl SyncService {
    /// Loads records, starts the watch, runs the startup reconciliation scan
    /// and spawns the coordinator workers.
    ///
    /// The watch starts before the scan so that nothing changing during the
    /// scan is missed; duplicates coalesce in the queue.
    pub async fn start(
        cfg: SyncConfig,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
    ) -> Result<Self> {
        let records = Arc::new(RecordStore::open(&cfg.state_path).await?);
        let filter = PathFilter::new(&cfg.watch_root, &cfg.exclude)?;
        let coordinator = Arc::new(IndexingCoordinator::new(
            cfg.root_key(),
            filter.clone(),
            embedder,
            index,
            records.clone(),
            cfg.retry,
        ));
        let queue = EventQueue::new();
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();

        let detector = ChangeDetector::start(&cfg, filter.clone(), queue.clone(), signals_tx.clone())?;
        let report = reconcile(&cfg.root_key(), &filter, &records, &queue).await?;
        info!(
            target: "index_sync::service",
            drift = report.drift(),
            "startup reconciliation queued"
        );

        let mut workers = JoinSet::new();
        for worker in 0..cfg.workers {
            workers.spawn(coordinator.clone().run_worker(queue.clone(), worker));
        }
        info!(target: "index_sync::service", workers = cfg.workers, "sync service started");

        Ok(Self {
            coordinator,
            queue,
            detector: Some(detector),
            workers,
            signals_tx,
            signals_rx,
            manual_batch_max: cfg.manual_batch_max,
        })
    }

    pub fn handle(&self) -> SyncHandle {
        SyncHandle {
            coordinator: self.coordinator.clone(),
            queue: self.queue.clone(),
            signals: self.signals_tx.clone(),
            manual_batch_max: self.manual_batch_max,
        }
    }

    fn rescan(&self) -> impl Future<Output = Result<ReconcileReport>> + Send + 'static {
        let coordinator = self.coordinator.clone();
        let queue = self.queue.clone();
        async move {
            reconcile(
                coordinator.root(),
                coordinator.filter(),
                coordinator.records(),
                &queue,
            )
            .await
        }
    }

    /// Runs until `shutdown` resolves (graceful, `Ok`) or the watch or a
    /// worker is lost (`Err`, fatal).
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);
        let outcome = loop {
            tokio::select! {
                _ = &mut shutdown => break Ok(()),
                signal = self.signals_rx.recv() => match signal {
                    Some(DetectorSignal::Rescan) => {
                        if let Err(e) = self.rescan().await {
                            break Err(e);
                        }
                    }
                    Some(DetectorSignal::Lost(reason)) => break Err(SyncError::WatchLost(reason)),
                    None => break Err(SyncError::WatchLost("signal channel closed".into())),
                },
                joined = self.workers.join_next() => {
                    let reason = match joined {
                        Some(Err(e)) => format!("coordinator worker failed: {e}"),
                        _ => "coordinator worker exited".to_string(),
                    };
                    break Err(SyncError::WatchLost(reason));
                }
            }
        };

        match &outcome {
            Ok(()) => info!(target: "index_sync::service", "shutting down sync service"),
            Err(e) => error!(target: "index_sync::service", error = %e, "sync service failed"),
        }
        self.stop().await;
        outcome
    }

    async fn stop(&mut self) {
        self.detector.take();
        self.queue.close();
        while let Some(joined) = self.workers.join_next().await {
            if let Err(e) = joined {
                warn!(target: "index_sync::service", error = %e, "worker ended abnormally");
            }
        }
    }
}
