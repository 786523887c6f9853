//! Ingestion service
//!
//! Entry point for the calling layer: it hands over resolved local file paths
//! and gets back a [`RunSummary`] or the first file error. Stock files are
//! grouped by snapshot date and processed one date at a time so the
//! reference sales cache warms in date order.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::db::Database;
use crate::error::{PipelineError, Result};
use crate::ingest::{parse_po_file, PoSnapshotStore, StockSnapshotWriter};
use crate::orchestrator::Orchestrator;
use crate::stock_health::{Pipeline, StockHealthPipeline};

/// Outcome of one service invocation
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub task: &'static str,
    pub files: usize,
    pub rows: usize,
    pub elapsed_ms: u64,
}

fn file_name(path: &Path) -> Result<&str> {
    path.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| PipelineError::invalid_file(path, "file name is not valid UTF-8"))
}

fn join_error(err: tokio::task::JoinError) -> PipelineError {
    PipelineError::Join(err.to_string())
}

pub struct IngestionService {
    config: PipelineConfig,
    pipeline: Arc<StockHealthPipeline>,
    stock_writer: StockSnapshotWriter,
    po_store: PoSnapshotStore,
    orchestrator: Orchestrator,
}

impl IngestionService {
    /// Build the service; rejects a configuration that fails
    /// [`PipelineConfig::validate`].
    pub fn new(config: PipelineConfig, db: Database) -> Result<Self> {
        config
            .validate()
            .map_err(|e| PipelineError::Validation(format!("{:#}", e)))?;
        let pipeline = Arc::new(StockHealthPipeline::new(&config)?);
        let worker_count = i64::try_from(config.worker_count).unwrap_or(i64::MAX);
        Ok(Self {
            stock_writer: StockSnapshotWriter::new(db.clone(), config.batch_size),
            po_store: PoSnapshotStore::new(db, config.batch_size),
            orchestrator: Orchestrator::new(worker_count),
            pipeline,
            config,
        })
    }

    pub fn pipeline(&self) -> &StockHealthPipeline {
        &self.pipeline
    }

    pub fn po_store(&self) -> &PoSnapshotStore {
        &self.po_store
    }

    /// Group stock files by snapshot date, oldest first. Fails on the first
    /// file without a valid date prefix, before any work starts.
    pub fn group_by_date(&self, files: Vec<PathBuf>) -> Result<BTreeMap<NaiveDate, Vec<PathBuf>>> {
        let mut groups: BTreeMap<NaiveDate, Vec<PathBuf>> = BTreeMap::new();
        for path in files {
            let date = file_name(&path)
                .and_then(|name| self.pipeline.snapshot_date(name))
                .map_err(|e| e.in_file(&path))?;
            groups.entry(date).or_default().push(path);
        }
        Ok(groups)
    }

    /// Transform and ingest stock health files.
    pub async fn run_stock(&self, cancel: &CancellationToken, files: Vec<PathBuf>) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let groups = self.group_by_date(files)?;
        let rows = Arc::new(AtomicUsize::new(0));
        let mut processed = 0;

        let span = info_span!("stock_run", %run_id, dates = groups.len());
        async {
            for (date, files) in groups {
                info!(%date, files = files.len(), "Processing snapshot date");
                let pipeline = Arc::clone(&self.pipeline);
                let writer = self.stock_writer.clone();
                let rows = Arc::clone(&rows);

                processed += self
                    .orchestrator
                    .run(
                        StockHealthPipeline::NAME,
                        cancel,
                        files,
                        self.config.stock_max_workers,
                        move |path, token| {
                            let pipeline = Arc::clone(&pipeline);
                            let writer = writer.clone();
                            let rows = Arc::clone(&rows);
                            async move {
                                let name = file_name(&path)?.to_string();
                                let transformed = tokio::task::spawn_blocking(move || {
                                    pipeline.transform(&token, &path)
                                })
                                .await
                                .map_err(join_error)??;
                                let stats = writer.ingest_file(&name, &transformed).await?;
                                rows.fetch_add(stats.upserted, Ordering::SeqCst);
                                Ok(())
                            }
                        },
                    )
                    .await?;
            }
            Ok::<(), PipelineError>(())
        }
        .instrument(span)
        .await?;

        Ok(self.summarize(run_id, StockHealthPipeline::NAME, processed, &rows, started))
    }

    /// Parse and ingest PO snapshot files.
    pub async fn run_po(&self, cancel: &CancellationToken, files: Vec<PathBuf>) -> Result<RunSummary> {
        const TASK: &str = "po_snapshot";
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let rows = Arc::new(AtomicUsize::new(0));

        let config = Arc::new(self.config.clone());
        let store = self.po_store.clone();
        let counter = Arc::clone(&rows);

        let processed = self
            .orchestrator
            .run(TASK, cancel, files, None, move |path, token| {
                let config = Arc::clone(&config);
                let store = store.clone();
                let rows = Arc::clone(&counter);
                async move {
                    let name = file_name(&path)?.to_string();
                    let records = tokio::task::spawn_blocking(move || parse_po_file(&path, &config))
                        .await
                        .map_err(join_error)??;
                    if token.is_cancelled() {
                        return Err(PipelineError::Cancelled);
                    }
                    let stats = store.ingest_file(&name, &records).await?;
                    rows.fetch_add(stats.upserted, Ordering::SeqCst);
                    Ok(())
                }
            })
            .instrument(info_span!("po_run", %run_id))
            .await?;

        Ok(self.summarize(run_id, TASK, processed, &rows, started))
    }

    fn summarize(
        &self,
        run_id: Uuid,
        task: &'static str,
        files: usize,
        rows: &AtomicUsize,
        started: Instant,
    ) -> RunSummary {
        let summary = RunSummary {
            run_id,
            task,
            files,
            rows: rows.load(Ordering::SeqCst),
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        info!(
            run_id = %summary.run_id,
            task = summary.task,
            files = summary.files,
            rows = summary.rows,
            elapsed_ms = summary.elapsed_ms,
            "Ingestion run complete"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    fn service(download: &Path) -> IngestionService {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgresql://localhost/unused")
            .unwrap();
        let config = PipelineConfig::builder().download_dir(download).build();
        IngestionService::new(config, Database::from_pool(pool, 2)).unwrap()
    }

    #[tokio::test]
    async fn test_new_rejects_oversized_batch() {
        let dir = tempfile::tempdir().unwrap();
        let pool = PgPoolOptions::new()
            .connect_lazy("postgresql://localhost/unused")
            .unwrap();
        let config = PipelineConfig::builder()
            .download_dir(dir.path())
            .batch_size(crate::config::MAX_BATCH_SIZE + 1)
            .build();

        let err = IngestionService::new(config, Database::from_pool(pool, 2))
            .err()
            .expect("oversized batch must be rejected");
        assert!(matches!(err, PipelineError::Validation(ref msg) if msg.contains("Batch size")));
    }

    #[tokio::test]
    async fn test_group_by_date_orders_dates() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let groups = service
            .group_by_date(vec![
                PathBuf::from("20250302_001 Miss Glam Jambi.csv"),
                PathBuf::from("20250301_002 Miss Glam Duri.csv"),
                PathBuf::from("20250301_001 Miss Glam Padang.csv"),
            ])
            .unwrap();

        let dates: Vec<String> = groups.keys().map(|d| d.to_string()).collect();
        assert_eq!(dates, vec!["2025-03-01", "2025-03-02"]);
        assert_eq!(groups.values().next().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_undated_file_fails_before_work() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let err = service
            .run_stock(
                &CancellationToken::new(),
                vec![
                    PathBuf::from("20250301_001 Miss Glam Padang.csv"),
                    PathBuf::from("stock jambi.csv"),
                ],
            )
            .await
            .unwrap_err();
        assert_eq!(err.file(), Some(Path::new("stock jambi.csv")));
    }

    #[tokio::test]
    async fn test_empty_run_summary() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let summary = service.run_po(&CancellationToken::new(), Vec::new()).await.unwrap();
        assert_eq!(summary.files, 0);
        assert_eq!(summary.rows, 0);
        assert_eq!(summary.task, "po_snapshot");
    }

    #[tokio::test]
    async fn test_invalid_stock_file_fails_before_database() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("20250301_001 Miss Glam Jambi.txt");
        std::fs::write(&bad, "SKU\nX-1\n").unwrap();

        let err = service(dir.path())
            .run_stock(&CancellationToken::new(), vec![bad.clone()])
            .await
            .unwrap_err();
        assert_eq!(err.file(), Some(bad.as_path()));
    }
}
