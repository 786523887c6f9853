//! Stock health pipeline
//!
//! Turns one per-store stock export into [`TransformedRow`]s:
//! normalize -> merge reference-store sales -> compute replenishment metrics.
//! Persistence is handled separately by [`crate::ingest::StockSnapshotWriter`].

pub mod artifacts;

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::metrics::{calculate, InventoryMetrics};
use crate::normalize::{normalize_store_name, read_stock_file, snapshot_date, StockFileContext};
use crate::reference::{
    load_contributions, load_special_skus, load_supplier_master, scan_reference_sales,
    MergedRow, ReferenceIndex, ReferenceSalesCache,
};

pub use artifacts::{format_id_decimal, ArtifactWriter};

/// Entry contract shared with the calling layer
pub trait Pipeline: Send + Sync {
    type Row: Send + 'static;

    fn name(&self) -> &'static str;

    /// Table the transformed rows are persisted into
    fn output_table(&self) -> &'static str;

    /// Cheap pre-flight check of an input path
    fn validate(&self, path: &Path) -> Result<()>;

    fn snapshot_date(&self, file_name: &str) -> Result<NaiveDate>;

    /// Produce the rows for one file. Returns [`PipelineError::Cancelled`]
    /// if `cancel` fires between stages.
    fn transform(&self, cancel: &CancellationToken, path: &Path) -> Result<Vec<Self::Row>>;
}

/// A stock row with reference merge and metrics applied
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformedRow {
    pub snapshot_date: NaiveDate,
    pub merged: MergedRow,
    pub metrics: InventoryMetrics,
}

pub struct StockHealthPipeline {
    date_layout: String,
    chain_prefix: String,
    /// Normalized reference store key, e.g. `PADANG`
    reference_store: String,
    download_dir: std::path::PathBuf,
    special_skus: HashSet<String>,
    index: ReferenceIndex,
    cache: Arc<ReferenceSalesCache>,
    artifacts: Option<ArtifactWriter>,
}

impl StockHealthPipeline {
    pub const NAME: &'static str = "stock_health";
    pub const OUTPUT_TABLE: &'static str = "daily_stock_data";

    /// Build the pipeline, loading any supplier, contribution and special-SKU
    /// files named in `config`.
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let suppliers = match &config.supplier_file {
            Some(path) => load_supplier_master(path)?,
            None => Vec::new(),
        };

        let contributions = match &config.contribution_file {
            Some(path) => load_contributions(path)?,
            None => config.contributions.clone(),
        };

        let mut special_skus = config.special_skus.clone();
        if let Some(path) = &config.special_sku_file {
            special_skus.extend(load_special_skus(path)?);
        }

        let index = ReferenceIndex::new(&config.store_chain_prefix, &contributions, suppliers);

        info!(
            reference_store = %config.reference_store,
            suppliers = index.supplier_count(),
            stores = contributions.len(),
            special_skus = special_skus.len(),
            "Stock health pipeline ready"
        );

        Ok(Self {
            date_layout: config.date_layout.clone(),
            chain_prefix: config.store_chain_prefix.clone(),
            reference_store: normalize_store_name(&config.reference_store, &config.store_chain_prefix),
            download_dir: config.download_dir.clone(),
            special_skus,
            index,
            cache: Arc::new(ReferenceSalesCache::new()),
            artifacts: config
                .intermediate_dir
                .as_ref()
                .map(|dir| ArtifactWriter::new(dir, config.persist_debug_layers)),
        })
    }

    /// Share a reference cache with other pipeline instances.
    pub fn with_reference_cache(mut self, cache: Arc<ReferenceSalesCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn reference_cache(&self) -> &Arc<ReferenceSalesCache> {
        &self.cache
    }

    pub fn file_context(&self, path: &Path) -> Result<StockFileContext> {
        StockFileContext::from_path(path, &self.date_layout, &self.chain_prefix)
    }

    fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl Pipeline for StockHealthPipeline {
    type Row = TransformedRow;

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn output_table(&self) -> &'static str {
        Self::OUTPUT_TABLE
    }

    fn validate(&self, path: &Path) -> Result<()> {
        let meta = std::fs::metadata(path)
            .map_err(|e| PipelineError::invalid_file(path, format!("cannot stat: {}", e)))?;
        if meta.is_dir() {
            return Err(PipelineError::invalid_file(path, "is a directory"));
        }
        let is_csv = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
        if !is_csv {
            return Err(PipelineError::invalid_file(path, "expected a .csv file"));
        }
        Ok(())
    }

    fn snapshot_date(&self, file_name: &str) -> Result<NaiveDate> {
        snapshot_date(file_name, &self.date_layout)
    }

    #[instrument(skip(self, cancel), fields(pipeline = "stock_health"))]
    fn transform(&self, cancel: &CancellationToken, path: &Path) -> Result<Vec<TransformedRow>> {
        self.validate(path)?;
        let ctx = self.file_context(path)?;
        let contribution = self.index.contribution(&ctx.store);

        let normalized = read_stock_file(path, &ctx, &self.chain_prefix, contribution)?;
        if let Some(artifacts) = &self.artifacts {
            artifacts.write_base(ctx.snapshot_date, &ctx.file_name, &normalized.rows)?;
        }
        Self::check_cancelled(cancel)?;

        let reference = self.cache.get_or_compute(ctx.snapshot_date, || {
            scan_reference_sales(
                &self.download_dir,
                ctx.snapshot_date,
                &self.date_layout,
                &self.reference_store,
                &self.chain_prefix,
            )
        })?;

        let merged: Vec<MergedRow> = normalized
            .rows
            .into_iter()
            .map(|row| self.index.merge(row, &reference))
            .collect();
        if let Some(artifacts) = &self.artifacts {
            artifacts.write_merged(ctx.snapshot_date, &ctx.file_name, &merged)?;
        }
        Self::check_cancelled(cancel)?;

        let rows: Vec<TransformedRow> = merged
            .into_iter()
            .map(|merged| TransformedRow {
                snapshot_date: ctx.snapshot_date,
                metrics: calculate(&merged.row, &self.special_skus),
                merged,
            })
            .collect();
        if let Some(artifacts) = &self.artifacts {
            artifacts.write_metrics(ctx.snapshot_date, &ctx.file_name, &rows)?;
        }

        let in_reference = rows.iter().filter(|r| r.merged.in_reference_store).count();
        let open_po = rows.iter().filter(|r| r.metrics.is_open_po).count();
        info!(
            file = %ctx.file_name,
            store = %ctx.store,
            contribution,
            rows = rows.len(),
            in_reference,
            open_po,
            "Transformed stock file"
        );

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::ReferenceSales;
    use std::path::PathBuf;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    fn pipeline(download: &Path, intermediate: Option<&Path>) -> StockHealthPipeline {
        let mut builder = PipelineConfig::builder()
            .download_dir(download)
            .contribution("PADANG", 100.0)
            .contribution("JAMBI", 25.0)
            .special_sku("S-60");
        if let Some(dir) = intermediate {
            builder = builder.intermediate_dir(dir).persist_debug_layers(true);
        }
        StockHealthPipeline::new(&builder.build()).unwrap()
    }

    #[test]
    fn test_name_and_table() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path(), None);
        assert_eq!(p.name(), "stock_health");
        assert_eq!(p.output_table(), "daily_stock_data");
    }

    #[test]
    fn test_validate() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path(), None);
        let csv = write(dir.path(), "20250301_a.csv", "sku\n");
        let txt = write(dir.path(), "20250301_a.txt", "sku\n");

        assert!(p.validate(&csv).is_ok());
        assert!(p.validate(&txt).is_err());
        assert!(p.validate(dir.path()).is_err());
        assert!(p.validate(&dir.path().join("missing.csv")).is_err());
    }

    #[test]
    fn test_snapshot_date() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path(), None);
        assert_eq!(
            p.snapshot_date("20250301_001 Miss Glam Jambi.csv").unwrap(),
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
        );
        assert!(p.snapshot_date("jambi.csv").is_err());
    }

    #[test]
    fn test_transform_merges_and_calculates() {
        let download = tempfile::tempdir().unwrap();
        let intermediate = tempfile::tempdir().unwrap();
        write(
            download.path(),
            "20250301_001 Miss Glam Padang.csv",
            "SKU,Daily Sales,Max Daily Sales\nX-1,40,48\n",
        );
        let jambi = write(
            download.path(),
            "20250301_003 Miss Glam Jambi.csv",
            "Brand,SKU,Nama,Stock,Daily Sales,Max Daily Sales,Lead Time,Max Lead Time,HPP\n\
             Wardah,X-1,Serum,100,3,4,3,5,1000\n\
             Emina,S-60,Toner,10,1,2,2,3,500\n",
        );

        let p = pipeline(download.path(), Some(intermediate.path()));
        let rows = p.transform(&CancellationToken::new(), &jambi).unwrap();
        assert_eq!(rows.len(), 2);

        let x1 = &rows[0];
        assert!(x1.merged.in_reference_store);
        assert_eq!(x1.merged.row.store, "JAMBI");
        assert_eq!(x1.merged.row.daily_sales, 10.0);
        assert_eq!(x1.merged.row.max_daily_sales, 12.0);
        assert_eq!(x1.merged.orig_daily_sales, 3.0);
        // safety = ceil(12*5 - 10*3) = 30, rop = ceil(30 + 30) = 60
        assert_eq!(x1.metrics.safety_stock, 30);
        assert_eq!(x1.metrics.reorder_point, 60);

        let s60 = &rows[1];
        assert!(!s60.merged.in_reference_store);
        assert_eq!(s60.merged.row.daily_sales, 1.0);
        assert_eq!(s60.metrics.target_days_cover, 60);

        assert_eq!(p.reference_cache().len(), 1);
        let date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let name = "20250301_003 Miss Glam Jambi.csv";
        let writer = ArtifactWriter::new(intermediate.path(), true);
        for stage in [
            artifacts::STAGE_CLEANED_BASE,
            artifacts::STAGE_CLEANED_MERGED,
            artifacts::STAGE_WITH_METRICS,
        ] {
            assert!(writer.stage_path(stage, date, name).exists(), "{stage} missing");
        }
    }

    #[test]
    fn test_transform_uses_injected_cache() {
        let download = tempfile::tempdir().unwrap();
        let file = write(
            download.path(),
            "20250301_003 Miss Glam Jambi.csv",
            "SKU,Daily Sales\nX-1,3\n",
        );

        let cache = Arc::new(ReferenceSalesCache::new());
        let date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        cache
            .get_or_compute(date, || {
                let mut map = crate::reference::ReferenceSalesMap::new();
                map.insert(
                    "X-1".to_string(),
                    ReferenceSales {
                        daily_sales: 80.0,
                        max_daily_sales: 80.0,
                    },
                );
                Ok(map)
            })
            .unwrap();

        let p = pipeline(download.path(), None).with_reference_cache(Arc::clone(&cache));
        let rows = p.transform(&CancellationToken::new(), &file).unwrap();
        assert_eq!(rows[0].merged.row.daily_sales, 20.0);
    }

    #[test]
    fn test_transform_stops_when_cancelled() {
        let download = tempfile::tempdir().unwrap();
        let file = write(download.path(), "20250301_003 Miss Glam Jambi.csv", "SKU\nX-1\n");
        let p = pipeline(download.path(), None);

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            p.transform(&cancel, &file),
            Err(PipelineError::Cancelled)
        ));
    }
}
