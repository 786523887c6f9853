//! Reference-store sales, cached per snapshot date

use chrono::NaiveDate;
use std::collections::HashMap;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::error::{PipelineError, Result};
use crate::normalize::{open_delimited, store_name_from_filename, ColumnMap, StockField};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceSales {
    pub daily_sales: f64,
    pub max_daily_sales: f64,
}

/// SKU -> reference-store sales
pub type ReferenceSalesMap = HashMap<String, ReferenceSales>;

/// Get-or-compute cache of reference sales keyed by snapshot date.
///
/// The lock is held while a date is computed, so each date is scanned once
/// even when several workers ask for it together. Failed computations are
/// not cached.
#[derive(Debug, Default)]
pub struct ReferenceSalesCache {
    entries: Mutex<HashMap<NaiveDate, Arc<ReferenceSalesMap>>>,
}

impl ReferenceSalesCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_compute<F>(&self, date: NaiveDate, compute: F) -> Result<Arc<ReferenceSalesMap>>
    where
        F: FnOnce() -> Result<ReferenceSalesMap>,
    {
        let mut entries = self.entries.lock().map_err(|_| PipelineError::CachePoisoned)?;
        if let Some(hit) = entries.get(&date) {
            return Ok(Arc::clone(hit));
        }

        let computed = Arc::new(compute()?);
        entries.insert(date, Arc::clone(&computed));
        Ok(computed)
    }

    /// Number of dates currently cached
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn reference_files(
    dir: &Path,
    date_prefix: &str,
    date_layout: &str,
    reference_store: &str,
    chain_prefix: &str,
) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let is_csv = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
        if is_csv
            && name.starts_with(date_prefix)
            && store_name_from_filename(name, date_layout, chain_prefix) == reference_store
        {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Scan `dir` for the reference store's files of `date` and collect per-SKU
/// sales. `reference_store` is the normalized store key (e.g. `PADANG`).
///
/// A missing directory or no matching file yields an empty map.
pub fn scan_reference_sales(
    dir: &Path,
    date: NaiveDate,
    date_layout: &str,
    reference_store: &str,
    chain_prefix: &str,
) -> Result<ReferenceSalesMap> {
    let mut date_prefix = String::new();
    write!(date_prefix, "{}", date.format(date_layout))
        .map_err(|_| PipelineError::Validation(format!("invalid date layout '{}'", date_layout)))?;

    if !dir.is_dir() {
        warn!(dir = %dir.display(), "Reference directory missing, no sales substitution");
        return Ok(ReferenceSalesMap::new());
    }

    let files = reference_files(dir, &date_prefix, date_layout, reference_store, chain_prefix)?;
    let mut sales = ReferenceSalesMap::new();

    for path in &files {
        let mut file = open_delimited(path)?;
        let columns = ColumnMap::<StockField>::resolve(&file.headers);
        for record in file.reader.records() {
            let Ok(record) = record else { continue };
            let sku = columns.text(&record, StockField::Sku);
            if sku.is_empty() {
                continue;
            }
            sales.insert(
                sku.to_string(),
                ReferenceSales {
                    daily_sales: columns.number(&record, StockField::DailySales),
                    max_daily_sales: columns.number(&record, StockField::MaxDailySales),
                },
            );
        }
    }

    if files.is_empty() {
        warn!(%date, store = reference_store, "No reference store file for date");
    } else {
        info!(%date, files = files.len(), skus = sales.len(), "Loaded reference store sales");
    }

    Ok(sales)
}
