//! Stock snapshot rows

use chrono::NaiveDate;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, warn};

use super::{normalize_store_name, open_delimited, snapshot_date, store_name_from_filename};
use super::{ColumnMap, FieldSpec};
use crate::error::{PipelineError, Result};

/// Logical columns of a per-store stock export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StockField {
    Brand,
    Sku,
    ProductName,
    Store,
    Stock,
    DailySales,
    MaxDailySales,
    LeadTime,
    MaxLeadTime,
    QtyOnOrder,
    CostPrice,
    SellPrice,
    MinOrder,
}

impl FieldSpec for StockField {
    const ALL: &'static [Self] = &[
        StockField::Brand,
        StockField::Sku,
        StockField::ProductName,
        StockField::Store,
        StockField::Stock,
        StockField::DailySales,
        StockField::MaxDailySales,
        StockField::LeadTime,
        StockField::MaxLeadTime,
        StockField::QtyOnOrder,
        StockField::CostPrice,
        StockField::SellPrice,
        StockField::MinOrder,
    ];

    fn name(self) -> &'static str {
        match self {
            StockField::Brand => "brand",
            StockField::Sku => "sku",
            StockField::ProductName => "nama",
            StockField::Store => "store",
            StockField::Stock => "stock",
            StockField::DailySales => "daily_sales",
            StockField::MaxDailySales => "max_daily_sales",
            StockField::LeadTime => "lead_time",
            StockField::MaxLeadTime => "max_lead_time",
            StockField::QtyOnOrder => "sedang_po",
            StockField::CostPrice => "hpp",
            StockField::SellPrice => "harga",
            StockField::MinOrder => "min_order",
        }
    }

    fn aliases(self) -> &'static [&'static str] {
        match self {
            StockField::Brand => &["brand", "merk"],
            StockField::Sku => &["sku", "kode barang"],
            StockField::ProductName => &["nama", "product name", "nama produk", "nama barang"],
            StockField::Store => &["store", "toko", "nama store"],
            StockField::Stock => &["stock", "stok"],
            StockField::DailySales => &["daily_sales", "daily sales"],
            StockField::MaxDailySales => &["max_daily_sales", "max. daily sales", "max daily sales"],
            StockField::LeadTime => &["lead_time", "lead time"],
            StockField::MaxLeadTime => &["max_lead_time", "max. lead time", "max lead time"],
            StockField::QtyOnOrder => &["sedang_po", "sedang po", "qty on order"],
            StockField::CostPrice => &["hpp", "cost price"],
            StockField::SellPrice => &["harga", "sell price"],
            StockField::MinOrder => &["min_order", "min. order", "min order"],
        }
    }
}

/// One parsed stock line, immutable once built
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawRow {
    pub brand: String,
    pub sku: String,
    pub name: String,
    pub store: String,
    pub stock: f64,
    pub daily_sales: f64,
    pub max_daily_sales: f64,
    pub lead_time: f64,
    pub max_lead_time: f64,
    pub qty_on_order: f64,
    pub min_order: f64,
    pub cost_price: f64,
    pub sell_price: f64,
    /// Percent of reference-store sales attributed to this store
    pub contribution: f64,
}

/// Context shared by every row of one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockFileContext {
    pub file_name: String,
    pub snapshot_date: NaiveDate,
    /// Uppercased store name from the file name (may be empty)
    pub store: String,
}

impl StockFileContext {
    pub fn from_path(path: &Path, date_layout: &str, chain_prefix: &str) -> Result<Self> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| PipelineError::invalid_file(path, "file name is not valid UTF-8"))?
            .to_string();

        Ok(Self {
            snapshot_date: snapshot_date(&file_name, date_layout)?,
            store: store_name_from_filename(&file_name, date_layout, chain_prefix),
            file_name,
        })
    }
}

/// Rows of one file plus its original header
#[derive(Debug, Clone)]
pub struct NormalizedFile {
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
}

/// Parse a stock export into [`RawRow`]s, in file order.
///
/// Absent columns read as zero or empty. Lines without a SKU and malformed
/// CSV records are skipped with a log line; the row store falls back to the
/// store named in the file when the file name carries one.
pub fn read_stock_file(
    path: &Path,
    ctx: &StockFileContext,
    chain_prefix: &str,
    contribution: f64,
) -> Result<NormalizedFile> {
    let mut file = open_delimited(path)?;
    let columns = ColumnMap::<StockField>::resolve(&file.headers);
    if columns.is_empty() {
        return Err(PipelineError::invalid_file(path, "header has no recognised stock columns"));
    }

    let mut rows = Vec::new();
    let mut skipped = 0usize;

    for (line, record) in file.reader.records().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(err) => {
                warn!(file = %ctx.file_name, line = line + 2, error = %err, "Skipping malformed record");
                skipped += 1;
                continue;
            },
        };

        let sku = columns.text(&record, StockField::Sku);
        if sku.is_empty() {
            skipped += 1;
            continue;
        }

        let store = if ctx.store.is_empty() {
            normalize_store_name(columns.text(&record, StockField::Store), chain_prefix)
        } else {
            ctx.store.clone()
        };

        rows.push(RawRow {
            brand: columns.text(&record, StockField::Brand).to_string(),
            sku: sku.to_string(),
            name: columns.text(&record, StockField::ProductName).to_string(),
            store,
            stock: columns.number(&record, StockField::Stock),
            daily_sales: columns.number(&record, StockField::DailySales),
            max_daily_sales: columns.number(&record, StockField::MaxDailySales),
            lead_time: columns.number(&record, StockField::LeadTime),
            max_lead_time: columns.number(&record, StockField::MaxLeadTime),
            qty_on_order: columns.number(&record, StockField::QtyOnOrder),
            min_order: columns.number(&record, StockField::MinOrder),
            cost_price: columns.number(&record, StockField::CostPrice),
            sell_price: columns.number(&record, StockField::SellPrice),
            contribution,
        });
    }

    debug!(file = %ctx.file_name, rows = rows.len(), skipped, "Normalized stock file");

    Ok(NormalizedFile {
        headers: file.headers.iter().map(String::from).collect(),
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_context_from_path() {
        let ctx = StockFileContext::from_path(
            Path::new("/in/20250301_002 Miss Glam Pekanbaru.csv"),
            "%Y%m%d",
            "MISS GLAM",
        )
        .unwrap();
        assert_eq!(ctx.snapshot_date, NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
        assert_eq!(ctx.store, "PEKANBARU");
        assert_eq!(ctx.file_name, "20250301_002 Miss Glam Pekanbaru.csv");
    }

    #[test]
    fn test_context_requires_date() {
        let err = StockFileContext::from_path(Path::new("/in/pekanbaru.csv"), "%Y%m%d", "MISS GLAM")
            .unwrap_err();
        assert!(matches!(err, PipelineError::SnapshotDate { .. }));
    }

    #[test]
    fn test_read_stock_file_with_header_variants() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "20250301_002 Miss Glam Pekanbaru.csv",
            "Brand,SKU,Nama,Stok,Daily Sales,Max. Daily Sales,Lead Time,Max Lead Time,Sedang PO,HPP,Harga,Min. Order\n\
             Wardah,W-01,Lip Cream,\"1,200\",5,8,3,5,,15000,25000,10\n\
             Emina,,No SKU,1,1,1,1,1,0,1,1,1\n\
             Emina,E-02,Toner,abc,2.5,4,2,4,6,9000,12000,0\n",
        );
        let ctx = StockFileContext::from_path(&path, "%Y%m%d", "MISS GLAM").unwrap();

        let parsed = read_stock_file(&path, &ctx, "MISS GLAM", 60.0).unwrap();
        assert_eq!(parsed.headers.len(), 12);
        assert_eq!(parsed.rows.len(), 2);

        let first = &parsed.rows[0];
        assert_eq!(first.sku, "W-01");
        assert_eq!(first.store, "PEKANBARU");
        assert_eq!(first.stock, 1200.0);
        assert_eq!(first.max_daily_sales, 8.0);
        assert_eq!(first.qty_on_order, 0.0);
        assert_eq!(first.min_order, 10.0);
        assert_eq!(first.contribution, 60.0);

        let second = &parsed.rows[1];
        assert_eq!(second.stock, 0.0, "unparseable stock degrades to zero");
        assert_eq!(second.daily_sales, 2.5);
    }

    #[test]
    fn test_absent_columns_default_and_store_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "20250301_.csv", "sku;toko;stock\nA-1;Miss Glam Jambi;7\n");
        let ctx = StockFileContext::from_path(&path, "%Y%m%d", "MISS GLAM").unwrap();
        assert_eq!(ctx.store, "");

        let parsed = read_stock_file(&path, &ctx, "MISS GLAM", 100.0).unwrap();
        let row = &parsed.rows[0];
        assert_eq!(row.store, "JAMBI");
        assert_eq!(row.stock, 7.0);
        assert_eq!(row.daily_sales, 0.0);
        assert_eq!(row.brand, "");
    }

    #[test]
    fn test_unrecognised_header_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "20250301_x.csv", "foo,bar\n1,2\n");
        let ctx = StockFileContext::from_path(&path, "%Y%m%d", "MISS GLAM").unwrap();
        assert!(matches!(
            read_stock_file(&path, &ctx, "MISS GLAM", 100.0),
            Err(PipelineError::InvalidFile { .. })
        ));
    }
}
