//! Purchase-order snapshot ingestion
//!
//! A PO export lists one line per (PO number, SKU) as of the snapshot date in
//! the file name. Lines are parsed into [`PoRecord`]s, their status is
//! reconciled against the stage timestamps, and the file is upserted into
//! `po_snapshots` keyed by (time, po_number, sku).

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use restock_common::{LifecycleStage, LifecycleTimestamps, PoStatus};
use serde::Serialize;
use sqlx::{PgConnection, QueryBuilder};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, instrument, warn};

use super::entities::{self, EntityRequest, ProductSeed};
use super::stock::snapshot_time;
use super::{DedupBatch, IngestStats};
use crate::config::{PipelineConfig, TimestampLocale, MAX_BATCH_SIZE};
use crate::db::Database;
use crate::error::{PipelineError, Result};
use crate::normalize::{
    normalize_store_name, open_delimited, parse_number, snapshot_date, ColumnMap, FieldSpec,
};

/// Amounts above this are almost always a unit or parsing mistake.
pub const MAX_PLAUSIBLE_AMOUNT: f64 = 999_999_999_999.99;

/// Logical columns of a PO export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoField {
    Sku,
    ProductName,
    PoNumber,
    Brand,
    Store,
    Supplier,
    QtyOrdered,
    UnitPrice,
    Amount,
    Status,
    Released,
    Sent,
    Approved,
    Arrived,
    Received,
    QtyReceived,
}

impl PoField {
    fn stage(stage: LifecycleStage) -> PoField {
        match stage {
            LifecycleStage::Released => PoField::Released,
            LifecycleStage::Sent => PoField::Sent,
            LifecycleStage::Approved => PoField::Approved,
            LifecycleStage::Arrived => PoField::Arrived,
            LifecycleStage::Received => PoField::Received,
        }
    }
}

impl FieldSpec for PoField {
    const ALL: &'static [Self] = &[
        PoField::Sku,
        PoField::ProductName,
        PoField::PoNumber,
        PoField::Brand,
        PoField::Store,
        PoField::Supplier,
        PoField::QtyOrdered,
        PoField::UnitPrice,
        PoField::Amount,
        PoField::Status,
        PoField::Released,
        PoField::Sent,
        PoField::Approved,
        PoField::Arrived,
        PoField::Received,
        PoField::QtyReceived,
    ];

    fn name(self) -> &'static str {
        match self {
            PoField::Sku => "SKU",
            PoField::ProductName => "Nama Produk",
            PoField::PoNumber => "No PO",
            PoField::Brand => "Brand",
            PoField::Store => "Store",
            PoField::Supplier => "Supplier",
            PoField::QtyOrdered => "Qty PO",
            PoField::UnitPrice => "Harga",
            PoField::Amount => "Amount",
            PoField::Status => "Status",
            PoField::Released => "PO Released",
            PoField::Sent => "PO Sent",
            PoField::Approved => "PO Approved",
            PoField::Arrived => "PO Arrived",
            PoField::Received => "PO Received",
            PoField::QtyReceived => "Qty Received",
        }
    }

    fn aliases(self) -> &'static [&'static str] {
        match self {
            PoField::Sku => &["sku"],
            PoField::ProductName => &["nama produk", "product name", "nama"],
            PoField::PoNumber => &["no po", "po number", "nomor po"],
            PoField::Brand => &["brand"],
            PoField::Store => &["store", "toko", "nama store"],
            PoField::Supplier => &["supplier", "nama supplier"],
            PoField::QtyOrdered => &["qty po", "quantity ordered", "qty"],
            PoField::UnitPrice => &["harga", "unit price"],
            PoField::Amount => &["amount", "total amount"],
            PoField::Status => &["status"],
            PoField::Released => &["po released", "released at"],
            PoField::Sent => &["po sent", "sent at"],
            PoField::Approved => &["po approved", "approved at"],
            PoField::Arrived => &["po arrived", "arrived at"],
            PoField::Received => &["po received", "received at"],
            PoField::QtyReceived => &["qty received", "quantity received"],
        }
    }
}

/// One PO line as of a snapshot date
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoRecord {
    pub snapshot_date: NaiveDate,
    pub po_number: String,
    pub sku: String,
    pub product_name: String,
    pub brand: String,
    pub store: String,
    pub supplier: String,
    pub qty_ordered: f64,
    pub unit_price: f64,
    pub amount: f64,
    pub qty_received: f64,
    pub status: PoStatus,
    pub stages: LifecycleTimestamps,
}

const ISO_LAYOUTS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"];

fn locale_layouts(locale: TimestampLocale) -> Vec<String> {
    let (first, second) = match locale {
        TimestampLocale::Id => ("%d", "%m"),
        TimestampLocale::Us => ("%m", "%d"),
    };
    let mut layouts = Vec::new();
    for sep in ["/", "-"] {
        // two-digit years first: `%Y` would read "25" as year 25
        for year in ["%y", "%Y"] {
            let date = format!("{first}{sep}{second}{sep}{year}");
            for time in [" %H:%M:%S", " %H:%M", ""] {
                layouts.push(format!("{date}{time}"));
            }
        }
    }
    layouts
}

/// Parse a PO stage timestamp. Blank, `-` and zero dates are absent, as is
/// anything no known layout accepts.
pub fn parse_po_timestamp(raw: &str, locale: TimestampLocale) -> Option<DateTime<Utc>> {
    let value = raw.trim();
    if value.is_empty() || value == "-" || value.starts_with("0000-00-00") {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }

    let (date, time) = match value.split_once([' ', 'T']) {
        Some((date, time)) => (date, time.trim().replace('.', ":")),
        None => (value, String::new()),
    };
    let candidate = if time.is_empty() {
        date.to_string()
    } else {
        format!("{} {}", date, time)
    };

    // only a four-digit leading year is ISO; `31-01-25` is day-first
    let iso = date.len() == 10 && date.as_bytes().get(4) == Some(&b'-');
    let layouts: Vec<String> = if iso {
        ISO_LAYOUTS.iter().chain(["%Y-%m-%d"].iter()).map(|l| l.to_string()).collect()
    } else {
        locale_layouts(locale)
    };

    for layout in &layouts {
        if layout.contains("%H") {
            if let Ok(parsed) = NaiveDateTime::parse_from_str(&candidate, layout) {
                return Some(parsed.and_utc());
            }
        } else if let Ok(parsed) = NaiveDate::parse_from_str(&candidate, layout) {
            return Some(parsed.and_time(NaiveTime::MIN).and_utc());
        }
    }

    debug!(value, "Unrecognized PO timestamp");
    None
}

fn parse_status(raw: &str) -> Option<PoStatus> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let parsed = match parse_number(raw) {
        Some(code) if code.fract() == 0.0 => PoStatus::from_code(code as i64),
        _ => raw.parse::<PoStatus>(),
    };
    match parsed {
        Ok(status) => Some(status),
        Err(err) => {
            warn!(value = raw, error = %err, "Ignoring unknown PO status");
            None
        },
    }
}

/// Parse a PO export. `No PO`, `Brand` and `Store` columns are required.
pub fn parse_po_file(path: &Path, config: &PipelineConfig) -> Result<Vec<PoRecord>> {
    let label = path.display().to_string();
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| PipelineError::invalid_file(path, "file name is not valid UTF-8"))?;
    let date = snapshot_date(file_name, &config.date_layout)?;

    let mut file = open_delimited(path)?;
    let columns = ColumnMap::<PoField>::resolve(&file.headers);
    for required in [PoField::PoNumber, PoField::Brand, PoField::Store] {
        columns.require(required, &label)?;
    }

    let mut records = Vec::new();
    let mut skipped = 0usize;
    for (line, record) in file.reader.records().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(err) => {
                warn!(file = %label, line = line + 2, error = %err, "Skipping malformed PO record");
                skipped += 1;
                continue;
            },
        };

        let sku = columns.text(&record, PoField::Sku);
        let po_number = columns.text(&record, PoField::PoNumber);
        if sku.is_empty() || po_number.is_empty() {
            warn!(file = %label, line = line + 2, "Skipping PO line without SKU or PO number");
            skipped += 1;
            continue;
        }

        let mut stages = LifecycleTimestamps::default();
        for stage in LifecycleStage::PRIORITY {
            let raw = columns.text(&record, PoField::stage(stage));
            stages.set(stage, parse_po_timestamp(raw, config.timestamp_locale));
        }

        let qty_ordered = columns.number(&record, PoField::QtyOrdered);
        let unit_price = columns.number(&record, PoField::UnitPrice);
        let amount = if columns.text(&record, PoField::Amount).is_empty() {
            qty_ordered * unit_price
        } else {
            columns.number(&record, PoField::Amount)
        };
        if amount > MAX_PLAUSIBLE_AMOUNT {
            warn!(file = %label, po_number, sku, amount, "Suspicious PO amount");
        }

        let product_name = match columns.text(&record, PoField::ProductName) {
            "" => entities::placeholder_product_name(sku),
            name => name.to_string(),
        };

        records.push(PoRecord {
            snapshot_date: date,
            po_number: po_number.to_string(),
            sku: sku.to_string(),
            product_name,
            brand: columns.text(&record, PoField::Brand).to_string(),
            store: normalize_store_name(columns.text(&record, PoField::Store), &config.store_chain_prefix),
            supplier: columns.text(&record, PoField::Supplier).to_string(),
            qty_ordered,
            unit_price,
            amount,
            qty_received: columns.number(&record, PoField::QtyReceived),
            status: PoStatus::reconcile(parse_status(columns.text(&record, PoField::Status)), &stages),
            stages,
        });
    }

    info!(file = %label, records = records.len(), skipped, "Parsed PO file");
    Ok(records)
}

const PO_COLUMNS: &[&str] = &[
    "time",
    "po_number",
    "sku",
    "product_id",
    "store_id",
    "brand_id",
    "supplier_id",
    "product_name",
    "qty_ordered",
    "unit_price",
    "amount",
    "qty_received",
    "status",
    "po_released_at",
    "po_sent_at",
    "po_approved_at",
    "po_arrived_at",
    "po_received_at",
];

/// Key columns of `po_snapshots`; everything else is overwritten on conflict.
const PO_KEY_COLUMNS: usize = 3;

/// Writes and reads `po_snapshots`
#[derive(Debug, Clone)]
pub struct PoSnapshotStore {
    db: Database,
    batch_size: usize,
}

struct PoRow<'a> {
    record: &'a PoRecord,
    product_id: Option<i64>,
    store_id: Option<i64>,
    brand_id: Option<i64>,
    supplier_id: Option<i64>,
}

impl PoSnapshotStore {
    pub fn new(db: Database, batch_size: usize) -> Self {
        Self {
            db,
            batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
        }
    }

    /// Upsert one file's records in a single gated transaction.
    #[instrument(skip(self, records), fields(records = records.len()))]
    pub async fn ingest_file(&self, file: &str, records: &[PoRecord]) -> Result<IngestStats> {
        let mut stats = IngestStats {
            rows: records.len(),
            ..Default::default()
        };
        if records.is_empty() {
            return Ok(stats);
        }

        let mut tx = self.db.begin().await?;

        let mut request = EntityRequest::new();
        for r in records {
            request.store(&r.store);
            request.product(ProductSeed {
                sku: r.sku.clone(),
                name: r.product_name.clone(),
                brand: r.brand.clone(),
                supplier: r.supplier.clone(),
                hpp: r.unit_price,
            });
        }
        let ids = entities::resolve(tx.conn(), request).await?;

        let mut batch: DedupBatch<(NaiveDate, &str, &str), PoRow<'_>> = DedupBatch::new(self.batch_size);
        for record in records {
            let row = PoRow {
                record,
                product_id: ids.product(&record.sku),
                store_id: ids.store(&record.store),
                brand_id: ids.brand(&record.brand),
                supplier_id: ids.supplier(&record.supplier),
            };
            let key = (record.snapshot_date, record.po_number.as_str(), record.sku.as_str());
            if batch.push(key, row) {
                stats.duplicates += 1;
            }
            if batch.is_full() {
                flush(tx.conn(), batch.take(), &mut stats).await?;
            }
        }
        if !batch.is_empty() {
            flush(tx.conn(), batch.take(), &mut stats).await?;
        }

        tx.commit().await?;
        info!(upserted = stats.upserted, duplicates = stats.duplicates, "PO file ingested");
        Ok(stats)
    }

    /// PO lines of one snapshot counted by status, where each line's status
    /// is the stored code raised to what its timestamps prove.
    pub async fn count_by_derived_status(&self, snapshot: NaiveDate) -> Result<BTreeMap<PoStatus, i64>> {
        let sql = format!(
            "SELECT GREATEST(status::INT, {})::BIGINT AS derived, COUNT(*) \
             FROM po_snapshots WHERE time = $1 GROUP BY 1",
            PoStatus::derived_case_sql("")
        );
        let permit = self.db.permit().await?;
        let rows: Vec<(i64, i64)> = sqlx::query_as(&sql)
            .bind(snapshot_time(snapshot))
            .fetch_all(self.db.pool())
            .await?;
        drop(permit);

        let mut counts = BTreeMap::new();
        for (code, count) in rows {
            counts.insert(PoStatus::from_code(code)?, count);
        }
        Ok(counts)
    }
}

fn conflict_clause() -> String {
    let updates: Vec<String> = PO_COLUMNS[PO_KEY_COLUMNS..]
        .iter()
        .map(|c| format!("{c} = EXCLUDED.{c}"))
        .collect();
    format!(
        " ON CONFLICT (time, po_number, sku) DO UPDATE SET {}, updated_at = NOW()",
        updates.join(", ")
    )
}

async fn flush(conn: &mut PgConnection, rows: Vec<PoRow<'_>>, stats: &mut IngestStats) -> Result<()> {
    let mut builder = QueryBuilder::new(format!("INSERT INTO po_snapshots ({}) ", PO_COLUMNS.join(", ")));
    builder.push_values(rows.iter(), |mut b, row| {
        let r = row.record;
        b.push_bind(snapshot_time(r.snapshot_date))
            .push_bind(r.po_number.as_str())
            .push_bind(r.sku.as_str())
            .push_bind(row.product_id)
            .push_bind(row.store_id)
            .push_bind(row.brand_id)
            .push_bind(row.supplier_id)
            .push_bind(r.product_name.as_str())
            .push_bind(r.qty_ordered)
            .push_bind(r.unit_price)
            .push_bind(r.amount)
            .push_bind(r.qty_received)
            .push_bind(r.status.code());
        for stage in [
            LifecycleStage::Released,
            LifecycleStage::Sent,
            LifecycleStage::Approved,
            LifecycleStage::Arrived,
            LifecycleStage::Received,
        ] {
            b.push_bind(r.stages.get(stage));
        }
    });
    builder.push(conflict_clause());
    builder.build().execute(&mut *conn).await?;

    stats.upserted += rows.len();
    stats.batches += 1;
    debug!(batch = stats.batches, rows = rows.len(), "Flushed PO batch");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> Option<DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap())
    }

    #[tokio::test]
    async fn test_store_batch_clamped_to_bind_limit() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgresql://localhost/unused")
            .unwrap();
        let store = PoSnapshotStore::new(Database::from_pool(pool, 1), 50_000);
        assert_eq!(store.batch_size, MAX_BATCH_SIZE);
        assert!(PO_COLUMNS.len() * store.batch_size <= u16::MAX as usize);
    }

    #[test]
    fn test_timestamp_absent_values() {
        for raw in ["", "  ", "-", "0000-00-00 00:00:00", "0000-00-00", "not a date"] {
            assert_eq!(parse_po_timestamp(raw, TimestampLocale::Id), None, "{raw:?}");
        }
    }

    #[test]
    fn test_timestamp_day_first() {
        let id = TimestampLocale::Id;
        assert_eq!(parse_po_timestamp("31/01/2025 10:30", id), at(2025, 1, 31, 10, 30, 0));
        assert_eq!(parse_po_timestamp("31/01/25 10.30", id), at(2025, 1, 31, 10, 30, 0));
        assert_eq!(parse_po_timestamp("05-02-2025 08:15:45", id), at(2025, 2, 5, 8, 15, 45));
        assert_eq!(parse_po_timestamp("05/02/2025", id), at(2025, 2, 5, 0, 0, 0));
        assert_eq!(parse_po_timestamp("31-01-25", id), at(2025, 1, 31, 0, 0, 0));
    }

    #[test]
    fn test_timestamp_month_first() {
        let us = TimestampLocale::Us;
        assert_eq!(parse_po_timestamp("01/31/2025 10:30", us), at(2025, 1, 31, 10, 30, 0));
        assert_eq!(parse_po_timestamp("05/02/2025", us), at(2025, 5, 2, 0, 0, 0));
        assert_eq!(parse_po_timestamp("31/01/2025", us), None);
    }

    #[test]
    fn test_timestamp_iso_and_rfc3339() {
        let id = TimestampLocale::Id;
        assert_eq!(parse_po_timestamp("2025-01-31 10:30:00", id), at(2025, 1, 31, 10, 30, 0));
        assert_eq!(parse_po_timestamp("2025-01-31T10:30", id), at(2025, 1, 31, 10, 30, 0));
        assert_eq!(parse_po_timestamp("2025-01-31", id), at(2025, 1, 31, 0, 0, 0));
        assert_eq!(
            parse_po_timestamp("2025-01-31T17:30:00+07:00", id),
            at(2025, 1, 31, 10, 30, 0)
        );
    }

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status("4"), Some(PoStatus::Approved));
        assert_eq!(parse_status("6.0"), Some(PoStatus::Received));
        assert_eq!(parse_status("Sent"), Some(PoStatus::Sent));
        assert_eq!(parse_status(""), None);
        assert_eq!(parse_status("9"), None);
        assert_eq!(parse_status("lost"), None);
    }

    #[test]
    fn test_parse_po_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("20250301_po.csv");
        std::fs::write(
            &path,
            "No PO;SKU;Nama Produk;Brand;Store;Supplier;Qty PO;Harga;Amount;Status;PO Released;PO Sent;PO Approved;PO Arrived;PO Received\n\
             PO-1;W-01;Lip Cream;Wardah;Miss Glam Jambi;PT Paragon;10;1.500;;2;01/03/2025 09.00;02/03/2025;;;\n\
             PO-1;W-02;;Wardah;Miss Glam Jambi;PT Paragon;4;2000;9000;6;;;;;\n\
             PO-2;;Orphan;Emina;Miss Glam Jambi;;1;1;;1;;;;;\n",
        )
        .unwrap();

        let records = parse_po_file(&path, &PipelineConfig::default()).unwrap();
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.snapshot_date, NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
        assert_eq!(first.store, "JAMBI");
        // explicit released(2) is raised by the sent timestamp
        assert_eq!(first.status, PoStatus::Sent);
        assert_eq!(first.stages.released, at(2025, 3, 1, 9, 0, 0));
        assert_eq!(first.unit_price, 1.5);
        assert_eq!(first.amount, 15.0);

        let second = &records[1];
        assert_eq!(second.product_name, "Product W-02");
        assert_eq!(second.amount, 9000.0);
        assert_eq!(second.status, PoStatus::Received);
    }

    #[test]
    fn test_parse_po_file_requires_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("20250301_po.csv");
        std::fs::write(&path, "SKU,Brand,Store\nW-01,Wardah,Jambi\n").unwrap();

        let err = parse_po_file(&path, &PipelineConfig::default()).unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumn { column: "No PO", .. }));
    }

    #[test]
    fn test_po_conflict_clause_keeps_key() {
        let clause = conflict_clause();
        assert!(clause.contains("ON CONFLICT (time, po_number, sku)"));
        assert!(clause.contains("status = EXCLUDED.status"));
        assert!(!clause.contains("po_number = EXCLUDED"));
    }
}
