//! Persistence of transformed stock rows into `daily_stock_data`

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::{PgConnection, QueryBuilder};
use tracing::{debug, info, instrument};

use super::entities::{self, EntityIds, EntityRequest, ProductSeed};
use super::{DedupBatch, IngestStats};
use crate::config::MAX_BATCH_SIZE;
use crate::db::Database;
use crate::error::{PipelineError, Result};
use crate::stock_health::TransformedRow;

/// Identity of one stored stock row: (snapshot date, store, SKU, brand)
type StockKey = (NaiveDate, i64, String, Option<i64>);

const KEY_COLUMNS: &[&str] = &["time", "store_id", "sku", "brand_id"];

const VALUE_COLUMNS: &[&str] = &[
    "product_id",
    "supplier_id",
    "product_name",
    "stock",
    "daily_sales",
    "max_daily_sales",
    "orig_daily_sales",
    "orig_max_daily_sales",
    "lead_time",
    "max_lead_time",
    "qty_on_order",
    "min_order",
    "hpp",
    "price",
    "contribution",
    "is_in_reference",
    "safety_stock",
    "reorder_point",
    "target_days_cover",
    "qty_for_target_cover",
    "current_days_cover",
    "is_open_po",
    "initial_po_qty",
    "emergency_po_qty",
    "regular_po_qty",
    "final_regular_po_qty",
    "emergency_po_cost",
    "final_regular_po_cost",
];

/// Midnight UTC of the snapshot date
pub fn snapshot_time(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn insert_prefix() -> String {
    let columns: Vec<&str> = KEY_COLUMNS.iter().chain(VALUE_COLUMNS).copied().collect();
    format!("INSERT INTO daily_stock_data ({}) ", columns.join(", "))
}

fn conflict_clause() -> String {
    let updates: Vec<String> = VALUE_COLUMNS
        .iter()
        .map(|c| format!("{c} = EXCLUDED.{c}"))
        .collect();
    format!(
        " ON CONFLICT (time, store_id, sku, (COALESCE(brand_id, -1))) DO UPDATE SET {}, updated_at = NOW()",
        updates.join(", ")
    )
}

/// A row ready to flush, with its foreign keys resolved
struct StockRecord<'a> {
    row: &'a TransformedRow,
    store_id: i64,
    brand_id: Option<i64>,
    product_id: Option<i64>,
    supplier_id: Option<i64>,
}

/// Writes one stock file's rows in a single gated transaction
#[derive(Debug, Clone)]
pub struct StockSnapshotWriter {
    db: Database,
    batch_size: usize,
}

impl StockSnapshotWriter {
    pub fn new(db: Database, batch_size: usize) -> Self {
        Self {
            db,
            batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
        }
    }

    /// Upsert `rows`; either every row of the file is committed or none is.
    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    pub async fn ingest_file(&self, file: &str, rows: &[TransformedRow]) -> Result<IngestStats> {
        let mut stats = IngestStats {
            rows: rows.len(),
            ..Default::default()
        };
        if rows.is_empty() {
            debug!("No rows to ingest");
            return Ok(stats);
        }

        let mut tx = self.db.begin().await?;
        let ids = entities::resolve(tx.conn(), entity_request(rows)).await?;

        let mut batch: DedupBatch<StockKey, StockRecord<'_>> = DedupBatch::new(self.batch_size);
        for row in rows {
            let record = resolve_record(row, &ids)?;
            let key = (
                row.snapshot_date,
                record.store_id,
                row.merged.row.sku.clone(),
                record.brand_id,
            );
            if batch.push(key, record) {
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
        info!(
            upserted = stats.upserted,
            duplicates = stats.duplicates,
            batches = stats.batches,
            "Stock file ingested"
        );
        Ok(stats)
    }
}

fn entity_request(rows: &[TransformedRow]) -> EntityRequest {
    let mut request = EntityRequest::new();
    for t in rows {
        let row = &t.merged.row;
        request.store(&row.store);
        request.brand(&row.brand);
        request.product(ProductSeed {
            sku: row.sku.clone(),
            name: row.name.clone(),
            brand: row.brand.clone(),
            supplier: t
                .merged
                .supplier
                .as_ref()
                .map(|s| s.name.clone())
                .unwrap_or_default(),
            hpp: row.cost_price,
        });
    }
    request
}

fn resolve_record<'a>(row: &'a TransformedRow, ids: &EntityIds) -> Result<StockRecord<'a>> {
    let raw = &row.merged.row;
    let store_id = ids.store(&raw.store).ok_or_else(|| {
        PipelineError::Validation(format!("row for SKU '{}' has no store", raw.sku))
    })?;
    Ok(StockRecord {
        row,
        store_id,
        brand_id: ids.brand(&raw.brand),
        product_id: ids.product(&raw.sku),
        supplier_id: row.merged.supplier.as_ref().and_then(|s| ids.supplier(&s.name)),
    })
}

async fn flush(conn: &mut PgConnection, records: Vec<StockRecord<'_>>, stats: &mut IngestStats) -> Result<()> {
    let mut builder = QueryBuilder::new(insert_prefix());
    builder.push_values(records.iter(), |mut b, record| {
        let t = record.row;
        let raw = &t.merged.row;
        let m = &t.metrics;
        b.push_bind(snapshot_time(t.snapshot_date))
            .push_bind(record.store_id)
            .push_bind(raw.sku.as_str())
            .push_bind(record.brand_id)
            .push_bind(record.product_id)
            .push_bind(record.supplier_id)
            .push_bind(raw.name.as_str())
            .push_bind(raw.stock)
            .push_bind(raw.daily_sales)
            .push_bind(raw.max_daily_sales)
            .push_bind(t.merged.orig_daily_sales)
            .push_bind(t.merged.orig_max_daily_sales)
            .push_bind(raw.lead_time)
            .push_bind(raw.max_lead_time)
            .push_bind(raw.qty_on_order)
            .push_bind(raw.min_order)
            .push_bind(raw.cost_price)
            .push_bind(raw.sell_price)
            .push_bind(raw.contribution)
            .push_bind(t.merged.in_reference_store)
            .push_bind(m.safety_stock)
            .push_bind(m.reorder_point)
            .push_bind(m.target_days_cover)
            .push_bind(m.qty_for_target_cover)
            .push_bind(m.current_days_cover)
            .push_bind(m.is_open_po)
            .push_bind(m.initial_po_qty)
            .push_bind(m.emergency_po_qty)
            .push_bind(m.regular_po_qty)
            .push_bind(m.final_regular_po_qty)
            .push_bind(m.emergency_po_cost)
            .push_bind(m.final_regular_po_cost);
    });
    builder.push(conflict_clause());

    builder.build().execute(&mut *conn).await?;

    stats.upserted += records.len();
    stats.batches += 1;
    debug!(batch = stats.batches, rows = records.len(), "Flushed stock batch");
    Ok(())
}
