//! Intermediate CSV snapshots for diagnostics
//!
//! Layout: `{root}/{stage}/{YYYYMMDD}/{file name}`.

use chrono::NaiveDate;
use csv::Writer;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::TransformedRow;
use crate::error::Result;
use crate::normalize::RawRow;
use crate::reference::MergedRow;

pub const STAGE_CLEANED_BASE: &str = "1_cleaned_base";
pub const STAGE_CLEANED_MERGED: &str = "2_cleaned_merged";
pub const STAGE_WITH_METRICS: &str = "3_with_metrics";

const BASE_HEADERS: [&str; 14] = [
    "brand", "sku", "nama", "store", "stock", "daily_sales", "max_daily_sales", "lead_time",
    "max_lead_time", "sedang_po", "hpp", "harga", "min_order", "contribution",
];

/// Render a decimal the Indonesian way: `.` groups thousands, `,` separates
/// decimals, and a zero fraction is dropped (`1234.5` -> `1.234,50`,
/// `1234` -> `1.234`).
pub fn format_id_decimal(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    let negative = rounded < 0.0;
    let fixed = format!("{:.2}", rounded.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }

    let sign = if negative && rounded != 0.0 { "-" } else { "" };
    if frac_part == "00" {
        format!("{}{}", sign, grouped)
    } else {
        format!("{}{},{}", sign, grouped, frac_part)
    }
}

fn plain(value: f64) -> String {
    value.to_string()
}

fn base_fields(row: &RawRow) -> Vec<String> {
    vec![
        row.brand.clone(),
        row.sku.clone(),
        row.name.clone(),
        row.store.clone(),
        plain(row.stock),
        plain(row.daily_sales),
        plain(row.max_daily_sales),
        plain(row.lead_time),
        plain(row.max_lead_time),
        plain(row.qty_on_order),
        plain(row.cost_price),
        plain(row.sell_price),
        plain(row.min_order),
        plain(row.contribution),
    ]
}

/// Writes per-stage CSV snapshots beneath a root directory
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    root: PathBuf,
    persist_base: bool,
}

impl ArtifactWriter {
    pub fn new(root: impl Into<PathBuf>, persist_base: bool) -> Self {
        Self {
            root: root.into(),
            persist_base,
        }
    }

    pub fn stage_path(&self, stage: &str, date: NaiveDate, file_name: &str) -> PathBuf {
        self.root
            .join(stage)
            .join(date.format("%Y%m%d").to_string())
            .join(file_name)
    }

    fn open(&self, stage: &str, date: NaiveDate, file_name: &str) -> Result<(PathBuf, Writer<std::fs::File>)> {
        let path = self.stage_path(stage, date, file_name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let writer = Writer::from_path(&path)?;
        Ok((path, writer))
    }

    fn finish(path: &Path, mut writer: Writer<std::fs::File>, rows: usize) -> Result<()> {
        writer.flush()?;
        debug!(path = %path.display(), rows, "Wrote debug artifact");
        Ok(())
    }

    /// Pre-merge rows; only written when base layers are persisted.
    pub fn write_base(&self, date: NaiveDate, file_name: &str, rows: &[RawRow]) -> Result<()> {
        if !self.persist_base {
            return Ok(());
        }
        let (path, mut writer) = self.open(STAGE_CLEANED_BASE, date, file_name)?;
        writer.write_record(BASE_HEADERS)?;
        for row in rows {
            writer.write_record(base_fields(row))?;
        }
        Self::finish(&path, writer, rows.len())
    }

    pub fn write_merged(&self, date: NaiveDate, file_name: &str, rows: &[MergedRow]) -> Result<()> {
        let (path, mut writer) = self.open(STAGE_CLEANED_MERGED, date, file_name)?;
        let mut headers: Vec<&str> = BASE_HEADERS.to_vec();
        headers.extend([
            "orig_daily_sales",
            "orig_max_daily_sales",
            "is_in_reference",
            "supplier_name",
            "supplier_phone",
        ]);
        writer.write_record(&headers)?;

        for merged in rows {
            let mut fields = base_fields(&merged.row);
            let supplier = merged.supplier.as_ref();
            fields.extend([
                plain(merged.orig_daily_sales),
                plain(merged.orig_max_daily_sales),
                u8::from(merged.in_reference_store).to_string(),
                supplier.map(|s| s.name.clone()).unwrap_or_default(),
                supplier.map(|s| s.phone.clone()).unwrap_or_default(),
            ]);
            writer.write_record(&fields)?;
        }
        Self::finish(&path, writer, rows.len())
    }

    pub fn write_metrics(&self, date: NaiveDate, file_name: &str, rows: &[TransformedRow]) -> Result<()> {
        let (path, mut writer) = self.open(STAGE_WITH_METRICS, date, file_name)?;
        writer.write_record([
            "date",
            "brand",
            "sku",
            "nama",
            "store",
            "stock",
            "daily_sales",
            "max_daily_sales",
            "orig_daily_sales",
            "orig_max_daily_sales",
            "lead_time",
            "max_lead_time",
            "sedang_po",
            "min_order",
            "hpp",
            "harga",
            "sales_contribution",
            "contribution",
            "is_in_reference",
            "safety_stock",
            "reorder_point",
            "target_days_cover",
            "qty_for_target_cover",
            "current_days_cover",
            "is_open_po",
            "initial_qty_po",
            "emergency_po_qty",
            "regular_po_qty",
            "final_regular_po_qty",
            "emergency_po_cost",
            "final_regular_po_cost",
            "supplier_name",
            "supplier_phone",
        ])?;

        for t in rows {
            let row = &t.merged.row;
            let m = &t.metrics;
            let supplier = t.merged.supplier.as_ref();
            writer.write_record([
                t.snapshot_date.format("%Y-%m-%d").to_string(),
                row.brand.clone(),
                row.sku.clone(),
                row.name.clone(),
                row.store.clone(),
                format_id_decimal(row.stock),
                format_id_decimal(row.daily_sales),
                format_id_decimal(row.max_daily_sales),
                format_id_decimal(t.merged.orig_daily_sales),
                format_id_decimal(t.merged.orig_max_daily_sales),
                format_id_decimal(row.lead_time),
                format_id_decimal(row.max_lead_time),
                format_id_decimal(row.qty_on_order),
                format_id_decimal(row.min_order),
                format_id_decimal(row.cost_price),
                format_id_decimal(row.sell_price),
                format_id_decimal(row.daily_sales * row.sell_price),
                format_id_decimal(row.contribution),
                u8::from(t.merged.in_reference_store).to_string(),
                m.safety_stock.to_string(),
                m.reorder_point.to_string(),
                m.target_days_cover.to_string(),
                m.qty_for_target_cover.to_string(),
                format_id_decimal(m.current_days_cover),
                u8::from(m.is_open_po).to_string(),
                m.initial_po_qty.to_string(),
                m.emergency_po_qty.to_string(),
                m.regular_po_qty.to_string(),
                m.final_regular_po_qty.to_string(),
                format_id_decimal(m.emergency_po_cost),
                format_id_decimal(m.final_regular_po_cost),
                supplier.map(|s| s.name.clone()).unwrap_or_default(),
                supplier.map(|s| s.phone.clone()).unwrap_or_default(),
            ])?;
        }
        Self::finish(&path, writer, rows.len())
    }
}
