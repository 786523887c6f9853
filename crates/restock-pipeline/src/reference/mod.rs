//! Reference merge index
//!
//! Built once per pipeline instance from the supplier master list and the
//! store contribution table. Rows whose SKU the reference store also sells
//! get their sales replaced by the reference figures scaled by the row's store
//! contribution; other rows keep their own sales.

pub mod sales_cache;

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_CONTRIBUTION_PCT;
use crate::error::{PipelineError, Result};
use crate::normalize::{normalize_store_name, open_delimited, ColumnMap, FieldSpec, RawRow};

pub use sales_cache::{scan_reference_sales, ReferenceSales, ReferenceSalesCache, ReferenceSalesMap};

/// Supplier details attached to merged rows
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupplierInfo {
    pub name: String,
    pub phone: String,
    pub store: String,
}

/// One line of the supplier master list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupplierRecord {
    pub sku: String,
    pub brand: String,
    pub store: String,
    pub supplier_name: String,
    pub phone: String,
}

/// A stock row after reference merging
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedRow {
    /// Row with daily/max daily sales possibly substituted
    pub row: RawRow,
    pub orig_daily_sales: f64,
    pub orig_max_daily_sales: f64,
    /// Whether the reference store sells this SKU on this date
    pub in_reference_store: bool,
    pub supplier: Option<SupplierInfo>,
}

#[derive(Debug, Clone, Default)]
pub struct ReferenceIndex {
    chain_prefix: String,
    suppliers: HashMap<(String, String), SupplierInfo>,
    contributions: HashMap<String, f64>,
}

impl ReferenceIndex {
    pub fn new(
        chain_prefix: impl Into<String>,
        contributions: &HashMap<String, f64>,
        suppliers: Vec<SupplierRecord>,
    ) -> Self {
        let chain_prefix = chain_prefix.into();

        let contributions = contributions
            .iter()
            .map(|(store, pct)| (store.trim().to_uppercase(), *pct))
            .collect();

        let mut index = HashMap::new();
        let mut skipped = 0usize;
        for record in suppliers {
            let store = normalize_store_name(&record.store, &chain_prefix);
            let brand = record.brand.trim().to_uppercase();
            if store.is_empty() || brand.is_empty() {
                skipped += 1;
                continue;
            }
            index.entry((store, brand)).or_insert(SupplierInfo {
                name: record.supplier_name.trim().to_string(),
                phone: record.phone.trim().to_string(),
                store: record.store.trim().to_string(),
            });
        }
        if skipped > 0 {
            debug!(skipped, "Supplier records without store or brand ignored");
        }

        Self {
            chain_prefix,
            suppliers: index,
            contributions,
        }
    }

    /// Contribution percent for `store`, 100 when the store is unknown.
    pub fn contribution(&self, store: &str) -> f64 {
        self.contributions
            .get(&store.trim().to_uppercase())
            .copied()
            .unwrap_or(DEFAULT_CONTRIBUTION_PCT)
    }

    pub fn supplier(&self, store: &str, brand: &str) -> Option<&SupplierInfo> {
        let key = (
            normalize_store_name(store, &self.chain_prefix),
            brand.trim().to_uppercase(),
        );
        self.suppliers.get(&key)
    }

    pub fn supplier_count(&self) -> usize {
        self.suppliers.len()
    }

    /// Merge one row against the reference-store sales for its date.
    pub fn merge(&self, row: RawRow, reference: &ReferenceSalesMap) -> MergedRow {
        let orig_daily_sales = row.daily_sales;
        let orig_max_daily_sales = row.max_daily_sales;
        let supplier = self.supplier(&row.store, &row.brand).cloned();

        let mut row = row;
        let in_reference_store = match reference.get(&row.sku) {
            Some(sales) => {
                let ratio = row.contribution / 100.0;
                row.daily_sales = sales.daily_sales * ratio;
                row.max_daily_sales = sales.max_daily_sales * ratio;
                true
            },
            None => false,
        };

        MergedRow {
            row,
            orig_daily_sales,
            orig_max_daily_sales,
            in_reference_store,
            supplier,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SupplierField {
    Sku,
    Brand,
    Store,
    Supplier,
    Phone,
}

impl FieldSpec for SupplierField {
    const ALL: &'static [Self] = &[
        SupplierField::Sku,
        SupplierField::Brand,
        SupplierField::Store,
        SupplierField::Supplier,
        SupplierField::Phone,
    ];

    fn name(self) -> &'static str {
        match self {
            SupplierField::Sku => "sku",
            SupplierField::Brand => "brand",
            SupplierField::Store => "store",
            SupplierField::Supplier => "supplier",
            SupplierField::Phone => "phone",
        }
    }

    fn aliases(self) -> &'static [&'static str] {
        match self {
            SupplierField::Sku => &["sku"],
            SupplierField::Brand => &["brand"],
            SupplierField::Store => &["nama store", "store", "toko"],
            SupplierField::Supplier => &["nama supplier", "supplier"],
            SupplierField::Phone => &["no hp", "phone", "telepon", "no telp"],
        }
    }
}

fn file_label(path: &Path) -> String {
    path.display().to_string()
}

/// Load the supplier master list.
pub fn load_supplier_master(path: &Path) -> Result<Vec<SupplierRecord>> {
    let mut file = open_delimited(path)?;
    let columns = ColumnMap::<SupplierField>::resolve(&file.headers);
    let label = file_label(path);
    columns.require(SupplierField::Brand, &label)?;
    columns.require(SupplierField::Store, &label)?;

    let mut records = Vec::new();
    for record in file.reader.records() {
        let record = match record {
            Ok(record) => record,
            Err(err) => {
                warn!(file = %label, error = %err, "Skipping malformed supplier record");
                continue;
            },
        };
        records.push(SupplierRecord {
            sku: columns.text(&record, SupplierField::Sku).to_string(),
            brand: columns.text(&record, SupplierField::Brand).to_string(),
            store: columns.text(&record, SupplierField::Store).to_string(),
            supplier_name: columns.text(&record, SupplierField::Supplier).to_string(),
            phone: columns.text(&record, SupplierField::Phone).to_string(),
        });
    }

    info!(file = %label, suppliers = records.len(), "Loaded supplier master");
    Ok(records)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ContributionField {
    Store,
    Percent,
}

impl FieldSpec for ContributionField {
    const ALL: &'static [Self] = &[ContributionField::Store, ContributionField::Percent];

    fn name(self) -> &'static str {
        match self {
            ContributionField::Store => "store",
            ContributionField::Percent => "contribution",
        }
    }

    fn aliases(self) -> &'static [&'static str] {
        match self {
            ContributionField::Store => &["store", "nama store", "toko"],
            ContributionField::Percent => &["contribution", "kontribusi", "persen", "contribution pct"],
        }
    }
}

/// Load a store -> contribution percent table.
pub fn load_contributions(path: &Path) -> Result<HashMap<String, f64>> {
    let mut file = open_delimited(path)?;
    let columns = ColumnMap::<ContributionField>::resolve(&file.headers);
    let label = file_label(path);
    columns.require(ContributionField::Store, &label)?;
    columns.require(ContributionField::Percent, &label)?;

    let mut table = HashMap::new();
    for record in file.reader.records() {
        let record = record?;
        let store = columns.text(&record, ContributionField::Store).trim().to_uppercase();
        if store.is_empty() {
            continue;
        }
        let pct = columns.number(&record, ContributionField::Percent);
        if !(0.0..=100.0).contains(&pct) {
            return Err(PipelineError::Validation(format!(
                "contribution for '{}' out of range: {}",
                store, pct
            )));
        }
        table.insert(store, pct);
    }

    info!(file = %label, stores = table.len(), "Loaded contribution table");
    Ok(table)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SkuField;

impl FieldSpec for SkuField {
    const ALL: &'static [Self] = &[SkuField];

    fn name(self) -> &'static str {
        "sku"
    }

    fn aliases(self) -> &'static [&'static str] {
        &["sku", "special sku"]
    }
}

/// Load the SKUs that get extended target cover.
pub fn load_special_skus(path: &Path) -> Result<HashSet<String>> {
    let mut file = open_delimited(path)?;
    let columns = ColumnMap::<SkuField>::resolve(&file.headers);
    columns.require(SkuField, &file_label(path))?;

    let mut skus = HashSet::new();
    for record in file.reader.records() {
        let record = record?;
        let sku = columns.text(&record, SkuField);
        if !sku.is_empty() {
            skus.insert(sku.to_string());
        }
    }
    Ok(skus)
}
