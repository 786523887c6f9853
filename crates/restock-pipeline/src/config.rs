//! Pipeline configuration
//!
//! [`PipelineConfig`] is the value object the calling layer hands to the
//! pipeline together with a list of local file paths. It is built either from
//! the environment (`RESTOCK_*` variables, with `.env` support) or through the
//! builder.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

// ============================================================================
// Pipeline Configuration Constants
// ============================================================================

/// Store whose per-SKU sales are scaled onto other stores.
pub const DEFAULT_REFERENCE_STORE: &str = "Miss Glam Padang";

/// Two-word chain prefix stripped from store names before matching.
pub const DEFAULT_STORE_CHAIN_PREFIX: &str = "MISS GLAM";

/// chrono layout of the date token that starts every input file name.
pub const DEFAULT_DATE_LAYOUT: &str = "%Y%m%d";

pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Stock files are processed one at a time so the reference cache warms in date order.
pub const DEFAULT_STOCK_MAX_WORKERS: usize = 1;

/// Rows per bulk upsert statement.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Upper bound keeping one stock upsert under the Postgres bind-parameter limit.
pub const MAX_BATCH_SIZE: usize = 2000;

pub const DEFAULT_DOWNLOAD_DIR: &str = "./data/downloads";

/// Contribution percentage applied to stores missing from the table.
pub const DEFAULT_CONTRIBUTION_PCT: f64 = 100.0;

/// Built-in store contribution table (percent of reference-store sales).
pub const DEFAULT_STORE_CONTRIBUTIONS: &[(&str, f64)] = &[
    ("PADANG", 100.0),
    ("PEKANBARU", 60.0),
    ("JAMBI", 33.0),
    ("BUKITTINGGI", 45.0),
    ("PANAM", 46.0),
    ("MUARO BUNGO", 42.0),
    ("LAMPUNG", 18.0),
    ("BENGKULU", 14.0),
    ("MEDAN", 46.0),
    ("PALEMBANG", 26.0),
    ("DAMAR", 91.0),
    ("BANGKA", 28.0),
    ("PAYAKUMBUH", 47.0),
    ("SOLOK", 37.0),
    ("TEMBILAHAN", 27.0),
    ("LUBUK LINGGAU", 26.0),
    ("DUMAI", 36.0),
    ("KEDATON", 18.0),
    ("RANTAU PRAPAT", 27.0),
    ("TANJUNG PINANG", 19.0),
    ("SUTOMO", 49.0),
    ("PASAMAN BARAT", 17.0),
    ("HALAT", 31.0),
    ("DURI", 28.0),
    ("SUDIRMAN", 44.0),
    ("DR. MANSYUR", 25.0),
    ("DR.MANSYUR", 25.0),
    ("MANSYUR", 25.0),
    ("PADANG SIDIMPUAN", 31.0),
    ("P. SIDIMPUAN", 31.0),
    ("P.SIDIMPUAN", 31.0),
    ("ACEH", 15.0),
    ("MARPOYAN", 30.0),
    ("SEI PENUH", 21.0),
    ("MAYANG", 18.0),
];

pub fn default_contributions() -> HashMap<String, f64> {
    DEFAULT_STORE_CONTRIBUTIONS
        .iter()
        .map(|(store, pct)| (store.to_string(), *pct))
        .collect()
}

/// Day/month order used when parsing PO stage timestamps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimestampLocale {
    /// Day first: `31/01/2025 10:30`
    #[default]
    Id,
    /// Month first: `01/31/2025 10:30`
    Us,
}

impl std::str::FromStr for TimestampLocale {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "id" | "id-id" | "dmy" => Ok(TimestampLocale::Id),
            "us" | "en-us" | "mdy" => Ok(TimestampLocale::Us),
            _ => Err(anyhow::anyhow!("Invalid timestamp locale: {}", s)),
        }
    }
}

/// Configuration for a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Name of the store whose sales are used for relative estimation
    pub reference_store: String,

    pub store_chain_prefix: String,

    /// chrono layout of the leading date token in file names
    pub date_layout: String,

    /// Store name (uppercase) -> contribution percent, 0-100
    pub contributions: HashMap<String, f64>,

    /// SKUs that get 60 days of target cover instead of 30
    pub special_skus: HashSet<String>,

    /// Supplier master CSV (sku, brand, store, supplier, phone)
    pub supplier_file: Option<PathBuf>,

    /// Replaces `contributions` when set
    pub contribution_file: Option<PathBuf>,

    /// Merged into `special_skus` when set
    pub special_sku_file: Option<PathBuf>,

    /// Concurrent file workers, never below 1
    pub worker_count: usize,

    /// Worker cap for stock-health files (None = use worker_count)
    pub stock_max_workers: Option<usize>,

    pub batch_size: usize,

    /// Directory scanned for reference-store snapshot files
    pub download_dir: PathBuf,

    /// Root for intermediate debug CSVs (None = don't write them)
    pub intermediate_dir: Option<PathBuf>,

    /// Also write the pre-merge layer
    pub persist_debug_layers: bool,

    pub timestamp_locale: TimestampLocale,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            reference_store: DEFAULT_REFERENCE_STORE.to_string(),
            store_chain_prefix: DEFAULT_STORE_CHAIN_PREFIX.to_string(),
            date_layout: DEFAULT_DATE_LAYOUT.to_string(),
            contributions: default_contributions(),
            special_skus: HashSet::new(),
            supplier_file: None,
            contribution_file: None,
            special_sku_file: None,
            worker_count: DEFAULT_WORKER_COUNT,
            stock_max_workers: Some(DEFAULT_STOCK_MAX_WORKERS),
            batch_size: DEFAULT_BATCH_SIZE,
            download_dir: PathBuf::from(DEFAULT_DOWNLOAD_DIR),
            intermediate_dir: None,
            persist_debug_layers: false,
            timestamp_locale: TimestampLocale::Id,
        }
    }
}

/// Clamp a requested worker count to at least one worker.
pub fn coerce_worker_count(requested: i64) -> usize {
    usize::try_from(requested).unwrap_or(0).max(1)
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Load configuration from `.env` and `RESTOCK_*` environment variables.
    ///
    /// Unset or unparseable numeric variables fall back to their defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        let path = |name: &str| var(name).map(PathBuf::from);

        let mut special_skus = HashSet::new();
        if let Some(list) = var("RESTOCK_SPECIAL_SKUS") {
            special_skus.extend(
                list.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from),
            );
        }

        let stock_max_workers = match var("RESTOCK_STOCK_MAX_WORKERS").and_then(|s| s.parse::<usize>().ok()) {
            Some(0) => None,
            Some(cap) => Some(cap),
            None => defaults.stock_max_workers,
        };

        let config = Self {
            reference_store: var("RESTOCK_REFERENCE_STORE").unwrap_or(defaults.reference_store),
            store_chain_prefix: var("RESTOCK_STORE_CHAIN_PREFIX")
                .unwrap_or(defaults.store_chain_prefix),
            date_layout: var("RESTOCK_DATE_LAYOUT").unwrap_or(defaults.date_layout),
            contributions: defaults.contributions,
            special_skus,
            supplier_file: path("RESTOCK_SUPPLIER_FILE"),
            contribution_file: path("RESTOCK_CONTRIBUTION_FILE"),
            special_sku_file: path("RESTOCK_SPECIAL_SKU_FILE"),
            worker_count: var("RESTOCK_WORKERS")
                .and_then(|s| s.parse::<i64>().ok())
                .map(coerce_worker_count)
                .unwrap_or(defaults.worker_count),
            stock_max_workers,
            batch_size: var("RESTOCK_BATCH_SIZE")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.batch_size),
            download_dir: path("RESTOCK_DOWNLOAD_DIR").unwrap_or(defaults.download_dir),
            intermediate_dir: path("RESTOCK_INTERMEDIATE_DIR"),
            persist_debug_layers: var("RESTOCK_PERSIST_DEBUG_LAYERS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.persist_debug_layers),
            timestamp_locale: match var("RESTOCK_TIMESTAMP_LOCALE") {
                Some(locale) => locale.parse()?,
                None => defaults.timestamp_locale,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.reference_store.trim().is_empty() {
            anyhow::bail!("Reference store name cannot be empty");
        }

        if self.date_layout.trim().is_empty() {
            anyhow::bail!("Date layout cannot be empty");
        }

        if self.worker_count == 0 {
            anyhow::bail!("Worker count must be at least 1");
        }

        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            anyhow::bail!(
                "Batch size must be between 1 and {} (got {})",
                MAX_BATCH_SIZE,
                self.batch_size
            );
        }

        if let Some((store, pct)) = self
            .contributions
            .iter()
            .find(|(_, pct)| !(0.0..=100.0).contains(*pct))
        {
            anyhow::bail!("Contribution for store '{}' must be within 0-100 (got {})", store, pct);
        }

        Ok(())
    }
}

/// Builder for PipelineConfig
#[derive(Default)]
pub struct PipelineConfigBuilder {
    reference_store: Option<String>,
    store_chain_prefix: Option<String>,
    date_layout: Option<String>,
    contributions: Option<HashMap<String, f64>>,
    special_skus: HashSet<String>,
    supplier_file: Option<PathBuf>,
    contribution_file: Option<PathBuf>,
    special_sku_file: Option<PathBuf>,
    worker_count: Option<usize>,
    stock_max_workers: Option<Option<usize>>,
    batch_size: Option<usize>,
    download_dir: Option<PathBuf>,
    intermediate_dir: Option<PathBuf>,
    persist_debug_layers: bool,
    timestamp_locale: Option<TimestampLocale>,
}

impl PipelineConfigBuilder {
    pub fn reference_store(mut self, name: impl Into<String>) -> Self {
        self.reference_store = Some(name.into());
        self
    }

    pub fn store_chain_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.store_chain_prefix = Some(prefix.into());
        self
    }

    pub fn date_layout(mut self, layout: impl Into<String>) -> Self {
        self.date_layout = Some(layout.into());
        self
    }

    pub fn contributions(mut self, contributions: HashMap<String, f64>) -> Self {
        self.contributions = Some(contributions);
        self
    }

    pub fn contribution(mut self, store: impl Into<String>, pct: f64) -> Self {
        self.contributions
            .get_or_insert_with(HashMap::new)
            .insert(store.into(), pct);
        self
    }

    pub fn special_sku(mut self, sku: impl Into<String>) -> Self {
        self.special_skus.insert(sku.into());
        self
    }

    pub fn supplier_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.supplier_file = Some(path.into());
        self
    }

    pub fn contribution_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.contribution_file = Some(path.into());
        self
    }

    pub fn special_sku_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.special_sku_file = Some(path.into());
        self
    }

    /// Zero or negative counts become a single worker.
    pub fn worker_count(mut self, workers: i64) -> Self {
        self.worker_count = Some(coerce_worker_count(workers));
        self
    }

    pub fn stock_max_workers(mut self, cap: Option<usize>) -> Self {
        self.stock_max_workers = Some(cap);
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    pub fn download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = Some(dir.into());
        self
    }

    pub fn intermediate_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.intermediate_dir = Some(dir.into());
        self
    }

    pub fn persist_debug_layers(mut self, persist: bool) -> Self {
        self.persist_debug_layers = persist;
        self
    }

    pub fn timestamp_locale(mut self, locale: TimestampLocale) -> Self {
        self.timestamp_locale = Some(locale);
        self
    }

    pub fn build(self) -> PipelineConfig {
        let defaults = PipelineConfig::default();
        PipelineConfig {
            reference_store: self.reference_store.unwrap_or(defaults.reference_store),
            store_chain_prefix: self.store_chain_prefix.unwrap_or(defaults.store_chain_prefix),
            date_layout: self.date_layout.unwrap_or(defaults.date_layout),
            contributions: self.contributions.unwrap_or(defaults.contributions),
            special_skus: self.special_skus,
            supplier_file: self.supplier_file,
            contribution_file: self.contribution_file,
            special_sku_file: self.special_sku_file,
            worker_count: self.worker_count.unwrap_or(defaults.worker_count),
            stock_max_workers: self.stock_max_workers.unwrap_or(defaults.stock_max_workers),
            batch_size: self.batch_size.unwrap_or(defaults.batch_size),
            download_dir: self.download_dir.unwrap_or(defaults.download_dir),
            intermediate_dir: self.intermediate_dir,
            persist_debug_layers: self.persist_debug_layers,
            timestamp_locale: self.timestamp_locale.unwrap_or(defaults.timestamp_locale),
        }
    }
}
