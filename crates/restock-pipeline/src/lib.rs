//! Restock inventory snapshot pipeline
//!
//! Ingests daily per-store stock exports and purchase-order snapshots,
//! computes replenishment metrics, and upserts the results into Postgres.
//!
//! # Flow
//!
//! 1. [`normalize`] resolves header variants and reads typed rows
//! 2. [`reference`] scales reference-store sales onto each store
//! 3. [`metrics`] derives safety stock, reorder point and PO quantities
//! 4. [`ingest`] writes each file in one transaction with in-batch dedup
//!
//! [`orchestrator::Orchestrator`] fans files out across workers and
//! [`service::IngestionService`] wires everything together.

pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod normalize;
pub mod orchestrator;
pub mod reference;
pub mod service;
pub mod stock_health;

pub use config::{PipelineConfig, TimestampLocale};
pub use db::{Database, DbConfig};
pub use error::{PipelineError, Result};
pub use orchestrator::Orchestrator;
pub use service::{IngestionService, RunSummary};
pub use stock_health::{Pipeline, StockHealthPipeline, TransformedRow};
