//! Restock Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging, and error handling for the restock workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`RestockError`] and the crate [`Result`] alias
//! - **Logging**: centralized `tracing` setup in [`logging`]
//! - **Types**: domain types shared by ingestion and reporting, most notably
//!   the purchase-order lifecycle status in [`types::po_status`]
//!
//! # Example
//!
//! ```
//! use restock_common::types::{LifecycleTimestamps, PoStatus};
//!
//! let stages = LifecycleTimestamps::default();
//! assert_eq!(PoStatus::derive(&stages), PoStatus::Draft);
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{RestockError, Result};
pub use types::{LifecycleStage, LifecycleTimestamps, PoStatus};
