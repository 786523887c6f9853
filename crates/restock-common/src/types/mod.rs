//! Shared domain types

pub mod po_status;

pub use po_status::{LifecycleStage, LifecycleTimestamps, PoStatus};
