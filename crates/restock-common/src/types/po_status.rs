//! Purchase-order lifecycle status
//!
//! A PO moves through `Draft -> Released -> Sent -> Approved -> Arrived ->
//! Received`. Snapshots carry an explicit `status` code plus up to five
//! nullable stage timestamps. [`PoStatus::derive`] maps the *set* of present
//! timestamps to a status by checking stages from the latest to the earliest
//! and returning the first one present; no timestamps means `Draft`.
//!
//! The same priority order is rendered as SQL by
//! [`PoStatus::derived_case_sql`] so read-side queries agree with ingestion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{RestockError, Result};

/// Canonical PO lifecycle status, ordered by progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoStatus {
    Draft,
    Released,
    Sent,
    Approved,
    Arrived,
    Received,
}

/// A dated lifecycle stage (every status except `Draft` has one)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleStage {
    Released,
    Sent,
    Approved,
    Arrived,
    Received,
}

impl LifecycleStage {
    /// Stages in derivation priority, latest first.
    pub const PRIORITY: [LifecycleStage; 5] = [
        LifecycleStage::Received,
        LifecycleStage::Arrived,
        LifecycleStage::Approved,
        LifecycleStage::Sent,
        LifecycleStage::Released,
    ];

    pub fn status(self) -> PoStatus {
        match self {
            LifecycleStage::Released => PoStatus::Released,
            LifecycleStage::Sent => PoStatus::Sent,
            LifecycleStage::Approved => PoStatus::Approved,
            LifecycleStage::Arrived => PoStatus::Arrived,
            LifecycleStage::Received => PoStatus::Received,
        }
    }

    /// Column holding this stage's timestamp in `po_snapshots`
    pub fn column(self) -> &'static str {
        match self {
            LifecycleStage::Released => "po_released_at",
            LifecycleStage::Sent => "po_sent_at",
            LifecycleStage::Approved => "po_approved_at",
            LifecycleStage::Arrived => "po_arrived_at",
            LifecycleStage::Received => "po_received_at",
        }
    }
}

/// The five optional stage timestamps of one PO line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleTimestamps {
    pub released: Option<DateTime<Utc>>,
    pub sent: Option<DateTime<Utc>>,
    pub approved: Option<DateTime<Utc>>,
    pub arrived: Option<DateTime<Utc>>,
    pub received: Option<DateTime<Utc>>,
}

impl LifecycleTimestamps {
    pub fn get(&self, stage: LifecycleStage) -> Option<DateTime<Utc>> {
        match stage {
            LifecycleStage::Released => self.released,
            LifecycleStage::Sent => self.sent,
            LifecycleStage::Approved => self.approved,
            LifecycleStage::Arrived => self.arrived,
            LifecycleStage::Received => self.received,
        }
    }

    pub fn set(&mut self, stage: LifecycleStage, at: Option<DateTime<Utc>>) {
        let slot = match stage {
            LifecycleStage::Released => &mut self.released,
            LifecycleStage::Sent => &mut self.sent,
            LifecycleStage::Approved => &mut self.approved,
            LifecycleStage::Arrived => &mut self.arrived,
            LifecycleStage::Received => &mut self.received,
        };
        *slot = at;
    }

    pub fn is_empty(&self) -> bool {
        LifecycleStage::PRIORITY.iter().all(|s| self.get(*s).is_none())
    }
}

impl PoStatus {
    pub const ALL: [PoStatus; 6] = [
        PoStatus::Draft,
        PoStatus::Released,
        PoStatus::Sent,
        PoStatus::Approved,
        PoStatus::Arrived,
        PoStatus::Received,
    ];

    /// Persisted status code, 1 (draft) through 6 (received)
    pub fn code(self) -> i16 {
        match self {
            PoStatus::Draft => 1,
            PoStatus::Released => 2,
            PoStatus::Sent => 3,
            PoStatus::Approved => 4,
            PoStatus::Arrived => 5,
            PoStatus::Received => 6,
        }
    }

    pub fn from_code(code: i64) -> Result<Self> {
        PoStatus::ALL
            .into_iter()
            .find(|s| i64::from(s.code()) == code)
            .ok_or(RestockError::UnknownStatusCode(code))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PoStatus::Draft => "draft",
            PoStatus::Released => "released",
            PoStatus::Sent => "sent",
            PoStatus::Approved => "approved",
            PoStatus::Arrived => "arrived",
            PoStatus::Received => "received",
        }
    }

    /// Status implied by which stage timestamps are present.
    pub fn derive(stages: &LifecycleTimestamps) -> PoStatus {
        LifecycleStage::PRIORITY
            .into_iter()
            .find(|stage| stages.get(*stage).is_some())
            .map_or(PoStatus::Draft, LifecycleStage::status)
    }

    /// Status to persist for a snapshot line: the explicit code from the file
    /// unless the timestamps prove the PO got further.
    pub fn reconcile(explicit: Option<PoStatus>, stages: &LifecycleTimestamps) -> PoStatus {
        let derived = PoStatus::derive(stages);
        match explicit {
            Some(status) if status >= derived => status,
            _ => derived,
        }
    }

    /// SQL `CASE` expression equivalent to [`PoStatus::derive`].
    ///
    /// `alias` qualifies the timestamp columns (`"p"` gives `p.po_received_at`);
    /// pass an empty string for unqualified columns.
    pub fn derived_case_sql(alias: &str) -> String {
        let prefix = if alias.is_empty() {
            String::new()
        } else {
            format!("{}.", alias)
        };

        let mut sql = String::from("CASE");
        for stage in LifecycleStage::PRIORITY {
            sql.push_str(&format!(
                " WHEN {}{} IS NOT NULL THEN {}",
                prefix,
                stage.column(),
                stage.status().code()
            ));
        }
        sql.push_str(&format!(" ELSE {} END", PoStatus::Draft.code()));
        sql
    }
}

impl fmt::Display for PoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PoStatus {
    type Err = RestockError;

    /// Accepts a status label (`"Approved"`) or its numeric code (`"4"`).
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if let Ok(code) = trimmed.parse::<i64>() {
            return PoStatus::from_code(code);
        }

        let lowered = trimmed.to_lowercase();
        PoStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == lowered)
            .ok_or_else(|| RestockError::InvalidStatus(trimmed.to_string()))
    }
}
