use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sub-pool selector: identifiers are partitioned by carrier vendor and series.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PoolKey {
    pub vendor: String,
    pub series: String,
}

impl PoolKey {
    pub fn new(vendor: impl Into<String>, series: impl Into<String>) -> Self {
        Self {
            vendor: vendor.into(),
            series: series.into(),
        }
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.vendor, self.series)
    }
}

/// One pre-provisioned waybill number as held by the pool store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WaybillRecord {
    pub id: i64,
    pub code: String,
    pub vendor: String,
    pub series: String,
    /// `false` = available, `true` = issued or consumed.
    pub is_used: bool,
    /// Test records are never handed out by the allocator.
    pub is_test: bool,
    /// Set once the carrier reported the code as already registered.
    /// A reconciled record is never returned to the pool.
    pub reconciled: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
}

/// Identifier handed to a caller by a successful take.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub code: String,
    pub id: i64,
    pub vendor: String,
    pub series: String,
}

/// Result of the store's atomic select-and-mark.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TakeOutcome {
    Taken(Allocation),
    /// Records exist for the sub-pool but every one of them is used.
    Exhausted { total: u64, used: u64 },
    /// No (non-test) records exist for the sub-pool at all.
    NotConfigured,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReleaseOutcome {
    /// Record is available again (including when it already was).
    Released,
    /// Record was reconciled against the carrier and stays consumed.
    Pinned,
    /// No record with that code exists for the vendor.
    Unknown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarkOutcome {
    /// Record flipped from available to consumed.
    Consumed,
    /// Record was already used; it is now pinned.
    AlreadyConsumed,
    /// The store does not know the code; nothing was written.
    Unknown,
}

/// Read-only view answering "can this code still be handed out?".
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Availability {
    pub code: String,
    pub exists: bool,
    pub available: bool,
    pub reconciled: bool,
    pub used_at: Option<DateTime<Utc>>,
}

impl Availability {
    pub fn unknown(code: &str) -> Self {
        Self {
            code: code.to_string(),
            exists: false,
            available: false,
            reconciled: false,
            used_at: None,
        }
    }

    pub fn from_record(record: &WaybillRecord) -> Self {
        Self {
            code: record.code.clone(),
            exists: true,
            // Test records exist but are never handed out.
            available: !record.is_used && !record.is_test,
            reconciled: record.reconciled,
            used_at: record.used_at,
        }
    }
}

/// Usage aggregate for one sub-pool. Test records are excluded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub vendor: String,
    pub series: String,
    pub total: u64,
    pub used: u64,
    pub available: u64,
    /// Lowest code that the next take would return.
    pub next_available: Option<String>,
    /// Highest code currently marked used.
    pub last_used: Option<String>,
}

/// Provisioning input.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct NewWaybill {
    pub code: String,
    #[serde(default)]
    pub is_test: bool,
}

impl NewWaybill {
    pub fn live(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            is_test: false,
        }
    }

    pub fn test(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            is_test: true,
        }
    }
}
