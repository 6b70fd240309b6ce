//! Tracked instruments and their per-instrument sync bookkeeping.

use anyhow::{Result, anyhow};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

/// Length of a fund code as issued by the exchange.
pub const CODE_LEN: usize = 6;

/// A validated fund code: exactly six ASCII digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstrumentCode(String);

impl InstrumentCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for InstrumentCode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != CODE_LEN || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(anyhow!(
                "Invalid instrument code '{}': expected {} digits",
                s,
                CODE_LEN
            ));
        }
        Ok(InstrumentCode(s.to_string()))
    }
}

impl TryFrom<String> for InstrumentCode {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<InstrumentCode> for String {
    fn from(code: InstrumentCode) -> String {
        code.0
    }
}

impl Display for InstrumentCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub code: InstrumentCode,
    pub name: String,
    pub category: Option<String>,
    pub risk: Option<String>,
    /// First valuation date; full backfills start here.
    pub inception: Option<NaiveDate>,
    pub added_at: NaiveDateTime,
}

/// Descriptive fields resolved from the provider when a user adds a code
/// without naming it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InstrumentInfo {
    pub name: String,
    pub category: Option<String>,
    pub inception: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Synced,
    Pending,
    Failed,
}

impl Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                SyncStatus::Synced => "synced",
                SyncStatus::Pending => "pending",
                SyncStatus::Failed => "failed",
            }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMeta {
    pub last_sync_date: Option<NaiveDate>,
    pub last_sync_time: Option<NaiveDateTime>,
    pub status: SyncStatus,
    pub error: Option<String>,
}

impl SyncMeta {
    pub fn pending() -> Self {
        Self {
            last_sync_date: None,
            last_sync_time: None,
            status: SyncStatus::Pending,
            error: None,
        }
    }

    /// Marker written while a fetch is in flight; dates are kept so the
    /// record still says how far the cache reaches.
    pub fn in_progress(previous: Option<&SyncMeta>) -> Self {
        Self {
            last_sync_date: previous.and_then(|m| m.last_sync_date),
            last_sync_time: previous.and_then(|m| m.last_sync_time),
            status: SyncStatus::Pending,
            error: None,
        }
    }

    /// Successor record after a successful fetch. `last_sync_date` only moves
    /// forward.
    pub fn synced(previous: Option<&SyncMeta>, through: NaiveDate, at: NaiveDateTime) -> Self {
        let last_sync_date = previous
            .and_then(|m| m.last_sync_date)
            .map_or(through, |prev| prev.max(through));
        Self {
            last_sync_date: Some(last_sync_date),
            last_sync_time: Some(at),
            status: SyncStatus::Synced,
            error: None,
        }
    }

    /// Successor record after a failed attempt; the synced-through date is kept.
    pub fn failed(previous: Option<&SyncMeta>, error: String, at: NaiveDateTime) -> Self {
        Self {
            last_sync_date: previous.and_then(|m| m.last_sync_date),
            last_sync_time: Some(at),
            status: SyncStatus::Failed,
            error: Some(error),
        }
    }
}
