pub mod disk;
pub mod memory;

use crate::core::error::StorageError;
use crate::core::instrument::InstrumentCode;
use crate::core::price::PricePoint;
use crate::core::store::AppendStats;
use chrono::NaiveDate;
use std::path::Path;
use tracing::warn;

pub use disk::DiskStore;
pub use memory::MemoryStore;

/// Opens the persistent cache under `<data_dir>/cache`.
pub fn open_disk_store(data_dir: &Path) -> Result<DiskStore, StorageError> {
    let cache_dir = data_dir.join("cache");
    std::fs::create_dir_all(&cache_dir)?;
    DiskStore::open(&cache_dir)
}

/// Price keys sort by instrument, then chronologically: `110011:20240102`.
pub(crate) fn price_key(code: &InstrumentCode, date: NaiveDate) -> Vec<u8> {
    format!("{}:{}", code, date.format("%Y%m%d")).into_bytes()
}

pub(crate) fn price_prefix(code: &InstrumentCode) -> Vec<u8> {
    format!("{code}:").into_bytes()
}

/// Decides the fate of an incoming point against what is stored for its date.
/// Shared by every backend so merge semantics cannot drift.
pub(crate) enum Merge {
    Insert,
    Unchanged,
    Conflict,
}

pub(crate) fn merge_decision(
    code: &InstrumentCode,
    existing: Option<&PricePoint>,
    incoming: &PricePoint,
) -> Merge {
    match existing {
        None => Merge::Insert,
        Some(stored) if stored == incoming => Merge::Unchanged,
        Some(stored) => {
            warn!(
                instrument = %code,
                date = %incoming.date,
                stored = stored.unit_value,
                incoming = incoming.unit_value,
                "Ignoring provider value for an already cached date"
            );
            Merge::Conflict
        }
    }
}

pub(crate) fn tally(stats: &mut AppendStats, merge: &Merge) {
    match merge {
        Merge::Insert => stats.inserted += 1,
        Merge::Unchanged => stats.unchanged += 1,
        Merge::Conflict => stats.conflicting += 1,
    }
}
