//! Durable cache abstraction. Implementations live under `crate::store`.

use crate::core::error::StorageError;
use crate::core::instrument::{Instrument, InstrumentCode, SyncMeta};
use crate::core::price::PricePoint;
use chrono::NaiveDate;

/// What an `append_points` call did with each incoming point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendStats {
    /// New (instrument, date) keys written.
    pub inserted: usize,
    /// Points identical to what was already stored.
    pub unchanged: usize,
    /// Points that disagreed with an already stored date; the stored value wins.
    pub conflicting: usize,
}

/// Append-only valuation series, per-instrument sync metadata and the
/// instrument registry.
///
/// Calls complete without suspending and are safe from concurrent callers.
/// Writes for one instrument are atomic per call. Prices and sync metadata
/// are only written for registered instruments; otherwise the write is
/// dropped with [`StorageError::NotTracked`].
pub trait CacheStore: Send + Sync {
    fn latest_date(&self, code: &InstrumentCode) -> Result<Option<NaiveDate>, StorageError>;

    /// Idempotent: a date already cached is never duplicated or rewritten.
    /// Fails with `NotTracked` when `code` is not registered.
    fn append_points(
        &self,
        code: &InstrumentCode,
        points: &[PricePoint],
    ) -> Result<AppendStats, StorageError>;

    /// Points with `from <= date <= to`, ascending by date.
    fn read_range(
        &self,
        code: &InstrumentCode,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<PricePoint>, StorageError>;

    fn read_sync_meta(&self, code: &InstrumentCode) -> Result<Option<SyncMeta>, StorageError>;

    /// Fails with `NotTracked` when `code` is not registered.
    fn write_sync_meta(&self, code: &InstrumentCode, meta: &SyncMeta) -> Result<(), StorageError>;

    /// Inserts or replaces the instrument record.
    fn put_instrument(&self, instrument: &Instrument) -> Result<(), StorageError>;

    fn get_instrument(&self, code: &InstrumentCode) -> Result<Option<Instrument>, StorageError>;

    /// All tracked instruments ordered by code.
    fn list_instruments(&self) -> Result<Vec<Instrument>, StorageError>;

    /// Removes the instrument together with its prices and sync metadata.
    /// Returns false if it was not tracked.
    fn remove_instrument(&self, code: &InstrumentCode) -> Result<bool, StorageError>;
}
