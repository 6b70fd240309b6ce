use crate::core::error::StorageError;
use crate::core::instrument::{Instrument, InstrumentCode, SyncMeta};
use crate::core::price::PricePoint;
use crate::core::store::{AppendStats, CacheStore};
use crate::store::{Merge, merge_decision, tally};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

#[derive(Default)]
struct Tables {
    prices: HashMap<InstrumentCode, BTreeMap<NaiveDate, PricePoint>>,
    sync_meta: HashMap<InstrumentCode, SyncMeta>,
    instruments: BTreeMap<InstrumentCode, Instrument>,
}

/// In-memory cache with the same semantics as the disk store
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StorageError> {
        self.inner.read().map_err(|_| StorageError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StorageError> {
        self.inner.write().map_err(|_| StorageError::Poisoned)
    }
}

fn ensure_tracked(tables: &Tables, code: &InstrumentCode) -> Result<(), StorageError> {
    if tables.instruments.contains_key(code) {
        Ok(())
    } else {
        Err(StorageError::NotTracked(code.to_string()))
    }
}

impl CacheStore for MemoryStore {
    fn latest_date(&self, code: &InstrumentCode) -> Result<Option<NaiveDate>, StorageError> {
        let tables = self.read()?;
        Ok(tables
            .prices
            .get(code)
            .and_then(|series| series.keys().next_back().copied()))
    }

    fn append_points(
        &self,
        code: &InstrumentCode,
        points: &[PricePoint],
    ) -> Result<AppendStats, StorageError> {
        let mut stats = AppendStats::default();
        let mut tables = self.write()?;
        ensure_tracked(&tables, code)?;
        let series = tables.prices.entry(code.clone()).or_default();
        for point in points {
            let merge = merge_decision(code, series.get(&point.date), point);
            if let Merge::Insert = merge {
                series.insert(point.date, point.clone());
            }
            tally(&mut stats, &merge);
        }
        debug!(instrument = %code, ?stats, "Appended price points");
        Ok(stats)
    }

    fn read_range(
        &self,
        code: &InstrumentCode,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<PricePoint>, StorageError> {
        if from > to {
            return Ok(Vec::new());
        }
        let tables = self.read()?;
        Ok(tables
            .prices
            .get(code)
            .map(|series| series.range(from..=to).map(|(_, p)| p.clone()).collect())
            .unwrap_or_default())
    }

    fn read_sync_meta(&self, code: &InstrumentCode) -> Result<Option<SyncMeta>, StorageError> {
        Ok(self.read()?.sync_meta.get(code).cloned())
    }

    fn write_sync_meta(&self, code: &InstrumentCode, meta: &SyncMeta) -> Result<(), StorageError> {
        let mut tables = self.write()?;
        ensure_tracked(&tables, code)?;
        tables.sync_meta.insert(code.clone(), meta.clone());
        Ok(())
    }

    fn put_instrument(&self, instrument: &Instrument) -> Result<(), StorageError> {
        self.write()?
            .instruments
            .insert(instrument.code.clone(), instrument.clone());
        Ok(())
    }

    fn get_instrument(&self, code: &InstrumentCode) -> Result<Option<Instrument>, StorageError> {
        Ok(self.read()?.instruments.get(code).cloned())
    }

    fn list_instruments(&self) -> Result<Vec<Instrument>, StorageError> {
        Ok(self.read()?.instruments.values().cloned().collect())
    }

    fn remove_instrument(&self, code: &InstrumentCode) -> Result<bool, StorageError> {
        let mut tables = self.write()?;
        if tables.instruments.remove(code).is_none() {
            return Ok(false);
        }
        tables.prices.remove(code);
        tables.sync_meta.remove(code);
        Ok(true)
    }
}
