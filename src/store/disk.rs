use crate::core::error::StorageError;
use crate::core::instrument::{Instrument, InstrumentCode, SyncMeta};
use crate::core::price::PricePoint;
use crate::core::store::{AppendStats, CacheStore};
use crate::store::{Merge, merge_decision, price_key, price_prefix, tally};
use chrono::NaiveDate;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

const PRICES: &str = "prices";
const SYNC_META: &str = "sync_meta";
const INSTRUMENTS: &str = "instruments";

/// fjall-backed cache. Each logical table is a partition; values are JSON.
pub struct DiskStore {
    keyspace: Keyspace,
    prices: PartitionHandle,
    sync_meta: PartitionHandle,
    instruments: PartitionHandle,
    // Serializes read-check-insert so the (instrument, date) key stays unique
    // under concurrent appends.
    write_lock: Mutex<()>,
}

impl DiskStore {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let keyspace = Config::new(path).open()?;
        let prices = keyspace.open_partition(PRICES, PartitionCreateOptions::default())?;
        let sync_meta = keyspace.open_partition(SYNC_META, PartitionCreateOptions::default())?;
        let instruments = keyspace.open_partition(INSTRUMENTS, PartitionCreateOptions::default())?;
        debug!("Opened cache store at {}", path.display());

        Ok(Self {
            keyspace,
            prices,
            sync_meta,
            instruments,
            write_lock: Mutex::new(()),
        })
    }

    fn get_json<T: DeserializeOwned>(
        partition: &PartitionHandle,
        key: &[u8],
    ) -> Result<Option<T>, StorageError> {
        match partition.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Called with `write_lock` held so a concurrent removal cannot slip in
    /// between the check and the commit.
    fn ensure_tracked(&self, code: &InstrumentCode) -> Result<(), StorageError> {
        if self.instruments.contains_key(code.as_str().as_bytes())? {
            Ok(())
        } else {
            Err(StorageError::NotTracked(code.to_string()))
        }
    }

    fn persist(&self) -> Result<(), StorageError> {
        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }
}

/// Keeps key formatting inside the four-digit-year range.
fn clamp_date(date: NaiveDate) -> NaiveDate {
    let min = NaiveDate::from_ymd_opt(1, 1, 1).unwrap_or(NaiveDate::MIN);
    let max = NaiveDate::from_ymd_opt(9999, 12, 31).unwrap_or(NaiveDate::MAX);
    date.clamp(min, max)
}

impl CacheStore for DiskStore {
    fn latest_date(&self, code: &InstrumentCode) -> Result<Option<NaiveDate>, StorageError> {
        match self.prices.prefix(price_prefix(code)).next_back() {
            Some(entry) => {
                let (_, value) = entry?;
                let point: PricePoint = serde_json::from_slice(&value)?;
                Ok(Some(point.date))
            }
            None => Ok(None),
        }
    }

    fn append_points(
        &self,
        code: &InstrumentCode,
        points: &[PricePoint],
    ) -> Result<AppendStats, StorageError> {
        let mut stats = AppendStats::default();
        if points.is_empty() {
            return Ok(stats);
        }

        let _guard = self.write_lock.lock().map_err(|_| StorageError::Poisoned)?;
        self.ensure_tracked(code)?;
        let mut batch = self.keyspace.batch();
        let mut staged: HashMap<NaiveDate, &PricePoint> = HashMap::new();

        for point in points {
            let key = price_key(code, clamp_date(point.date));
            let stored: Option<PricePoint> = match staged.get(&point.date) {
                Some(p) => Some((*p).clone()),
                None => Self::get_json(&self.prices, &key)?,
            };
            let merge = merge_decision(code, stored.as_ref(), point);
            if let Merge::Insert = merge {
                batch.insert(&self.prices, key, serde_json::to_vec(point)?);
                staged.insert(point.date, point);
            }
            tally(&mut stats, &merge);
        }

        if stats.inserted > 0 {
            batch.commit()?;
            self.persist()?;
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
        let start = price_key(code, clamp_date(from));
        let end = price_key(code, clamp_date(to));

        self.prices
            .range(start..=end)
            .map(|entry| {
                let (_, value) = entry?;
                Ok(serde_json::from_slice(&value)?)
            })
            .collect()
    }

    fn read_sync_meta(&self, code: &InstrumentCode) -> Result<Option<SyncMeta>, StorageError> {
        Self::get_json(&self.sync_meta, code.as_str().as_bytes())
    }

    fn write_sync_meta(&self, code: &InstrumentCode, meta: &SyncMeta) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().map_err(|_| StorageError::Poisoned)?;
        self.ensure_tracked(code)?;
        self.sync_meta
            .insert(code.as_str().as_bytes(), serde_json::to_vec(meta)?)?;
        self.persist()?;
        debug!(instrument = %code, status = %meta.status, "Wrote sync metadata");
        Ok(())
    }

    fn put_instrument(&self, instrument: &Instrument) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().map_err(|_| StorageError::Poisoned)?;
        self.instruments.insert(
            instrument.code.as_str().as_bytes(),
            serde_json::to_vec(instrument)?,
        )?;
        self.persist()
    }

    fn get_instrument(&self, code: &InstrumentCode) -> Result<Option<Instrument>, StorageError> {
        Self::get_json(&self.instruments, code.as_str().as_bytes())
    }

    fn list_instruments(&self) -> Result<Vec<Instrument>, StorageError> {
        self.instruments
            .iter()
            .map(|entry| {
                let (_, value) = entry?;
                Ok(serde_json::from_slice(&value)?)
            })
            .collect()
    }

    fn remove_instrument(&self, code: &InstrumentCode) -> Result<bool, StorageError> {
        let _guard = self.write_lock.lock().map_err(|_| StorageError::Poisoned)?;
        let key = code.as_str().as_bytes();
        if !self.instruments.contains_key(key)? {
            return Ok(false);
        }

        let mut batch = self.keyspace.batch();
        let mut removed = 0usize;
        for entry in self.prices.prefix(price_prefix(code)) {
            let (price_key, _) = entry?;
            batch.remove(&self.prices, price_key);
            removed += 1;
        }
        batch.remove(&self.sync_meta, key);
        batch.remove(&self.instruments, key);
        batch.commit()?;
        self.persist()?;

        debug!(instrument = %code, prices = removed, "Removed instrument");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::instrument::SyncStatus;
    use chrono::NaiveDateTime;
    use tempfile::tempdir;

    fn code(s: &str) -> InstrumentCode {
        s.parse().unwrap()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn instrument(c: &str) -> Instrument {
        Instrument {
            code: code(c),
            name: format!("Fund {c}"),
            category: None,
            risk: None,
            inception: Some(day(1)),
            added_at: NaiveDateTime::default(),
        }
    }

    #[test]
    fn test_disk_store_append_and_read() {
        let dir = tempdir().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        let fund = code("110011");
        store.put_instrument(&instrument("110011")).unwrap();

        assert!(store.latest_date(&fund).unwrap().is_none());

        let stats = store
            .append_points(
                &fund,
                &[PricePoint::new(day(3), 1.02), PricePoint::new(day(2), 1.01)],
            )
            .unwrap();
        assert_eq!(stats.inserted, 2);
        assert_eq!(store.latest_date(&fund).unwrap(), Some(day(3)));

        let points = store.read_range(&fund, day(1), day(31)).unwrap();
        let dates: Vec<_> = points.iter().map(|p| p.date).collect();
        assert_eq!(dates, vec![day(2), day(3)]);
    }

    #[test]
    fn test_disk_store_append_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        let fund = code("110011");
        store.put_instrument(&instrument("110011")).unwrap();
        let points = vec![PricePoint::new(day(2), 1.01), PricePoint::new(day(3), 1.02)];

        store.append_points(&fund, &points).unwrap();
        let again = store.append_points(&fund, &points).unwrap();
        assert_eq!(again.inserted, 0);
        assert_eq!(again.unchanged, 2);

        // A different value for a cached date does not rewrite history
        let conflict = store
            .append_points(&fund, &[PricePoint::new(day(2), 9.99)])
            .unwrap();
        assert_eq!(conflict.conflicting, 1);
        let stored = store.read_range(&fund, day(2), day(2)).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].unit_value, 1.01);
    }

    #[test]
    fn test_disk_store_instruments_do_not_share_ranges() {
        let dir = tempdir().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        store.put_instrument(&instrument("110011")).unwrap();
        store.put_instrument(&instrument("110012")).unwrap();
        store
            .append_points(&code("110011"), &[PricePoint::new(day(5), 1.0)])
            .unwrap();
        store
            .append_points(&code("110012"), &[PricePoint::new(day(9), 2.0)])
            .unwrap();

        assert_eq!(store.latest_date(&code("110011")).unwrap(), Some(day(5)));
        assert_eq!(
            store.read_range(&code("110012"), day(1), day(31)).unwrap().len(),
            1
        );
    }

    #[test]
    fn test_disk_store_reopen_keeps_data() {
        let dir = tempdir().unwrap();
        let fund = code("161725");
        {
            let store = DiskStore::open(dir.path()).unwrap();
            store.put_instrument(&instrument("161725")).unwrap();
            store
                .append_points(&fund, &[PricePoint::new(day(4), 1.5)])
                .unwrap();
            store.write_sync_meta(&fund, &SyncMeta::pending()).unwrap();
        }

        let store = DiskStore::open(dir.path()).unwrap();
        assert_eq!(store.latest_date(&fund).unwrap(), Some(day(4)));
        assert_eq!(
            store.read_sync_meta(&fund).unwrap().unwrap().status,
            SyncStatus::Pending
        );
        assert_eq!(store.list_instruments().unwrap().len(), 1);
    }

    #[test]
    fn test_disk_store_remove_cascades() {
        let dir = tempdir().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        let fund = code("110011");
        let other = code("110012");
        store.put_instrument(&instrument("110011")).unwrap();
        store.put_instrument(&instrument("110012")).unwrap();
        store
            .append_points(&fund, &[PricePoint::new(day(2), 1.0), PricePoint::new(day(3), 1.1)])
            .unwrap();
        store
            .append_points(&other, &[PricePoint::new(day(2), 2.0)])
            .unwrap();
        store.write_sync_meta(&fund, &SyncMeta::pending()).unwrap();

        assert!(store.remove_instrument(&fund).unwrap());
        assert!(!store.remove_instrument(&fund).unwrap());

        assert!(store.get_instrument(&fund).unwrap().is_none());
        assert!(store.latest_date(&fund).unwrap().is_none());
        assert!(store.read_sync_meta(&fund).unwrap().is_none());
        assert_eq!(store.latest_date(&other).unwrap(), Some(day(2)));
    }

    #[test]
    fn test_disk_store_rejects_writes_for_untracked_instrument() {
        let dir = tempdir().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        let fund = code("110011");

        assert_eq!(
            store.append_points(&fund, &[PricePoint::new(day(2), 1.0)]),
            Err(StorageError::NotTracked("110011".into()))
        );
        assert_eq!(
            store.write_sync_meta(&fund, &SyncMeta::pending()),
            Err(StorageError::NotTracked("110011".into()))
        );
        assert!(store.latest_date(&fund).unwrap().is_none());
        assert!(store.read_sync_meta(&fund).unwrap().is_none());

        // Once removed, late writes from an in-flight sync are dropped
        store.put_instrument(&instrument("110011")).unwrap();
        store.remove_instrument(&fund).unwrap();
        assert!(store
            .append_points(&fund, &[PricePoint::new(day(3), 1.1)])
            .is_err());
        assert!(store.latest_date(&fund).unwrap().is_none());
    }
}
