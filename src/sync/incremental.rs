use super::fetch::FetchClient;
use crate::core::{
    CacheStore, Clock, DateRange, FetchError, InstrumentCode, PricePoint, StorageError, SyncError,
    SyncMeta,
};
use chrono::NaiveDate;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Re-request the full history from inception instead of the missing tail.
    pub force: bool,
}

/// What one instrument's sync did. A failed sync is still an outcome; its
/// error has already been recorded in the instrument's sync metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome {
    pub instrument: InstrumentCode,
    pub updated: bool,
    /// Start of the requested range; `None` when nothing was requested.
    pub from_date: Option<NaiveDate>,
    pub to_date: NaiveDate,
    pub fetched: usize,
    pub inserted: usize,
    pub error: Option<SyncError>,
}

impl SyncOutcome {
    fn up_to_date(instrument: InstrumentCode, today: NaiveDate) -> Self {
        Self {
            instrument,
            updated: false,
            from_date: None,
            to_date: today,
            fetched: 0,
            inserted: 0,
            error: None,
        }
    }

    pub(crate) fn failed(instrument: InstrumentCode, today: NaiveDate, error: SyncError) -> Self {
        Self {
            error: Some(error),
            ..Self::up_to_date(instrument, today)
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }

    /// Turns a recorded failure back into an error for callers that asked for
    /// this sync explicitly.
    pub fn into_result(mut self) -> Result<Self, SyncError> {
        match self.error.take() {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

/// Reconciles the cached series of one instrument with the provider.
pub struct SyncManager {
    store: Arc<dyn CacheStore>,
    fetcher: FetchClient,
    clock: Arc<dyn Clock>,
    earliest_backfill: NaiveDate,
}

impl SyncManager {
    pub fn new(
        store: Arc<dyn CacheStore>,
        fetcher: FetchClient,
        clock: Arc<dyn Clock>,
        earliest_backfill: NaiveDate,
    ) -> Self {
        Self {
            store,
            fetcher,
            clock,
            earliest_backfill,
        }
    }

    pub fn fetcher(&self) -> &FetchClient {
        &self.fetcher
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Brings the instrument's series up to today.
    ///
    /// Errors are returned only for an untracked instrument (including one
    /// removed while the sync was in flight) or cancellation; fetch and
    /// storage failures are recorded and carried in the outcome.
    #[instrument(skip(self, cancel), fields(instrument = %code))]
    pub async fn sync(
        &self,
        code: &InstrumentCode,
        options: SyncOptions,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome, SyncError> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        let instrument = self
            .store
            .get_instrument(code)?
            .ok_or_else(|| SyncError::UnknownInstrument(code.to_string()))?;
        let today = self.clock.today();

        let previous = match self.store.read_sync_meta(code) {
            Ok(meta) => meta,
            Err(err) => return Ok(self.record_failure(code, None, today, err.into())),
        };
        let latest = match self.store.latest_date(code) {
            Ok(latest) => latest,
            Err(err) => return Ok(self.record_failure(code, previous.as_ref(), today, err.into())),
        };

        let history_start = instrument.inception.unwrap_or(self.earliest_backfill);
        let from = match (options.force, latest) {
            (false, Some(latest)) => match latest.succ_opt() {
                Some(next) => next,
                None => return Ok(SyncOutcome::up_to_date(code.clone(), today)),
            },
            _ => history_start,
        };

        if from > today && !options.force {
            debug!("Cache is current through {:?}, nothing to fetch", latest);
            return Ok(SyncOutcome::up_to_date(code.clone(), today));
        }

        if let Err(err) = self
            .store
            .write_sync_meta(code, &SyncMeta::in_progress(previous.as_ref()))
        {
            return self.storage_failure(code, previous.as_ref(), today, err);
        }

        let range = DateRange::new(from, today);
        let mut points = match self.fetcher.fetch(code, range, cancel).await {
            Ok(points) => points,
            Err(FetchError::Cancelled) => {
                self.restore(code, previous.as_ref());
                return Err(SyncError::Cancelled);
            }
            Err(err) => return Ok(self.record_failure(code, previous.as_ref(), today, err.into())),
        };
        let fetched = points.len();

        let anchor = match latest {
            Some(latest) if latest < from => self.point_at(code, latest),
            _ => None,
        };
        fill_growth_rates(anchor.as_ref(), &mut points);

        let stats = match self.store.append_points(code, &points) {
            Ok(stats) => stats,
            Err(err) => return self.storage_failure(code, previous.as_ref(), today, err),
        };

        let through = points.last().map_or(today, |p| p.date);
        let meta = SyncMeta::synced(previous.as_ref(), through, self.clock.now());
        if let Err(err) = self.store.write_sync_meta(code, &meta) {
            return self.storage_failure(code, previous.as_ref(), today, err);
        }

        info!(
            "Synced {} from {}: {} fetched, {} new",
            code, from, fetched, stats.inserted
        );
        Ok(SyncOutcome {
            instrument: code.clone(),
            updated: stats.inserted > 0,
            from_date: Some(from),
            to_date: today,
            fetched,
            inserted: stats.inserted,
            error: None,
        })
    }

    fn point_at(&self, code: &InstrumentCode, date: NaiveDate) -> Option<PricePoint> {
        self.store
            .read_range(code, date, date)
            .ok()
            .and_then(|mut points| points.pop())
    }

    /// A removed instrument ends the sync as unknown; anything else is
    /// recorded like a fetch failure.
    fn storage_failure(
        &self,
        code: &InstrumentCode,
        previous: Option<&SyncMeta>,
        today: NaiveDate,
        error: StorageError,
    ) -> Result<SyncOutcome, SyncError> {
        match error {
            StorageError::NotTracked(_) => {
                info!("{} was removed during sync, discarding results", code);
                Err(SyncError::UnknownInstrument(code.to_string()))
            }
            error => Ok(self.record_failure(code, previous, today, error.into())),
        }
    }

    /// Puts back the record replaced by the in-progress marker.
    fn restore(&self, code: &InstrumentCode, previous: Option<&SyncMeta>) {
        if let Some(previous) = previous
            && let Err(err) = self.store.write_sync_meta(code, previous)
        {
            debug!("Could not restore sync metadata for {}: {}", code, err);
        }
    }

    fn record_failure(
        &self,
        code: &InstrumentCode,
        previous: Option<&SyncMeta>,
        today: NaiveDate,
        error: SyncError,
    ) -> SyncOutcome {
        warn!("Sync failed for {}: {}", code, error);
        let meta = SyncMeta::failed(previous, error.to_string(), self.clock.now());
        if let Err(write_err) = self.store.write_sync_meta(code, &meta) {
            warn!("Could not record sync failure for {}: {}", code, write_err);
        }
        SyncOutcome::failed(code.clone(), today, error)
    }
}

/// Providers occasionally omit the day's change; derive it from the previous
/// value, starting from `anchor` (the last cached point before `points`).
fn fill_growth_rates(anchor: Option<&PricePoint>, points: &mut [PricePoint]) {
    let mut previous = anchor.map(|p| p.unit_value);
    for point in points.iter_mut() {
        if point.growth_rate.is_none()
            && let Some(prev) = previous
            && prev > 0.0
        {
            let rate = (point.unit_value / prev - 1.0) * 100.0;
            point.growth_rate = Some((rate * 100.0).round() / 100.0);
        }
        previous = Some(point.unit_value);
    }
}
