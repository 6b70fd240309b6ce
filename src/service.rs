//! Operations offered to consumers of the cache: chart series, explicit
//! refreshes, sync status and the instrument registry.

use crate::core::{
    CacheStore, ChartPeriod, Instrument, InstrumentCode, RegistryError, StorageError, SyncError,
    SyncMeta,
};
use crate::indicators::IndicatorSnapshot;
use crate::sync::{BatchReport, SyncManager, SyncOptions, SyncOutcome, sync_batch};
use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Cached values for one instrument over a period, with indicators aligned
/// index-for-index to `dates`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSeries {
    pub instrument: InstrumentCode,
    pub period: ChartPeriod,
    pub dates: Vec<NaiveDate>,
    pub values: Vec<f64>,
    pub indicators: IndicatorSnapshot,
}

impl ChartSeries {
    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

/// Fields for a new instrument. Without a name, the provider is asked for
/// name, category and inception date.
#[derive(Debug, Clone)]
pub struct NewInstrument {
    pub code: InstrumentCode,
    pub name: Option<String>,
    pub category: Option<String>,
    pub risk: Option<String>,
    pub inception: Option<NaiveDate>,
}

impl NewInstrument {
    pub fn new(code: InstrumentCode) -> Self {
        Self {
            code,
            name: None,
            category: None,
            risk: None,
            inception: None,
        }
    }
}

/// Corrections to an instrument's descriptive fields; `None` keeps the
/// current value.
#[derive(Debug, Clone, Default)]
pub struct InstrumentUpdate {
    pub name: Option<String>,
    pub category: Option<String>,
    pub risk: Option<String>,
}

pub struct MarketData {
    manager: Arc<SyncManager>,
}

impl MarketData {
    pub fn new(manager: Arc<SyncManager>) -> Self {
        Self { manager }
    }

    fn store(&self) -> &Arc<dyn CacheStore> {
        self.manager.store()
    }

    /// Reads the cache only; never triggers a fetch. An instrument without
    /// cached data yields an empty series.
    pub fn get_chart_series(
        &self,
        code: &InstrumentCode,
        period: ChartPeriod,
    ) -> Result<ChartSeries, StorageError> {
        let today = self.manager.clock().today();
        let from = period.start(today).unwrap_or(NaiveDate::MIN);
        let points = self.store().read_range(code, from, today)?;
        debug!("Chart {} {}: {} points", code, period, points.len());

        let (dates, values): (Vec<_>, Vec<_>) =
            points.iter().map(|p| (p.date, p.unit_value)).unzip();
        Ok(ChartSeries {
            instrument: code.clone(),
            period,
            indicators: IndicatorSnapshot::compute(&values),
            dates,
            values,
        })
    }

    /// Explicit refresh of one instrument; failures are returned after being
    /// recorded.
    pub async fn trigger_sync(
        &self,
        code: &InstrumentCode,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome, SyncError> {
        self.manager
            .sync(code, SyncOptions { force }, cancel)
            .await?
            .into_result()
    }

    /// Explicit refresh of every tracked instrument. Individual failures are
    /// reported in the batch, not as an error.
    pub async fn trigger_sync_all<F>(
        &self,
        force: bool,
        cancel: &CancellationToken,
        on_outcome: F,
    ) -> Result<BatchReport, SyncError>
    where
        F: FnMut(&SyncOutcome),
    {
        let codes: Vec<InstrumentCode> = self
            .store()
            .list_instruments()?
            .into_iter()
            .map(|i| i.code)
            .collect();
        Ok(sync_batch(&self.manager, &codes, SyncOptions { force }, cancel, on_outcome).await)
    }

    pub fn get_sync_status(&self, code: &InstrumentCode) -> Result<Option<SyncMeta>, StorageError> {
        self.store().read_sync_meta(code)
    }

    pub fn get_instrument(&self, code: &InstrumentCode) -> Result<Option<Instrument>, StorageError> {
        self.store().get_instrument(code)
    }

    pub fn list_instruments(&self) -> Result<Vec<Instrument>, StorageError> {
        self.store().list_instruments()
    }

    /// Registers an instrument with a `pending` sync status. History is not
    /// fetched here; see [`MarketData::spawn_sync`].
    pub async fn add_instrument(
        &self,
        new: NewInstrument,
        cancel: &CancellationToken,
    ) -> Result<Instrument, RegistryError> {
        if self.store().get_instrument(&new.code)?.is_some() {
            return Err(RegistryError::AlreadyTracked(new.code.to_string()));
        }

        let (name, category, inception) = match new.name.filter(|n| !n.trim().is_empty()) {
            Some(name) => (name, new.category, new.inception),
            None => {
                let info = self.manager.fetcher().lookup(&new.code, cancel).await?;
                (
                    info.name,
                    new.category.or(info.category),
                    new.inception.or(info.inception),
                )
            }
        };

        let instrument = Instrument {
            code: new.code,
            name,
            category,
            risk: new.risk,
            inception,
            added_at: self.manager.clock().now(),
        };
        self.store().put_instrument(&instrument)?;
        self.store()
            .write_sync_meta(&instrument.code, &SyncMeta::pending())?;
        info!("Tracking {} ({})", instrument.code, instrument.name);
        Ok(instrument)
    }

    /// Runs a sync of `code` in the background, typically right after
    /// registration.
    pub fn spawn_sync(
        &self,
        code: InstrumentCode,
        cancel: CancellationToken,
    ) -> JoinHandle<Result<SyncOutcome, SyncError>> {
        let manager = Arc::clone(&self.manager);
        tokio::spawn(async move {
            manager
                .sync(&code, SyncOptions::default(), &cancel)
                .await?
                .into_result()
        })
    }

    pub fn update_instrument(
        &self,
        code: &InstrumentCode,
        update: InstrumentUpdate,
    ) -> Result<Option<Instrument>, StorageError> {
        let Some(mut instrument) = self.store().get_instrument(code)? else {
            return Ok(None);
        };
        if let Some(name) = update.name {
            instrument.name = name;
        }
        if update.category.is_some() {
            instrument.category = update.category;
        }
        if update.risk.is_some() {
            instrument.risk = update.risk;
        }
        self.store().put_instrument(&instrument)?;
        Ok(Some(instrument))
    }

    /// Stops tracking `code` and deletes its cached history.
    pub fn remove_instrument(&self, code: &InstrumentCode) -> Result<bool, StorageError> {
        let removed = self.store().remove_instrument(code)?;
        if removed {
            info!("Removed {} and its cached history", code);
        }
        Ok(removed)
    }
}
