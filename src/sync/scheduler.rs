use super::batch::{BatchReport, sync_batch};
use super::incremental::{SyncManager, SyncOptions};
use crate::core::config::SchedulerConfig;
use crate::core::InstrumentCode;
use anyhow::Result;
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleSettings {
    /// Ascending wall-clock times at which a batch sync is due.
    pub checkpoints: Vec<NaiveTime>,
    pub poll_interval: Duration,
    pub business_days_only: bool,
    pub startup_sync: bool,
    pub startup_window: (NaiveTime, NaiveTime),
}

impl ScheduleSettings {
    pub fn from_config(config: &SchedulerConfig) -> Result<Self> {
        Ok(Self {
            checkpoints: config.checkpoint_times()?,
            poll_interval: config.poll_interval(),
            business_days_only: config.business_days_only,
            startup_sync: config.startup_sync,
            startup_window: config.startup_window_times()?,
        })
    }
}

#[derive(Debug)]
struct Inner {
    state: SchedulerState,
    day: Option<NaiveDate>,
    consumed: BTreeSet<NaiveTime>,
}

/// Runs a full sync of every tracked instrument at each daily checkpoint.
///
/// A checkpoint is due once the wall clock reaches it and it has not yet run
/// today, so a poll that wakes late still catches up. Consumed checkpoints
/// reset when the calendar day changes.
pub struct SyncScheduler {
    manager: Arc<SyncManager>,
    settings: ScheduleSettings,
    inner: Mutex<Inner>,
}

impl SyncScheduler {
    pub fn new(manager: Arc<SyncManager>, settings: ScheduleSettings) -> Self {
        Self {
            manager,
            settings,
            inner: Mutex::new(Inner {
                state: SchedulerState::Idle,
                day: None,
                consumed: BTreeSet::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> SchedulerState {
        self.lock().state
    }

    pub fn settings(&self) -> &ScheduleSettings {
        &self.settings
    }

    pub fn is_business_day(&self, date: NaiveDate) -> bool {
        !self.settings.business_days_only || !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }

    fn roll_day(inner: &mut Inner, today: NaiveDate) {
        if inner.day != Some(today) {
            if inner.day.is_some() {
                debug!("New day {}, resetting checkpoints", today);
            }
            inner.day = Some(today);
            inner.consumed.clear();
        }
    }

    fn due_at(&self, inner: &mut Inner, now: NaiveDateTime) -> Vec<NaiveTime> {
        Self::roll_day(inner, now.date());
        if !self.is_business_day(now.date()) {
            return Vec::new();
        }
        self.settings
            .checkpoints
            .iter()
            .filter(|t| **t <= now.time() && !inner.consumed.contains(*t))
            .copied()
            .collect()
    }

    /// Checkpoints that have been reached today but not yet run.
    pub fn due_checkpoints(&self) -> Vec<NaiveTime> {
        let now = self.manager.clock().now();
        let mut inner = self.lock();
        self.due_at(&mut inner, now)
    }

    /// One poll: runs a batch if any checkpoint is due and the scheduler is
    /// idle.
    pub async fn tick(&self, cancel: &CancellationToken) -> Option<BatchReport> {
        let now = self.manager.clock().now();
        let due = {
            let mut inner = self.lock();
            if inner.state != SchedulerState::Idle {
                return None;
            }
            self.due_at(&mut inner, now)
        };
        if due.is_empty() {
            return None;
        }

        info!("Checkpoint {:?} reached, syncing all instruments", due);
        self.batch_consuming(due, cancel).await
    }

    async fn batch_consuming(
        &self,
        checkpoints: Vec<NaiveTime>,
        cancel: &CancellationToken,
    ) -> Option<BatchReport> {
        {
            let mut inner = self.lock();
            if inner.state != SchedulerState::Idle {
                return None;
            }
            inner.state = SchedulerState::Running;
        }

        let report = self.refresh_all(cancel).await;

        let mut inner = self.lock();
        if !report.cancelled {
            inner.consumed.extend(checkpoints);
        }
        if inner.state == SchedulerState::Running {
            inner.state = SchedulerState::Idle;
        }
        Some(report)
    }

    /// Syncs every tracked instrument now, without checkpoint gating.
    pub async fn refresh_all(&self, cancel: &CancellationToken) -> BatchReport {
        let codes: Vec<InstrumentCode> = match self.manager.store().list_instruments() {
            Ok(instruments) => instruments.into_iter().map(|i| i.code).collect(),
            Err(err) => {
                error!("Cannot list instruments: {}", err);
                return BatchReport::default();
            }
        };
        let report = sync_batch(&self.manager, &codes, SyncOptions::default(), cancel, |_| {}).await;
        if let Some(failure) = report.partial_failure() {
            warn!("{}", failure);
        }
        report
    }

    async fn startup(&self, cancel: &CancellationToken) {
        let now = self.manager.clock().now();
        let (from, to) = self.settings.startup_window;
        if now.time() < from || now.time() > to {
            debug!("Outside startup window {}-{}, skipping startup sync", from, to);
            return;
        }

        let passed: Vec<NaiveTime> = {
            let mut inner = self.lock();
            Self::roll_day(&mut inner, now.date());
            self.settings
                .checkpoints
                .iter()
                .filter(|t| **t <= now.time())
                .copied()
                .collect()
        };
        info!("Running startup sync");
        self.batch_consuming(passed, cancel).await;
    }

    /// Polls until `cancel` fires, then enters `Stopped`.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            checkpoints = ?self.settings.checkpoints,
            poll = ?self.settings.poll_interval,
            "Sync scheduler started"
        );
        if self.settings.startup_sync {
            self.startup(&cancel).await;
        }

        loop {
            if cancel.is_cancelled() {
                break;
            }
            self.tick(&cancel).await;

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }

        self.lock().state = SchedulerState::Stopped;
        info!("Sync scheduler stopped");
    }
}
