//! Scripted provider and fixtures shared by unit tests.

use crate::core::{
    DateRange, FetchError, HistoryPage, HistoryProvider, Instrument, InstrumentCode,
    InstrumentInfo, PricePoint,
};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub fn code(s: &str) -> InstrumentCode {
    s.parse().unwrap()
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
    date(y, m, d).and_hms_opt(h, min, 0).unwrap()
}

pub fn instrument(c: &str, inception: Option<NaiveDate>) -> Instrument {
    Instrument {
        code: code(c),
        name: format!("Fund {c}"),
        category: None,
        risk: None,
        inception,
        added_at: NaiveDateTime::default(),
    }
}

/// One valuation per weekday in `from..=to`, rising by 0.01 a day.
pub fn weekday_series(from: NaiveDate, to: NaiveDate) -> Vec<PricePoint> {
    use chrono::Datelike;
    let mut value = 1.0;
    from.iter_days()
        .take_while(|d| *d <= to)
        .filter(|d| d.weekday().number_from_monday() <= 5)
        .map(|d| {
            value += 0.01;
            PricePoint::new(d, (value * 100.0_f64).round() / 100.0)
        })
        .collect()
}

/// A provider serving canned series, with injectable failures and latency.
#[derive(Default)]
pub struct ScriptedProvider {
    series: Mutex<HashMap<InstrumentCode, Vec<PricePoint>>>,
    queued_failures: Mutex<HashMap<InstrumentCode, VecDeque<FetchError>>>,
    permanent_failures: Mutex<HashMap<InstrumentCode, FetchError>>,
    infos: Mutex<HashMap<InstrumentCode, InstrumentInfo>>,
    requests: Mutex<Vec<(InstrumentCode, DateRange, u32)>>,
    calls: AtomicUsize,
    latency: Mutex<Option<Duration>>,
    page_size: Option<usize>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn paged(page_size: usize) -> Self {
        Self {
            page_size: Some(page_size),
            ..Self::default()
        }
    }

    pub fn set_series(&self, code: &InstrumentCode, points: Vec<PricePoint>) {
        self.series.lock().unwrap().insert(code.clone(), points);
    }

    pub fn fail_next(&self, code: &InstrumentCode, err: FetchError) {
        self.queued_failures
            .lock()
            .unwrap()
            .entry(code.clone())
            .or_default()
            .push_back(err);
    }

    pub fn fail_always(&self, code: &InstrumentCode, err: FetchError) {
        self.permanent_failures
            .lock()
            .unwrap()
            .insert(code.clone(), err);
    }

    pub fn set_info(&self, code: &InstrumentCode, info: InstrumentInfo) {
        self.infos.lock().unwrap().insert(code.clone(), info);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<(InstrumentCode, DateRange, u32)> {
        self.requests.lock().unwrap().clone()
    }

    fn scripted_failure(&self, code: &InstrumentCode) -> Option<FetchError> {
        if let Some(err) = self.permanent_failures.lock().unwrap().get(code) {
            return Some(err.clone());
        }
        self.queued_failures
            .lock()
            .unwrap()
            .get_mut(code)
            .and_then(|q| q.pop_front())
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl HistoryProvider for ScriptedProvider {
    async fn get_history(
        &self,
        code: &InstrumentCode,
        range: DateRange,
        page: u32,
    ) -> Result<HistoryPage, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .push((code.clone(), range, page));
        self.simulate_latency().await;

        if let Some(err) = self.scripted_failure(code) {
            return Err(err);
        }

        let mut matching: Vec<PricePoint> = self
            .series
            .lock()
            .unwrap()
            .get(code)
            .map(|s| s.iter().filter(|p| range.contains(p.date)).cloned().collect())
            .unwrap_or_default();
        // Newest first, like the real endpoint
        matching.reverse();

        match self.page_size {
            None => Ok(HistoryPage {
                points: matching,
                has_more: false,
            }),
            Some(size) => {
                let skip = (page.max(1) as usize - 1) * size;
                let points: Vec<_> = matching.iter().skip(skip).take(size).cloned().collect();
                Ok(HistoryPage {
                    has_more: skip + points.len() < matching.len(),
                    points,
                })
            }
        }
    }

    async fn lookup(&self, code: &InstrumentCode) -> Result<InstrumentInfo, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        if let Some(err) = self.scripted_failure(code) {
            return Err(err);
        }
        self.infos
            .lock()
            .unwrap()
            .get(code)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(code.to_string()))
    }
}
