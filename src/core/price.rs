//! Valuation records and date windows

use anyhow::Result;
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

/// One published valuation of an instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub unit_value: f64,
    pub cumulative_value: Option<f64>,
    /// Day-over-day change in percent.
    pub growth_rate: Option<f64>,
}

impl PricePoint {
    pub fn new(date: NaiveDate, unit_value: f64) -> Self {
        Self {
            date,
            unit_value,
            cumulative_value: None,
            growth_rate: None,
        }
    }
}

/// Inclusive range of calendar dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from <= date && date <= self.to
    }

    pub fn is_empty(&self) -> bool {
        self.from > self.to
    }
}

impl Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..={}", self.from, self.to)
    }
}

/// Window selections offered to chart consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum ChartPeriod {
    OneMonth,
    ThreeMonths,
    SixMonths,
    OneYear,
    ThreeYears,
    FiveYears,
    All,
}

impl Display for ChartPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ChartPeriod::OneMonth => "1m",
                ChartPeriod::ThreeMonths => "3m",
                ChartPeriod::SixMonths => "6m",
                ChartPeriod::OneYear => "1y",
                ChartPeriod::ThreeYears => "3y",
                ChartPeriod::FiveYears => "5y",
                ChartPeriod::All => "all",
            }
        )
    }
}

impl ChartPeriod {
    pub fn to_days(&self) -> Option<u64> {
        match self {
            ChartPeriod::OneMonth => Some(30),
            ChartPeriod::ThreeMonths => Some(90),
            ChartPeriod::SixMonths => Some(180),
            ChartPeriod::OneYear => Some(365),
            ChartPeriod::ThreeYears => Some(365 * 3),
            ChartPeriod::FiveYears => Some(365 * 5),
            ChartPeriod::All => None,
        }
    }

    /// First date of the window ending at `today`, or `None` for the full series.
    pub fn start(&self, today: NaiveDate) -> Option<NaiveDate> {
        self.to_days()
            .map(|days| today.checked_sub_days(Days::new(days)).unwrap_or(NaiveDate::MIN))
    }
}

impl FromStr for ChartPeriod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "1m" => Ok(ChartPeriod::OneMonth),
            "3m" => Ok(ChartPeriod::ThreeMonths),
            "6m" => Ok(ChartPeriod::SixMonths),
            "1y" => Ok(ChartPeriod::OneYear),
            "3y" => Ok(ChartPeriod::ThreeYears),
            "5y" => Ok(ChartPeriod::FiveYears),
            "all" => Ok(ChartPeriod::All),
            _ => Err(anyhow::anyhow!("Invalid chart period: {}", s)),
        }
    }
}
