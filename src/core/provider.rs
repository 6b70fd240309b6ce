//! Market-data provider abstraction

use crate::core::error::FetchError;
use crate::core::instrument::{InstrumentCode, InstrumentInfo};
use crate::core::price::{DateRange, PricePoint};
use async_trait::async_trait;

/// One page of a provider's history listing. Ordering of `points` is not
/// guaranteed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryPage {
    pub points: Vec<PricePoint>,
    pub has_more: bool,
}

#[async_trait]
pub trait HistoryProvider: Send + Sync {
    /// Fetches one page (1-based) of valuations within `range`.
    async fn get_history(
        &self,
        code: &InstrumentCode,
        range: DateRange,
        page: u32,
    ) -> Result<HistoryPage, FetchError>;

    async fn lookup(&self, code: &InstrumentCode) -> Result<InstrumentInfo, FetchError>;
}
