use super::rate_limiter::RateLimiter;
use crate::core::config::FetchConfig;
use crate::core::{
    DateRange, FetchError, HistoryProvider, InstrumentCode, InstrumentInfo, PricePoint,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Exponential backoff for transient provider failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.backoff_base(),
            max_delay: config.backoff_cap(),
        }
    }

    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based). A provider hint can
    /// lengthen the delay but never past the cap.
    pub fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);
        match hint {
            Some(hint) => delay.max(hint).min(self.max_delay),
            None => delay,
        }
    }
}

/// Performs logical fetches against the provider: every underlying call is
/// rate limited, bounded by a timeout and retried when the failure is
/// transient.
pub struct FetchClient {
    provider: Arc<dyn HistoryProvider>,
    limiter: Arc<RateLimiter>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl FetchClient {
    pub fn new(
        provider: Arc<dyn HistoryProvider>,
        limiter: Arc<RateLimiter>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            limiter,
            timeout,
            retry,
        }
    }

    pub fn from_config(
        provider: Arc<dyn HistoryProvider>,
        limiter: Arc<RateLimiter>,
        config: &FetchConfig,
    ) -> Self {
        Self::new(
            provider,
            limiter,
            config.timeout(),
            RetryPolicy::from_config(config),
        )
    }

    /// Valuations within `range`, ascending by date without duplicates.
    ///
    /// An empty result means the provider confirmed there is nothing in the
    /// range.
    #[instrument(skip(self, cancel), fields(instrument = %code, range = %range))]
    pub async fn fetch(
        &self,
        code: &InstrumentCode,
        range: DateRange,
        cancel: &CancellationToken,
    ) -> Result<Vec<PricePoint>, FetchError> {
        if range.is_empty() {
            return Ok(Vec::new());
        }

        let mut points = Vec::new();
        let mut page = 1u32;
        loop {
            let batch = self
                .call(cancel, || self.provider.get_history(code, range, page))
                .await?;
            let page_len = batch.points.len();
            points.extend(batch.points);
            if !batch.has_more || page_len == 0 {
                break;
            }
            page += 1;
        }
        debug!("Fetched {} points over {} page(s)", points.len(), page);

        validate(code, range, points)
    }

    #[instrument(skip(self, cancel), fields(instrument = %code))]
    pub async fn lookup(
        &self,
        code: &InstrumentCode,
        cancel: &CancellationToken,
    ) -> Result<InstrumentInfo, FetchError> {
        self.call(cancel, || self.provider.lookup(code)).await
    }

    /// One provider call with its own retry budget.
    async fn call<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                result = async {
                    self.limiter.acquire().await;
                    match tokio::time::timeout(self.timeout, op()).await {
                        Ok(result) => result,
                        Err(_) => Err(FetchError::Timeout(self.timeout)),
                    }
                } => result,
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.retry.max_retries => err,
                Err(err) => return Err(err),
            };

            attempt += 1;
            let hint = match &err {
                FetchError::RateLimited { retry_after } => *retry_after,
                _ => None,
            };
            let delay = self.retry.delay_for(attempt, hint);
            warn!(
                "Attempt {}/{} failed: {}. Retrying in {:?}",
                attempt,
                self.retry.max_retries + 1,
                err,
                delay
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Rejects nonsensical values, drops out-of-range points and imposes
/// ascending date order with one point per date.
fn validate(
    code: &InstrumentCode,
    range: DateRange,
    points: Vec<PricePoint>,
) -> Result<Vec<PricePoint>, FetchError> {
    for point in &points {
        if !point.unit_value.is_finite() || point.unit_value <= 0.0 {
            return Err(FetchError::Malformed(format!(
                "{code}: invalid unit value {} on {}",
                point.unit_value, point.date
            )));
        }
        let optional_ok = [point.cumulative_value, point.growth_rate]
            .iter()
            .flatten()
            .all(|v| v.is_finite());
        if !optional_ok {
            return Err(FetchError::Malformed(format!(
                "{code}: non-finite value on {}",
                point.date
            )));
        }
    }

    let total = points.len();
    let mut kept: Vec<PricePoint> = points
        .into_iter()
        .filter(|p| range.contains(p.date))
        .collect();
    if kept.len() < total {
        debug!("Dropped {} points outside {}", total - kept.len(), range);
    }

    kept.sort_by_key(|p| p.date);
    kept.dedup_by_key(|p| p.date);
    Ok(kept)
}
