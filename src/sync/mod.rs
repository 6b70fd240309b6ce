//! Keeping the local valuation cache in step with the provider

pub mod batch;
pub mod fetch;
pub mod incremental;
pub mod rate_limiter;
pub mod scheduler;

pub use batch::{BatchReport, sync_batch};
pub use fetch::{FetchClient, RetryPolicy};
pub use incremental::{SyncManager, SyncOptions, SyncOutcome};
pub use rate_limiter::RateLimiter;
pub use scheduler::{ScheduleSettings, SchedulerState, SyncScheduler};
