//! Core domain types and the abstractions the sync engine is built on

pub mod clock;
pub mod config;
pub mod error;
pub mod instrument;
pub mod log;
pub mod price;
pub mod provider;
pub mod store;

// Re-export main types for cleaner imports
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{
    FetchError, FetchErrorKind, PartialBatchFailure, RegistryError, StorageError, SyncError,
};
pub use instrument::{Instrument, InstrumentCode, InstrumentInfo, SyncMeta, SyncStatus};
pub use price::{ChartPeriod, DateRange, PricePoint};
pub use provider::{HistoryPage, HistoryProvider};
pub use store::{AppendStats, CacheStore};
