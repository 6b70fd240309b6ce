pub mod cli;
pub mod core;
pub mod indicators;
pub mod providers;
pub mod service;
pub mod store;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

use crate::core::config::AppConfig;
use crate::core::{
    CacheStore, ChartPeriod, Clock, HistoryProvider, InstrumentCode, RegistryError, SystemClock,
};
use crate::providers::EastmoneyProvider;
use crate::service::{MarketData, NewInstrument};
use crate::sync::{FetchClient, RateLimiter, ScheduleSettings, SyncManager, SyncScheduler};
use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub enum AppCommand {
    Add {
        code: String,
        name: Option<String>,
        category: Option<String>,
        risk: Option<String>,
        inception: Option<NaiveDate>,
    },
    Remove {
        code: String,
    },
    List,
    Sync {
        code: Option<String>,
        force: bool,
    },
    Status {
        code: Option<String>,
    },
    Chart {
        code: String,
        period: ChartPeriod,
        rows: usize,
    },
    Daemon,
}

/// The wired-up engine: one store, one limiter and one provider shared by
/// foreground commands and the scheduler.
pub struct App {
    config: AppConfig,
    service: MarketData,
    scheduler: Arc<SyncScheduler>,
}

impl App {
    /// Opens the on-disk cache and the configured provider.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let data_dir = config.data_dir()?;
        let store = store::open_disk_store(&data_dir)
            .with_context(|| format!("Failed to open cache at {}", data_dir.display()))?;
        let provider_config = config
            .providers
            .eastmoney
            .clone()
            .ok_or_else(|| anyhow!("No market data provider configured"))?;
        let provider = EastmoneyProvider::new(&provider_config)?;

        Self::with_components(
            config,
            Arc::new(store),
            Arc::new(provider),
            Arc::new(SystemClock),
        )
    }

    pub fn with_components(
        config: AppConfig,
        store: Arc<dyn CacheStore>,
        provider: Arc<dyn HistoryProvider>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let limiter = Arc::new(RateLimiter::new(config.fetch.min_interval()));
        let fetcher = FetchClient::from_config(provider, limiter, &config.fetch);
        let manager = Arc::new(SyncManager::new(
            store,
            fetcher,
            clock,
            config.earliest_backfill,
        ));
        let settings = ScheduleSettings::from_config(&config.scheduler)?;

        Ok(Self {
            service: MarketData::new(Arc::clone(&manager)),
            scheduler: Arc::new(SyncScheduler::new(manager, settings)),
            config,
        })
    }

    pub fn service(&self) -> &MarketData {
        &self.service
    }

    pub fn scheduler(&self) -> &Arc<SyncScheduler> {
        &self.scheduler
    }

    /// Tracks instruments listed in the config file that the store does not
    /// know yet. Failures are logged and skipped.
    pub async fn register_configured(&self, cancel: &CancellationToken) -> Result<usize> {
        let mut added = 0;
        for entry in &self.config.instruments {
            let code: InstrumentCode = entry.code.parse()?;
            if self.service.get_instrument(&code)?.is_some() {
                continue;
            }
            let new = NewInstrument {
                name: entry.name.clone(),
                category: entry.category.clone(),
                risk: entry.risk.clone(),
                inception: entry.inception,
                ..NewInstrument::new(code.clone())
            };
            match self.service.add_instrument(new, cancel).await {
                Ok(_) => added += 1,
                Err(RegistryError::AlreadyTracked(_)) => {}
                Err(e) => warn!("Could not register {} from config: {}", code, e),
            }
        }
        if added > 0 {
            info!("Registered {} instrument(s) from config", added);
        }
        Ok(added)
    }
}

pub async fn run_command(
    command: AppCommand,
    config_path: Option<&str>,
    cancel: CancellationToken,
) -> Result<()> {
    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    let app = App::from_config(config)?;
    app.register_configured(&cancel).await?;

    match command {
        AppCommand::Add {
            code,
            name,
            category,
            risk,
            inception,
        } => {
            let new = NewInstrument {
                name,
                category,
                risk,
                inception,
                ..NewInstrument::new(code.parse()?)
            };
            cli::instruments::add(&app, new, cancel).await
        }
        AppCommand::Remove { code } => cli::instruments::remove(&app, &code.parse()?),
        AppCommand::List => cli::instruments::list(&app),
        AppCommand::Sync { code, force } => match code {
            Some(code) => cli::sync::sync_one(&app, &code.parse()?, force, &cancel).await,
            None => cli::sync::sync_all(&app, force, &cancel).await,
        },
        AppCommand::Status { code } => {
            let code: Option<InstrumentCode> = code.map(|c| c.parse()).transpose()?;
            cli::sync::status(&app, code.as_ref())
        }
        AppCommand::Chart { code, period, rows } => {
            cli::chart::run(&app, &code.parse()?, period, rows)
        }
        AppCommand::Daemon => cli::sync::daemon(&app, cancel).await,
    }
}
