use anyhow::{Context, Result, anyhow};
use chrono::{NaiveDate, NaiveTime};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fs, path::PathBuf};
use tracing::debug;

/// An instrument listed in the config file; registered on startup if the
/// store does not know it yet.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct InstrumentConfig {
    pub code: String,
    pub name: Option<String>,
    pub category: Option<String>,
    pub risk: Option<String>,
    pub inception: Option<NaiveDate>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EastmoneyProviderConfig {
    pub base_url: String,
    pub search_url: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page_size() -> u32 {
    20
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProvidersConfig {
    pub eastmoney: Option<EastmoneyProviderConfig>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        ProvidersConfig {
            eastmoney: Some(EastmoneyProviderConfig {
                base_url: "https://api.fund.eastmoney.com".to_string(),
                search_url: "https://fundsuggest.eastmoney.com".to_string(),
                page_size: default_page_size(),
            }),
        }
    }
}

/// Provider call budget: spacing, timeout and retry policy.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct FetchConfig {
    pub min_interval_ms: u64,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 1500,
            timeout_secs: 10,
            max_retries: 3,
            backoff_base_ms: 2000,
            backoff_cap_ms: 30_000,
        }
    }
}

impl FetchConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Daily wall-clock checkpoints, `HH:MM` local time.
    pub checkpoints: Vec<String>,
    pub poll_interval_secs: u64,
    pub business_days_only: bool,
    pub startup_sync: bool,
    /// `[from, to]` local times within which a startup sync runs.
    pub startup_window: [String; 2],
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            checkpoints: vec!["14:50".to_string(), "15:30".to_string()],
            poll_interval_secs: 30,
            business_days_only: true,
            startup_sync: true,
            startup_window: ["09:00".to_string(), "20:00".to_string()],
        }
    }
}

impl SchedulerConfig {
    pub fn checkpoint_times(&self) -> Result<Vec<NaiveTime>> {
        let mut times = self
            .checkpoints
            .iter()
            .map(|s| parse_clock_time(s))
            .collect::<Result<Vec<_>>>()?;
        times.sort();
        times.dedup();
        Ok(times)
    }

    pub fn startup_window_times(&self) -> Result<(NaiveTime, NaiveTime)> {
        let from = parse_clock_time(&self.startup_window[0])?;
        let to = parse_clock_time(&self.startup_window[1])?;
        if from > to {
            return Err(anyhow!(
                "Startup window starts after it ends: {} > {}",
                self.startup_window[0],
                self.startup_window[1]
            ));
        }
        Ok((from, to))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

fn parse_clock_time(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .with_context(|| format!("Invalid time '{s}', expected HH:MM"))
}

fn default_earliest_backfill() -> NaiveDate {
    // Oldest open-ended funds on the mainland market date from 1998.
    NaiveDate::from_ymd_opt(1998, 1, 1).unwrap_or(NaiveDate::MIN)
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub instruments: Vec<InstrumentConfig>,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    pub data_path: Option<String>,
    /// Backfill start for instruments with an unknown inception date.
    #[serde(default = "default_earliest_backfill")]
    pub earliest_backfill: NaiveDate,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            instruments: Vec::new(),
            providers: ProvidersConfig::default(),
            fetch: FetchConfig::default(),
            scheduler: SchedulerConfig::default(),
            data_path: None,
            earliest_backfill: default_earliest_backfill(),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        if !config_path.exists() {
            debug!(
                "No config at {}, using built-in defaults",
                config_path.display()
            );
            return Ok(Self::default());
        }
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("org", "fundsync", "fundsync")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.data_path {
            return Ok(PathBuf::from(custom_path));
        }
        let proj_dirs = ProjectDirs::from("org", "fundsync", "fundsync")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        config.validate()?;
        debug!("Successfully loaded config");
        Ok(config)
    }

    /// Catches malformed times and codes at load rather than at first use.
    pub fn validate(&self) -> Result<()> {
        self.scheduler.checkpoint_times()?;
        self.scheduler.startup_window_times()?;
        for instrument in &self.instruments {
            instrument
                .code
                .parse::<crate::core::InstrumentCode>()
                .with_context(|| format!("Invalid instrument in config: {}", instrument.code))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserialization() {
        let yaml_str = r#"
instruments:
  - code: "110011"
    name: "E Fund Quality Select"
    category: "Hybrid"
    risk: "medium"
    inception: 2008-06-19
  - code: "161725"
fetch:
  min_interval_ms: 2000
  max_retries: 5
scheduler:
  checkpoints: ["15:30", "14:50"]
  business_days_only: false
data_path: "/tmp/fundsync"
"#;

        let config: AppConfig = serde_yaml::from_str(yaml_str).expect("Failed to deserialize");
        config.validate().unwrap();
        assert_eq!(config.instruments.len(), 2);
        assert_eq!(config.instruments[0].code, "110011");
        assert_eq!(
            config.instruments[0].inception,
            NaiveDate::from_ymd_opt(2008, 6, 19)
        );
        assert!(config.instruments[1].name.is_none());

        // Partially specified sections fall back to defaults field by field
        assert_eq!(config.fetch.min_interval(), Duration::from_millis(2000));
        assert_eq!(config.fetch.max_retries, 5);
        assert_eq!(config.fetch.timeout(), Duration::from_secs(10));
        assert_eq!(config.fetch.backoff_cap(), Duration::from_secs(30));

        let checkpoints = config.scheduler.checkpoint_times().unwrap();
        assert_eq!(
            checkpoints,
            vec![
                NaiveTime::from_hms_opt(14, 50, 0).unwrap(),
                NaiveTime::from_hms_opt(15, 30, 0).unwrap()
            ]
        );
        assert!(!config.scheduler.business_days_only);
        assert_eq!(config.scheduler.poll_interval(), Duration::from_secs(30));

        assert!(config.providers.eastmoney.is_some());
        assert_eq!(config.data_dir().unwrap(), PathBuf::from("/tmp/fundsync"));
        assert_eq!(
            config.earliest_backfill,
            NaiveDate::from_ymd_opt(1998, 1, 1).unwrap()
        );
    }

    #[test]
    fn test_config_with_providers() {
        let yaml_str = r#"
providers:
  eastmoney:
    base_url: "http://example.com/api"
    search_url: "http://example.com/search"
earliest_backfill: 2001-09-21
"#;
        let config: AppConfig = serde_yaml::from_str(yaml_str).unwrap();
        let eastmoney = config.providers.eastmoney.unwrap();
        assert_eq!(eastmoney.base_url, "http://example.com/api");
        assert_eq!(eastmoney.page_size, 20);
        assert_eq!(
            config.earliest_backfill,
            NaiveDate::from_ymd_opt(2001, 9, 21).unwrap()
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        let bad_time: AppConfig = serde_yaml::from_str("scheduler:\n  checkpoints: [\"25:00\"]\n").unwrap();
        assert!(bad_time.validate().is_err());

        let bad_code: AppConfig = serde_yaml::from_str("instruments:\n  - code: \"12ab\"\n").unwrap();
        assert!(bad_code.validate().is_err());

        let bad_window: AppConfig =
            serde_yaml::from_str("scheduler:\n  startup_window: [\"20:00\", \"09:00\"]\n").unwrap();
        assert!(bad_window.validate().is_err());
    }
}
