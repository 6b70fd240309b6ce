use chrono::{NaiveDate, NaiveDateTime};
use fundsync::App;
use fundsync::core::config::{AppConfig, EastmoneyProviderConfig, InstrumentConfig};
use fundsync::core::{ChartPeriod, InstrumentCode, ManualClock, SyncStatus};
use fundsync::providers::EastmoneyProvider;
use fundsync::service::NewInstrument;
use fundsync::store::open_disk_store;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::info;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const HISTORY_JSON: &str = r#"{
    "Data": {
        "LSJZList": [
            {"FSRQ": "2024-01-05", "DWJZ": "1.0600", "LJJZ": "3.2200", "JZZZL": "0.95"},
            {"FSRQ": "2024-01-04", "DWJZ": "1.0500", "LJJZ": "3.2100", "JZZZL": "0.96"},
            {"FSRQ": "2024-01-03", "DWJZ": "1.0400", "LJJZ": "3.2000", "JZZZL": ""},
            {"FSRQ": "2024-01-02", "DWJZ": "1.0300", "LJJZ": "3.1900", "JZZZL": "--"}
        ]
    },
    "ErrCode": 0,
    "ErrMsg": null,
    "TotalCount": 4,
    "PageSize": 20,
    "PageIndex": 1
}"#;

const SEARCH_JSON: &str = r#"{
    "ErrCode": 0,
    "Datas": [
        {
            "CODE": "110011",
            "NAME": "E Fund Quality Select",
            "FundBaseInfo": {"FTYPE": "Hybrid", "ESTABDATE": "2024-01-02"}
        }
    ]
}"#;

mod test_utils {
    use super::*;

    pub async fn create_mock_server() -> MockServer {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/f10/lsjz"))
            .and(query_param("fundCode", "110011"))
            .respond_with(ResponseTemplate::new(200).set_body_string(HISTORY_JSON))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/f10/lsjz"))
            .and(query_param("fundCode", "000001"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/FundSearch/api/FundSearchAPI.ashx"))
            .and(query_param("key", "110011"))
            .respond_with(ResponseTemplate::new(200).set_body_string(SEARCH_JSON))
            .mount(&server)
            .await;

        server
    }

    pub fn config(server: &MockServer, data_dir: &TempDir) -> AppConfig {
        let mut config = AppConfig::default();
        config.providers.eastmoney = Some(EastmoneyProviderConfig {
            base_url: server.uri(),
            search_url: server.uri(),
            page_size: 20,
        });
        config.fetch.min_interval_ms = 0;
        config.fetch.max_retries = 0;
        config.fetch.timeout_secs = 5;
        config.data_path = Some(data_dir.path().to_string_lossy().into_owned());
        config
    }

    pub fn evening(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(20, 0, 0)
            .unwrap()
    }

    /// An app over a real disk cache and the mocked provider, frozen at
    /// 2024-01-05 20:00.
    pub fn app(config: AppConfig) -> App {
        let data_dir = config.data_dir().unwrap();
        let store = open_disk_store(&data_dir).unwrap();
        let provider =
            EastmoneyProvider::new(config.providers.eastmoney.as_ref().unwrap()).unwrap();
        let clock = ManualClock::new(evening(2024, 1, 5));
        App::with_components(config, Arc::new(store), Arc::new(provider), Arc::new(clock))
            .unwrap()
    }

    pub async fn history_requests(server: &MockServer) -> usize {
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == "/f10/lsjz")
            .count()
    }
}

fn code(s: &str) -> InstrumentCode {
    s.parse().unwrap()
}

#[test_log::test(tokio::test)]
async fn test_add_sync_chart_remove() {
    let server = test_utils::create_mock_server().await;
    let data_dir = TempDir::new().unwrap();
    let app = test_utils::app(test_utils::config(&server, &data_dir));
    let cancel = CancellationToken::new();
    let fund = code("110011");

    let instrument = app
        .service()
        .add_instrument(NewInstrument::new(fund.clone()), &cancel)
        .await
        .unwrap();
    assert_eq!(instrument.name, "E Fund Quality Select");
    assert_eq!(instrument.category.as_deref(), Some("Hybrid"));
    assert_eq!(instrument.inception, NaiveDate::from_ymd_opt(2024, 1, 2));
    let pending = app.service().get_sync_status(&fund).unwrap().unwrap();
    assert_eq!(pending.status, SyncStatus::Pending);

    let outcome = app.service().trigger_sync(&fund, false, &cancel).await.unwrap();
    info!(?outcome, "First sync");
    assert_eq!(outcome.inserted, 4);
    assert_eq!(outcome.from_date, NaiveDate::from_ymd_opt(2024, 1, 2));

    let meta = app.service().get_sync_status(&fund).unwrap().unwrap();
    assert_eq!(meta.status, SyncStatus::Synced);
    assert_eq!(meta.last_sync_date, NaiveDate::from_ymd_opt(2024, 1, 5));

    let chart = app
        .service()
        .get_chart_series(&fund, ChartPeriod::OneMonth)
        .unwrap();
    assert_eq!(chart.values, vec![1.03, 1.04, 1.05, 1.06]);
    assert_eq!(chart.dates.first(), NaiveDate::from_ymd_opt(2024, 1, 2).as_ref());
    assert_eq!(chart.indicators.ma5.len(), 4);
    assert!(chart.indicators.ma5.iter().all(Option::is_none));

    // Cache is current through today; a second sync must not call out
    let again = app.service().trigger_sync(&fund, false, &cancel).await.unwrap();
    assert_eq!(again.inserted, 0);
    assert_eq!(test_utils::history_requests(&server).await, 1);

    // A forced sync refetches everything and stores nothing new
    let forced = app.service().trigger_sync(&fund, true, &cancel).await.unwrap();
    assert_eq!(forced.fetched, 4);
    assert_eq!(forced.inserted, 0);
    assert_eq!(test_utils::history_requests(&server).await, 2);

    assert!(app.service().remove_instrument(&fund).unwrap());
    assert!(app.service().get_sync_status(&fund).unwrap().is_none());
    assert!(
        app.service()
            .get_chart_series(&fund, ChartPeriod::All)
            .unwrap()
            .is_empty()
    );
    assert!(!app.service().remove_instrument(&fund).unwrap());
}

#[test_log::test(tokio::test)]
async fn test_sync_all_reports_partial_failure() {
    let server = test_utils::create_mock_server().await;
    let data_dir = TempDir::new().unwrap();
    let app = test_utils::app(test_utils::config(&server, &data_dir));
    let cancel = CancellationToken::new();

    for (c, name) in [("110011", "Quality Select"), ("000001", "Broken Fund")] {
        let new = NewInstrument {
            name: Some(name.to_string()),
            inception: NaiveDate::from_ymd_opt(2024, 1, 2),
            ..NewInstrument::new(code(c))
        };
        app.service().add_instrument(new, &cancel).await.unwrap();
    }

    let mut seen = Vec::new();
    let report = app
        .service()
        .trigger_sync_all(false, &cancel, |o| seen.push(o.instrument.to_string()))
        .await
        .unwrap();

    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(seen.len(), 2);
    assert!(!report.cancelled);
    assert_eq!(report.updated(), 1);

    let failure = report.partial_failure().unwrap();
    assert_eq!(failure.total, 2);
    assert_eq!(failure.failed.len(), 1);
    assert_eq!(failure.failed[0].0, "000001");

    let broken = app.service().get_sync_status(&code("000001")).unwrap().unwrap();
    assert_eq!(broken.status, SyncStatus::Failed);
    assert!(broken.error.is_some());
    assert!(broken.last_sync_date.is_none());

    let healthy = app.service().get_sync_status(&code("110011")).unwrap().unwrap();
    assert_eq!(healthy.status, SyncStatus::Synced);
}

#[test_log::test(tokio::test)]
async fn test_register_configured_instruments() {
    let server = test_utils::create_mock_server().await;
    let data_dir = TempDir::new().unwrap();
    let mut config = test_utils::config(&server, &data_dir);
    config.instruments = vec![
        InstrumentConfig {
            code: "110011".to_string(),
            name: Some("Quality Select".to_string()),
            category: None,
            risk: Some("medium".to_string()),
            inception: None,
        },
        InstrumentConfig {
            code: "161725".to_string(),
            name: Some("Liquor Index".to_string()),
            category: Some("Index".to_string()),
            risk: None,
            inception: None,
        },
    ];
    let app = test_utils::app(config);
    let cancel = CancellationToken::new();

    assert_eq!(app.register_configured(&cancel).await.unwrap(), 2);
    assert_eq!(app.register_configured(&cancel).await.unwrap(), 0);

    let listed: Vec<String> = app
        .service()
        .list_instruments()
        .unwrap()
        .into_iter()
        .map(|i| i.code.to_string())
        .collect();
    assert_eq!(listed, vec!["110011", "161725"]);
    // Named entries never reach the provider
    let requests = server.received_requests().await.unwrap_or_default();
    assert!(requests.is_empty());
}

#[test_log::test(tokio::test)]
async fn test_run_command_with_config_file() {
    let server = test_utils::create_mock_server().await;
    let data_dir = TempDir::new().unwrap();
    let mut config = test_utils::config(&server, &data_dir);
    config.instruments = vec![InstrumentConfig {
        code: "110011".to_string(),
        name: Some("Quality Select".to_string()),
        category: None,
        risk: None,
        inception: None,
    }];
    let config_path = data_dir.path().join("config.yaml");
    std::fs::write(&config_path, serde_yaml::to_string(&config).unwrap()).unwrap();
    let config_path = config_path.to_string_lossy().into_owned();

    let cancel = CancellationToken::new();
    fundsync::run_command(fundsync::AppCommand::List, Some(&config_path), cancel.clone())
        .await
        .unwrap();

    let result = fundsync::run_command(
        fundsync::AppCommand::Remove {
            code: "999999".to_string(),
        },
        Some(&config_path),
        cancel,
    )
    .await;
    assert!(result.unwrap_err().to_string().contains("not tracked"));
}
