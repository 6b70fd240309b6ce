use super::util::{classify_status, classify_transport, parse_optional_number};
use crate::core::config::EastmoneyProviderConfig;
use crate::core::{
    DateRange, FetchError, HistoryPage, HistoryProvider, InstrumentCode, InstrumentInfo,
    PricePoint,
};
use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Url;
use reqwest::header::REFERER;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error};

const REFERER_URL: &str = "https://fundf10.eastmoney.com/";
const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HistoryResponse {
    data: Option<HistoryData>,
    err_code: i64,
    err_msg: Option<String>,
    total_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct HistoryData {
    #[serde(rename = "LSJZList", default)]
    valuations: Vec<RawValuation>,
}

#[derive(Debug, Deserialize)]
struct RawValuation {
    #[serde(rename = "FSRQ")]
    date: String,
    #[serde(rename = "DWJZ")]
    unit_value: Option<String>,
    #[serde(rename = "LJJZ")]
    cumulative_value: Option<String>,
    #[serde(rename = "JZZZL")]
    growth_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SearchResponse {
    err_code: i64,
    datas: Option<Vec<SearchHit>>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "CODE")]
    code: String,
    #[serde(rename = "NAME")]
    name: String,
    #[serde(rename = "FundBaseInfo")]
    base_info: Option<FundBaseInfo>,
}

#[derive(Debug, Deserialize)]
struct FundBaseInfo {
    #[serde(rename = "FTYPE")]
    fund_type: Option<String>,
    #[serde(rename = "ESTABDATE")]
    established: Option<String>,
}

/// Valuation history and fund search over the Eastmoney public JSON API.
pub struct EastmoneyProvider {
    client: reqwest::Client,
    base_url: String,
    search_url: String,
    page_size: u32,
}

impl EastmoneyProvider {
    pub fn new(config: &EastmoneyProviderConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("fundsync/0.3")
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            search_url: config.search_url.trim_end_matches('/').to_string(),
            page_size: config.page_size.max(1),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, what: &str) -> Result<T, FetchError> {
        debug!("Requesting {}", url);
        let response = self
            .client
            .get(url)
            .header(REFERER, REFERER_URL)
            .send()
            .await
            .map_err(|e| classify_transport(e, None))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, response.headers(), what));
        }

        let body = response
            .text()
            .await
            .map_err(|e| classify_transport(e, None))?;
        serde_json::from_str(&body).map_err(|e| {
            error!(error = ?e, response = %body, "Failed to parse provider response for {}", what);
            FetchError::Malformed(format!("{what}: {e}"))
        })
    }

    fn parse_valuation(raw: &RawValuation) -> Result<PricePoint, FetchError> {
        let date = NaiveDate::parse_from_str(raw.date.trim(), DATE_FORMAT)
            .map_err(|_| FetchError::Malformed(format!("invalid valuation date '{}'", raw.date)))?;
        let unit_value = parse_optional_number(raw.unit_value.as_deref(), "DWJZ")?
            .ok_or_else(|| FetchError::Malformed(format!("missing unit value on {date}")))?;

        Ok(PricePoint {
            date,
            unit_value,
            cumulative_value: parse_optional_number(raw.cumulative_value.as_deref(), "LJJZ")?,
            growth_rate: parse_optional_number(raw.growth_rate.as_deref(), "JZZZL")?,
        })
    }
}

#[async_trait]
impl HistoryProvider for EastmoneyProvider {
    async fn get_history(
        &self,
        code: &InstrumentCode,
        range: DateRange,
        page: u32,
    ) -> Result<HistoryPage, FetchError> {
        let page_index = page.max(1);
        let url = Url::parse_with_params(
            &format!("{}/f10/lsjz", self.base_url),
            &[
                ("fundCode", code.to_string()),
                ("pageIndex", page_index.to_string()),
                ("pageSize", self.page_size.to_string()),
                ("startDate", range.from.format(DATE_FORMAT).to_string()),
                ("endDate", range.to.format(DATE_FORMAT).to_string()),
            ],
        )
        .map_err(|e| FetchError::Unknown(format!("invalid history url: {e}")))?;

        let response: HistoryResponse = self.get_json(url, code.as_str()).await?;
        if response.err_code != 0 {
            debug!(
                code = response.err_code,
                message = ?response.err_msg,
                "Provider rejected history request for {}",
                code
            );
            return Err(FetchError::NotFound(code.to_string()));
        }

        let valuations = response.data.map(|d| d.valuations).unwrap_or_default();
        let points = valuations
            .iter()
            .map(Self::parse_valuation)
            .collect::<Result<Vec<_>, _>>()?;

        // Without a total, only a short page proves the listing has ended
        let has_more = !points.is_empty()
            && match response.total_count {
                Some(total) => u64::from(page_index) * u64::from(self.page_size) < total,
                None => points.len() >= self.page_size as usize,
            };
        debug!(
            "Fetched page {} for {}: {} points, more: {}",
            page_index,
            code,
            points.len(),
            has_more
        );
        Ok(HistoryPage { points, has_more })
    }

    async fn lookup(&self, code: &InstrumentCode) -> Result<InstrumentInfo, FetchError> {
        let url = Url::parse_with_params(
            &format!("{}/FundSearch/api/FundSearchAPI.ashx", self.search_url),
            &[("m", "1"), ("key", code.as_str())],
        )
        .map_err(|e| FetchError::Unknown(format!("invalid search url: {e}")))?;

        let response: SearchResponse = self.get_json(url, code.as_str()).await?;
        if response.err_code != 0 {
            return Err(FetchError::NotFound(code.to_string()));
        }

        let hit = response
            .datas
            .unwrap_or_default()
            .into_iter()
            .find(|hit| hit.code == code.as_str())
            .ok_or_else(|| FetchError::NotFound(code.to_string()))?;

        let (category, inception) = match hit.base_info {
            Some(info) => (
                info.fund_type.filter(|t| !t.trim().is_empty()),
                info.established
                    .and_then(|d| NaiveDate::parse_from_str(d.trim(), DATE_FORMAT).ok()),
            ),
            None => (None, None),
        };

        Ok(InstrumentInfo {
            name: hit.name,
            category,
            inception,
        })
    }
}
