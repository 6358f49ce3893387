use super::{ProviderError, REQUEST_TIMEOUT_SECS, USER_AGENT};
use crate::models::{PriceBar, Timeframe};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

const TWELVEDATA_API_BASE: &str = "https://api.twelvedata.com";

/// Symbol qualifiers tried in order for US-listed tickers
const EXCHANGE_PREFIXES: &[&str] = &["NASDAQ", "NYSE", "AMEX"];

/// Client for the TwelveData time_series API (primary provider)
#[derive(Clone)]
pub struct TwelveDataClient {
    client: Client,
    api_key: String,
    base_url: String,
}

// ============== Response Types ==============

#[derive(Debug, Deserialize)]
struct TimeSeriesResponse {
    #[serde(default)]
    values: Option<Vec<RawBar>>,
}

/// TwelveData serializes every field as a string
#[derive(Debug, Deserialize)]
struct RawBar {
    #[serde(alias = "time")]
    datetime: String,
    open: Option<String>,
    high: Option<String>,
    low: Option<String>,
    close: Option<String>,
    #[serde(default)]
    volume: Option<String>,
}

impl RawBar {
    /// None when the timestamp is unparseable or any OHLC field is
    /// missing/non-numeric - such rows are dropped
    fn into_bar(self) -> Option<PriceBar> {
        let ts = parse_td_timestamp(&self.datetime)?;
        Some(PriceBar {
            ts,
            open: parse_field(self.open.as_deref())?,
            high: parse_field(self.high.as_deref())?,
            low: parse_field(self.low.as_deref())?,
            close: parse_field(self.close.as_deref())?,
            volume: parse_field(self.volume.as_deref()).unwrap_or(0.0),
        })
    }
}

fn parse_field(v: Option<&str>) -> Option<f64> {
    v.and_then(|s| s.parse::<f64>().ok()).filter(|x| x.is_finite())
}

/// Intraday bars come as "2024-01-02 15:30:00", daily bars as "2024-01-02"
fn parse_td_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

// ============== Implementation ==============

impl TwelveDataClient {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, TWELVEDATA_API_BASE.to_string())
    }

    /// Base URL override for tests against a local mock server
    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .expect("reqwest client");
        Self {
            client,
            api_key,
            base_url,
        }
    }

    /// Fetch an ascending bar series, trying the plain symbol first and
    /// then the exchange-prefixed variants. Any per-variant failure means
    /// "try the next variant"; exhaustion returns an empty series.
    pub async fn time_series(&self, symbol: &str, timeframe: Timeframe) -> Vec<PriceBar> {
        let mut candidates = vec![symbol.to_string()];
        candidates.extend(
            EXCHANGE_PREFIXES
                .iter()
                .map(|ex| format!("{}:{}", ex, symbol)),
        );

        for candidate in &candidates {
            match self.fetch_variant(candidate, timeframe).await {
                Ok(bars) if !bars.is_empty() => return bars,
                Ok(_) => {
                    tracing::debug!("TwelveData returned no data for {}", candidate);
                }
                Err(e) => {
                    tracing::debug!("TwelveData variant {} failed: {}", candidate, e);
                }
            }
        }

        Vec::new()
    }

    async fn fetch_variant(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Vec<PriceBar>, ProviderError> {
        let url = format!("{}/time_series", self.base_url);
        let outputsize = timeframe.output_size().to_string();

        let response = self
            .client
            .get(&url)
            .query(&[
                ("symbol", symbol),
                ("interval", timeframe.td_interval()),
                ("apikey", &self.api_key),
                ("format", "JSON"),
                ("outputsize", &outputsize),
                ("order", "ASC"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::Status(response.status()));
        }

        let payload: TimeSeriesResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Payload(e.to_string()))?;

        let mut bars: Vec<PriceBar> = payload
            .values
            .unwrap_or_default()
            .into_iter()
            .filter_map(RawBar::into_bar)
            .collect();

        // Requested ASC, but normalize anyway: strictly increasing, unique
        bars.sort_by_key(|b| b.ts);
        bars.dedup_by_key(|b| b.ts);

        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_intraday_timestamp() {
        let ts = parse_td_timestamp("2024-01-02 15:30:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-01-02T15:30:00+00:00");
    }

    #[test]
    fn test_parse_daily_timestamp() {
        let ts = parse_td_timestamp("2024-01-02").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-01-02T00:00:00+00:00");
    }

    #[test]
    fn test_row_with_missing_close_is_dropped() {
        let raw = RawBar {
            datetime: "2024-01-02".to_string(),
            open: Some("10".to_string()),
            high: Some("11".to_string()),
            low: Some("9".to_string()),
            close: None,
            volume: Some("100".to_string()),
        };
        assert!(raw.into_bar().is_none());
    }

    #[tokio::test]
    async fn test_symbol_variants_tried_in_order() {
        let mut server = mockito::Server::new_async().await;

        // Plain symbol: no data array; NASDAQ-prefixed variant succeeds
        let plain = server
            .mock("GET", "/time_series")
            .match_query(mockito::Matcher::UrlEncoded(
                "symbol".into(),
                "ACME".into(),
            ))
            .with_status(200)
            .with_body(r#"{"status":"error","message":"symbol not found"}"#)
            .create_async()
            .await;
        let prefixed = server
            .mock("GET", "/time_series")
            .match_query(mockito::Matcher::UrlEncoded(
                "symbol".into(),
                "NASDAQ:ACME".into(),
            ))
            .with_status(200)
            .with_body(
                r#"{"values":[
                    {"datetime":"2024-01-02","open":"10","high":"11","low":"9","close":"10.5","volume":"1000"},
                    {"datetime":"2024-01-03","open":"10.5","high":"12","low":"10","close":"11.5","volume":"1200"}
                ]}"#,
            )
            .create_async()
            .await;

        let client = TwelveDataClient::with_base_url("k".to_string(), server.url());
        let bars = client.time_series("ACME", Timeframe::D1).await;

        plain.assert_async().await;
        prefixed.assert_async().await;
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, 10.5);
        assert!(bars[0].ts < bars[1].ts);
    }

    #[tokio::test]
    async fn test_http_error_treated_as_no_data() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/time_series")
            .match_query(mockito::Matcher::Any)
            .with_status(500)
            .expect_at_least(4) // plain + three exchange prefixes
            .create_async()
            .await;

        let client = TwelveDataClient::with_base_url("k".to_string(), server.url());
        let bars = client.time_series("ACME", Timeframe::H1).await;
        assert!(bars.is_empty());
    }
}
