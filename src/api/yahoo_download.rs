use super::{ProviderError, REQUEST_TIMEOUT_SECS, USER_AGENT};
use crate::models::{PriceBar, Timeframe};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Client;
use std::time::Duration;

const DOWNLOAD_API_BASE: &str = "https://query1.finance.yahoo.com";

/// Tertiary provider: the Yahoo historical-download CSV endpoint.
///
/// Disabled unless explicitly turned on in configuration; its
/// (period, interval) pairs mirror the chart provider's fallback shape.
#[derive(Clone)]
pub struct YahooDownloadClient {
    client: Client,
    base_url: String,
}

/// (lookback days, interval) pairs per timeframe, preferred first
fn period_pairs(timeframe: Timeframe) -> [(i64, &'static str); 2] {
    match timeframe {
        Timeframe::H1 => [(7, "60m"), (365, "1d")],
        Timeframe::D1 => [(365, "1d"), (730, "1d")],
    }
}

impl YahooDownloadClient {
    pub fn new() -> Self {
        Self::with_base_url(DOWNLOAD_API_BASE.to_string())
    }

    /// Base URL override for tests against a local mock server
    pub fn with_base_url(base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .expect("reqwest client");
        Self { client, base_url }
    }

    /// Fetch bars, trying the preferred pair then the coarser fallback
    pub async fn series(&self, symbol: &str, timeframe: Timeframe) -> Vec<PriceBar> {
        for (days, interval) in period_pairs(timeframe) {
            match self.download(symbol, days, interval).await {
                Ok(bars) if !bars.is_empty() => return bars,
                Ok(_) => {
                    tracing::debug!("Yahoo download empty for {} {}d/{}", symbol, days, interval);
                }
                Err(e) => {
                    tracing::debug!(
                        "Yahoo download {}d/{} failed for {}: {}",
                        days,
                        interval,
                        symbol,
                        e
                    );
                }
            }
        }
        Vec::new()
    }

    async fn download(
        &self,
        symbol: &str,
        lookback_days: i64,
        interval: &str,
    ) -> Result<Vec<PriceBar>, ProviderError> {
        let now = Utc::now();
        let period1 = (now - ChronoDuration::days(lookback_days)).timestamp();
        let period2 = now.timestamp();

        let url = format!("{}/v7/finance/download/{}", self.base_url, symbol);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("period1", period1.to_string().as_str()),
                ("period2", period2.to_string().as_str()),
                ("interval", interval),
                ("events", "history"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::Status(response.status()));
        }

        let body = response.text().await?;
        Ok(parse_csv(&body))
    }
}

impl Default for YahooDownloadClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse the download CSV (Date,Open,High,Low,Close,Adj Close,Volume).
/// Rows with a "null" or unparseable OHLC field are dropped.
fn parse_csv(body: &str) -> Vec<PriceBar> {
    let mut bars = Vec::new();
    for line in body.lines().skip(1) {
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() < 6 {
            continue;
        }
        let Some(ts) = parse_date(fields[0]) else {
            continue;
        };
        let (Some(open), Some(high), Some(low), Some(close)) = (
            parse_num(fields[1]),
            parse_num(fields[2]),
            parse_num(fields[3]),
            parse_num(fields[4]),
        ) else {
            continue;
        };
        let volume = fields
            .last()
            .and_then(|v| parse_num(v))
            .unwrap_or(0.0);
        bars.push(PriceBar {
            ts,
            open,
            high,
            low,
            close,
            volume,
        });
    }
    bars.sort_by_key(|b| b.ts);
    bars.dedup_by_key(|b| b.ts);
    bars
}

fn parse_num(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|x| x.is_finite())
}

/// Daily rows carry a date, intraday rows a full timestamp
fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc());
    }
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_csv_drops_null_rows() {
        let body = "Date,Open,High,Low,Close,Adj Close,Volume\n\
                    2024-01-02,185.0,187.0,184.0,186.5,186.5,1000\n\
                    2024-01-03,null,null,null,null,null,null\n\
                    2024-01-04,186.0,189.0,185.5,188.0,188.0,1200\n";

        let bars = parse_csv(body);
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, 186.5);
        assert_eq!(bars[1].close, 188.0);
        assert!(bars[0].ts < bars[1].ts);
    }

    #[test]
    fn test_parse_csv_empty_body() {
        assert!(parse_csv("Date,Open,High,Low,Close,Adj Close,Volume\n").is_empty());
        assert!(parse_csv("").is_empty());
    }

    #[tokio::test]
    async fn test_download_fallback_pair() {
        let mut server = mockito::Server::new_async().await;
        // First pair (60m) empty, second pair (1d) has data
        server
            .mock("GET", "/v7/finance/download/AAPL")
            .match_query(mockito::Matcher::UrlEncoded(
                "interval".into(),
                "60m".into(),
            ))
            .with_status(200)
            .with_body("Date,Open,High,Low,Close,Adj Close,Volume\n")
            .create_async()
            .await;
        server
            .mock("GET", "/v7/finance/download/AAPL")
            .match_query(mockito::Matcher::UrlEncoded(
                "interval".into(),
                "1d".into(),
            ))
            .with_status(200)
            .with_body(
                "Date,Open,High,Low,Close,Adj Close,Volume\n2024-01-02,185.0,187.0,184.0,186.5,186.5,1000\n",
            )
            .create_async()
            .await;

        let client = YahooDownloadClient::with_base_url(server.url());
        let bars = client.series("AAPL", Timeframe::H1).await;
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, 186.5);
    }
}
