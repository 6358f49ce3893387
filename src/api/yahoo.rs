use super::{ProviderError, REQUEST_TIMEOUT_SECS, USER_AGENT};
use crate::models::{PriceBar, Timeframe};
use chrono::DateTime;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

const YAHOO_API_BASE: &str = "https://query2.finance.yahoo.com";

/// (range, interval) pairs scanned finest-to-coarsest for a last price
const LAST_PRICE_TRIES: &[(&str, &str)] = &[("1d", "1m"), ("5d", "1h"), ("1y", "1d")];

/// Client for the Yahoo Finance chart API (secondary provider, no key)
#[derive(Clone)]
pub struct YahooChartClient {
    client: Client,
    base_url: String,
}

// ============== Response Types ==============

#[derive(Debug, Deserialize)]
struct ChartResponse {
    #[serde(default)]
    chart: Option<ChartNode>,
}

#[derive(Debug, Deserialize)]
struct ChartNode {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Option<Vec<i64>>,
    #[serde(default)]
    indicators: Option<Indicators>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Option<Vec<QuoteArrays>>,
}

/// Parallel arrays; individual entries may be null
#[derive(Debug, Default, Deserialize)]
struct QuoteArrays {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

// ============== Implementation ==============

impl YahooChartClient {
    pub fn new() -> Self {
        Self::with_base_url(YAHOO_API_BASE.to_string())
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

    /// Fetch bars for a timeframe: preferred (range, interval) pair first,
    /// then one coarser fallback pair. Empty when both come back empty.
    pub async fn series(&self, symbol: &str, timeframe: Timeframe) -> Vec<PriceBar> {
        for (range, interval) in timeframe.yahoo_ranges() {
            match self.chart(symbol, range, interval).await {
                Ok(bars) if !bars.is_empty() => return bars,
                Ok(_) => {
                    tracing::debug!("Yahoo chart empty for {} {}/{}", symbol, range, interval);
                }
                Err(e) => {
                    tracing::debug!(
                        "Yahoo chart {}/{} failed for {}: {}",
                        range,
                        interval,
                        symbol,
                        e
                    );
                }
            }
        }
        Vec::new()
    }

    /// One chart request; rows with any null OHLC field are dropped
    pub async fn chart(
        &self,
        symbol: &str,
        range: &str,
        interval: &str,
    ) -> Result<Vec<PriceBar>, ProviderError> {
        let (timestamps, quote) = self.fetch_quote(symbol, range, interval).await?;

        let mut bars = Vec::with_capacity(timestamps.len());
        for (i, &ts) in timestamps.iter().enumerate() {
            let (open, high, low, close) = match (
                value_at(&quote.open, i),
                value_at(&quote.high, i),
                value_at(&quote.low, i),
                value_at(&quote.close, i),
            ) {
                (Some(o), Some(h), Some(l), Some(c)) => (o, h, l, c),
                _ => continue,
            };
            let Some(ts) = DateTime::from_timestamp(ts, 0) else {
                continue;
            };
            bars.push(PriceBar {
                ts,
                open,
                high,
                low,
                close,
                volume: value_at(&quote.volume, i).unwrap_or(0.0),
            });
        }

        bars.sort_by_key(|b| b.ts);
        bars.dedup_by_key(|b| b.ts);
        Ok(bars)
    }

    /// Most recent non-null close across the try list, scanning each close
    /// array from the end. None when every pair is exhausted.
    pub async fn last_price(&self, symbol: &str) -> Option<f64> {
        for (range, interval) in LAST_PRICE_TRIES {
            let (_, quote) = match self.fetch_quote(symbol, range, interval).await {
                Ok(data) => data,
                Err(e) => {
                    tracing::debug!("Yahoo last_price {}/{} failed: {}", range, interval, e);
                    continue;
                }
            };
            if let Some(price) = quote
                .close
                .iter()
                .rev()
                .find_map(|v| v.filter(|x| x.is_finite()))
            {
                return Some(price);
            }
        }
        None
    }

    async fn fetch_quote(
        &self,
        symbol: &str,
        range: &str,
        interval: &str,
    ) -> Result<(Vec<i64>, QuoteArrays), ProviderError> {
        let url = format!("{}/v8/finance/chart/{}", self.base_url, symbol);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("range", range),
                ("interval", interval),
                ("includePrePost", "false"),
                ("events", "div,splits"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::Status(response.status()));
        }

        let payload: ChartResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Payload(e.to_string()))?;

        let result = payload
            .chart
            .and_then(|c| c.result)
            .and_then(|mut r| if r.is_empty() { None } else { Some(r.remove(0)) })
            .ok_or_else(|| ProviderError::Payload("no chart result".to_string()))?;

        let timestamps = result.timestamp.unwrap_or_default();
        let quote = result
            .indicators
            .and_then(|i| i.quote)
            .and_then(|mut q| if q.is_empty() { None } else { Some(q.remove(0)) })
            .unwrap_or_default();

        Ok((timestamps, quote))
    }
}

impl Default for YahooChartClient {
    fn default() -> Self {
        Self::new()
    }
}

fn value_at(values: &[Option<f64>], i: usize) -> Option<f64> {
    values.get(i).copied().flatten().filter(|x| x.is_finite())
}
