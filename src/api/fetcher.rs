use super::rate_limit::RateLimiter;
use super::twelvedata::TwelveDataClient;
use super::yahoo::YahooChartClient;
use super::yahoo_download::YahooDownloadClient;
use crate::models::{PriceBar, Timeframe};
use std::sync::Arc;

/// Market-data seam for the signal engine and the orchestrator.
///
/// An empty series is the "no data, skip this pair this cycle" outcome;
/// implementations never surface provider errors.
pub trait MarketData: Send + Sync {
    fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> impl std::future::Future<Output = Vec<PriceBar>> + Send;
}

/// Ordered provider chain: TwelveData (keyed, rate-limited), Yahoo chart,
/// then - only when enabled - the Yahoo download CSV endpoint. Stops at the
/// first provider returning at least one bar.
pub struct MarketDataFetcher {
    twelvedata: Option<TwelveDataClient>,
    limiter: Arc<RateLimiter>,
    yahoo: YahooChartClient,
    download: Option<YahooDownloadClient>,
}

impl MarketDataFetcher {
    /// `twelvedata` is None when no API key is configured - the primary
    /// provider is then skipped entirely. `download` is None unless the
    /// tertiary fallback was explicitly enabled.
    pub fn new(
        twelvedata: Option<TwelveDataClient>,
        limiter: Arc<RateLimiter>,
        yahoo: YahooChartClient,
        download: Option<YahooDownloadClient>,
    ) -> Self {
        Self {
            twelvedata,
            limiter,
            yahoo,
            download,
        }
    }

    /// Lighter-weight last traded price for P&L display; not part of the
    /// scan path and not rate-limited (secondary provider only)
    pub async fn last_price(&self, symbol: &str) -> Option<f64> {
        let symbol = symbol.trim().to_uppercase();
        self.yahoo.last_price(&symbol).await
    }
}

impl MarketData for MarketDataFetcher {
    async fn fetch(&self, symbol: &str, timeframe: Timeframe) -> Vec<PriceBar> {
        let symbol = symbol.trim().to_uppercase();

        if let Some(td) = &self.twelvedata {
            if self.limiter.blocking_allow().await {
                let bars = td.time_series(&symbol, timeframe).await;
                if !bars.is_empty() {
                    return bars;
                }
                tracing::debug!("TwelveData exhausted for {} {}", symbol, timeframe);
            } else {
                tracing::warn!("TwelveData call budget exhausted, falling back for {}", symbol);
            }
        }

        let bars = self.yahoo.series(&symbol, timeframe).await;
        if !bars.is_empty() {
            return bars;
        }

        if let Some(download) = &self.download {
            let bars = download.series(&symbol, timeframe).await;
            if !bars.is_empty() {
                return bars;
            }
        }

        tracing::debug!("All providers empty for {} {}", symbol, timeframe);
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chart_body() -> &'static str {
        r#"{"chart":{"result":[{"timestamp":[1700000000],
            "indicators":{"quote":[{"open":[189.0],"high":[191.0],"low":[188.0],"close":[190.0],"volume":[1000.0]}]}}]}}"#
    }

    #[tokio::test]
    async fn test_no_key_skips_primary_and_never_touches_tertiary() {
        let mut yahoo_server = mockito::Server::new_async().await;
        yahoo_server
            .mock("GET", "/v8/finance/chart/AAPL")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(chart_body())
            .create_async()
            .await;

        let mut download_server = mockito::Server::new_async().await;
        let tertiary = download_server
            .mock("GET", mockito::Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let fetcher = MarketDataFetcher::new(
            None,
            Arc::new(RateLimiter::new(8, 800)),
            YahooChartClient::with_base_url(yahoo_server.url()),
            Some(YahooDownloadClient::with_base_url(download_server.url())),
        );

        let bars = fetcher.fetch("aapl", Timeframe::H1).await;
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, 190.0);
        tertiary.assert_async().await;
    }

    #[tokio::test]
    async fn test_primary_result_short_circuits_chain() {
        let mut td_server = mockito::Server::new_async().await;
        td_server
            .mock("GET", "/time_series")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(
                r#"{"values":[{"datetime":"2024-01-02","open":"10","high":"11","low":"9","close":"10.5","volume":"100"}]}"#,
            )
            .create_async()
            .await;

        let mut yahoo_server = mockito::Server::new_async().await;
        let secondary = yahoo_server
            .mock("GET", mockito::Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let fetcher = MarketDataFetcher::new(
            Some(TwelveDataClient::with_base_url(
                "k".to_string(),
                td_server.url(),
            )),
            Arc::new(RateLimiter::new(8, 800)),
            YahooChartClient::with_base_url(yahoo_server.url()),
            None,
        );

        let bars = fetcher.fetch("ACME", Timeframe::D1).await;
        assert_eq!(bars.len(), 1);
        secondary.assert_async().await;
    }

    #[tokio::test]
    async fn test_all_providers_empty_yields_empty_series() {
        let mut yahoo_server = mockito::Server::new_async().await;
        yahoo_server
            .mock("GET", mockito::Matcher::Any)
            .with_status(404)
            .create_async()
            .await;

        let fetcher = MarketDataFetcher::new(
            None,
            Arc::new(RateLimiter::new(8, 800)),
            YahooChartClient::with_base_url(yahoo_server.url()),
            None,
        );

        assert!(fetcher.fetch("ZZZZ", Timeframe::D1).await.is_empty());
    }
}
