pub mod fetcher;
pub mod rate_limit;
pub mod twelvedata;
pub mod yahoo;
pub mod yahoo_download;

pub use fetcher::{MarketData, MarketDataFetcher};
pub use rate_limit::{Clock, RateLimiter, SystemClock};
pub use twelvedata::TwelveDataClient;
pub use yahoo::YahooChartClient;
pub use yahoo_download::YahooDownloadClient;

/// Per-request failure at a provider boundary.
///
/// These never leave the fetch chain - each one means "try the next
/// variant/provider", and exhaustion yields an empty series.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(reqwest::StatusCode),
    #[error("malformed payload: {0}")]
    Payload(String),
}

/// Request timeout applied to every provider call so a hung endpoint
/// cannot stall a scan cycle
pub const REQUEST_TIMEOUT_SECS: u64 = 20;

pub(crate) const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
