use crate::models::Timeframe;
use config::{Config, ConfigError, Environment};
use serde::Deserialize;

/// Runtime settings, sourced from the environment (a local .env file is
/// honored when present). Every field has a default so the scanner runs
/// out of the box against the free Yahoo endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// TwelveData is the primary provider; without a key the fetcher
    /// starts at the Yahoo chart fallback.
    #[serde(default)]
    pub twelvedata_api_key: Option<String>,
    #[serde(default = "default_td_per_minute")]
    pub td_rate_per_minute: u32,
    #[serde(default = "default_td_per_day")]
    pub td_rate_per_day: u32,

    /// Opt-in tertiary fallback against the Yahoo download endpoint
    #[serde(default)]
    pub enable_yahoo_download: bool,

    #[serde(default = "default_watchlist")]
    pub watchlist: String,
    #[serde(default = "default_timeframes")]
    pub timeframes: String,

    /// UTC hour of the daily scan cadence
    #[serde(default = "default_daily_scan_hour")]
    pub daily_scan_hour_utc: u32,

    #[serde(default)]
    pub telegram_bot_token: Option<String>,
    /// Comma-separated chat ids
    #[serde(default)]
    pub telegram_chat_ids: String,
}

fn default_database_url() -> String {
    "sqlite://signals.db".to_string()
}

fn default_td_per_minute() -> u32 {
    8
}

fn default_td_per_day() -> u32 {
    800
}

fn default_watchlist() -> String {
    "AAPL,MSFT,NVDA".to_string()
}

fn default_timeframes() -> String {
    "1h,1d".to_string()
}

fn default_daily_scan_hour() -> u32 {
    21
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Config::builder()
            .add_source(Environment::default().try_parsing(true))
            .build()?
            .try_deserialize()
    }

    /// Initial watchlist, used only to seed an empty database
    pub fn watchlist_symbols(&self) -> Vec<String> {
        split_csv(&self.watchlist)
            .map(|s| s.to_uppercase())
            .collect()
    }

    /// Unknown timeframe tokens are skipped
    pub fn scan_timeframes(&self) -> Vec<Timeframe> {
        let mut parsed: Vec<Timeframe> = split_csv(&self.timeframes)
            .filter_map(|s| Timeframe::parse(&s))
            .collect();
        parsed.dedup();
        if parsed.is_empty() {
            parsed = vec![Timeframe::H1, Timeframe::D1];
        }
        parsed
    }

    pub fn telegram_chats(&self) -> Vec<i64> {
        split_csv(&self.telegram_chat_ids)
            .filter_map(|s| s.parse().ok())
            .collect()
    }

    pub fn twelvedata_key(&self) -> Option<&str> {
        self.twelvedata_api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

fn split_csv(raw: &str) -> impl Iterator<Item = String> + '_ {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
