use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One OHLCV bar, normalized across providers.
///
/// Within a fetched series timestamps are strictly increasing and unique.
/// Bars are built fresh per fetch and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceBar {
    pub ts: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Sampling granularity for price bars.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Timeframe {
    H1,
    D1,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::H1 => "1h",
            Timeframe::D1 => "1d",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "1h" => Some(Timeframe::H1),
            "1d" => Some(Timeframe::D1),
            _ => None,
        }
    }

    /// Interval string understood by the TwelveData time_series endpoint
    pub fn td_interval(&self) -> &'static str {
        match self {
            Timeframe::H1 => "1h",
            Timeframe::D1 => "1day",
        }
    }

    /// History length requested from the primary provider
    pub fn output_size(&self) -> usize {
        match self {
            Timeframe::H1 => 300,
            Timeframe::D1 => 500,
        }
    }

    /// Yahoo chart (range, interval) pairs, preferred first then one
    /// coarser fallback
    pub fn yahoo_ranges(&self) -> [(&'static str, &'static str); 2] {
        match self {
            Timeframe::H1 => [("7d", "60m"), ("1y", "1d")],
            Timeframe::D1 => [("1y", "1d"), ("2y", "1d")],
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signal direction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Buy => "BUY",
            Direction::Sell => "SELL",
        }
    }
}

/// An entry or exit recommendation. Append-only once persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub direction: Direction,
    pub entry: f64,
    pub stop: f64,
    pub tp1: f64,
    pub tp2: f64,
    pub confidence: String,
    pub reason: String,
    pub risk_reward: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PositionStatus {
    Open,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "OPEN",
            PositionStatus::Closed => "CLOSED",
        }
    }
}

/// Tracked position. Never deleted, only closed - rows are the audit trail.
///
/// At most one row per (symbol, timeframe) has status OPEN at any time;
/// the store enforces this with a partial unique index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub entry: f64,
    pub stop: f64,
    pub tp1: f64,
    pub tp2: f64,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Symbol eligible for scanning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchlistEntry {
    pub symbol: String,
}

/// Fixed payload handed to the notifier, mirroring the Signal shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalNotification {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub direction: Direction,
    pub entry: f64,
    pub stop: f64,
    pub tp1: f64,
    pub tp2: f64,
    pub risk_reward: f64,
    pub confidence: String,
    pub reason: String,
    pub is_exit: bool,
}

impl SignalNotification {
    pub fn from_signal(signal: &Signal, is_exit: bool) -> Self {
        Self {
            symbol: signal.symbol.clone(),
            timeframe: signal.timeframe,
            direction: signal.direction,
            entry: signal.entry,
            stop: signal.stop,
            tp1: signal.tp1,
            tp2: signal.tp2,
            risk_reward: signal.risk_reward,
            confidence: signal.confidence.clone(),
            reason: signal.reason.clone(),
            is_exit,
        }
    }
}
