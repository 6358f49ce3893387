// Signal evaluation module
pub mod signals;

pub use signals::{entry_decision, exit_decision, EntryLevels, ExitRule, MIN_BARS_FOR_ENTRY};

use crate::api::MarketData;
use crate::models::{Direction, Signal, Timeframe};
use chrono::Utc;
use uuid::Uuid;

const CONFIDENCE_MEDIUM: &str = "medium";

/// Applies the entry/exit rules to fetched market data.
///
/// Both operations are pure with respect to persisted state: they read
/// bars and return a decision, never touching signal or position storage.
pub struct SignalEngine<M> {
    market: M,
}

impl<M: MarketData> SignalEngine<M> {
    pub fn new(market: M) -> Self {
        Self { market }
    }

    pub fn market(&self) -> &M {
        &self.market
    }

    /// BUY signal when EMA20 crossed above EMA50 on the latest completed
    /// bar. Insufficient history or an empty fetch means no signal.
    pub async fn compute_entry(&self, symbol: &str, timeframe: Timeframe) -> Option<Signal> {
        let bars = self.market.fetch(symbol, timeframe).await;
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let levels = entry_decision(&closes)?;

        Some(Signal {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            timeframe,
            direction: Direction::Buy,
            entry: levels.entry,
            stop: levels.stop,
            tp1: levels.tp1,
            tp2: levels.tp2,
            confidence: CONFIDENCE_MEDIUM.to_string(),
            reason: signals::ENTRY_REASON.to_string(),
            risk_reward: levels.risk_reward,
            created_at: Utc::now(),
        })
    }

    /// SELL signal when any exit rule fires for the open position. The
    /// signal carries the position's original levels unchanged, rr = 0.
    #[allow(clippy::too_many_arguments)]
    pub async fn compute_exit(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        entry: f64,
        stop: f64,
        tp1: f64,
        tp2: f64,
    ) -> Option<Signal> {
        let bars = self.market.fetch(symbol, timeframe).await;
        if bars.is_empty() {
            return None;
        }
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let rule = exit_decision(&closes, stop, tp2)?;

        Some(Signal {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            timeframe,
            direction: Direction::Sell,
            entry,
            stop,
            tp1,
            tp2,
            confidence: CONFIDENCE_MEDIUM.to_string(),
            reason: rule.reason().to_string(),
            risk_reward: 0.0,
            created_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PriceBar;
    use chrono::{Duration, Utc};
    use std::collections::HashMap;

    /// Canned market data keyed by symbol
    pub(crate) struct StubMarket {
        pub series: HashMap<String, Vec<PriceBar>>,
    }

    impl MarketData for StubMarket {
        async fn fetch(&self, symbol: &str, _timeframe: Timeframe) -> Vec<PriceBar> {
            self.series.get(symbol).cloned().unwrap_or_default()
        }
    }

    pub(crate) fn bars_from_closes(closes: &[f64]) -> Vec<PriceBar> {
        let start = Utc::now() - Duration::hours(closes.len() as i64);
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| PriceBar {
                ts: start + Duration::hours(i as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume: 1000.0,
            })
            .collect()
    }

    fn engine_with(symbol: &str, closes: &[f64]) -> SignalEngine<StubMarket> {
        let mut series = HashMap::new();
        series.insert(symbol.to_string(), bars_from_closes(closes));
        SignalEngine::new(StubMarket { series })
    }

    #[tokio::test]
    async fn test_compute_entry_emits_buy() {
        let mut closes = vec![100.0; 59];
        closes.push(190.0);
        let engine = engine_with("AAPL", &closes);

        let signal = engine.compute_entry("AAPL", Timeframe::H1).await.unwrap();
        assert_eq!(signal.direction, Direction::Buy);
        assert_eq!(signal.symbol, "AAPL");
        assert!((signal.entry - 190.0).abs() < 1e-9);
        assert!((signal.stop - 180.5).abs() < 1e-9);
        assert!((signal.risk_reward - 1.0).abs() < 1e-9);
        assert_eq!(signal.confidence, "medium");
    }

    #[tokio::test]
    async fn test_compute_entry_empty_fetch_is_no_signal() {
        let engine = SignalEngine::new(StubMarket {
            series: HashMap::new(),
        });
        assert!(engine.compute_entry("AAPL", Timeframe::H1).await.is_none());
    }

    #[tokio::test]
    async fn test_compute_exit_carries_original_levels() {
        let mut closes = vec![100.0; 69];
        closes.push(95.0); // trend break
        let engine = engine_with("MSFT", &closes);

        let signal = engine
            .compute_exit("MSFT", Timeframe::D1, 100.0, 90.0, 105.0, 200.0)
            .await
            .unwrap();
        assert_eq!(signal.direction, Direction::Sell);
        assert_eq!(signal.entry, 100.0);
        assert_eq!(signal.stop, 90.0);
        assert_eq!(signal.tp1, 105.0);
        assert_eq!(signal.tp2, 200.0);
        assert_eq!(signal.risk_reward, 0.0);
        assert_eq!(signal.reason, "close fell below EMA50");
    }

    #[tokio::test]
    async fn test_compute_exit_empty_fetch_is_no_signal() {
        let engine = SignalEngine::new(StubMarket {
            series: HashMap::new(),
        });
        assert!(engine
            .compute_exit("MSFT", Timeframe::D1, 100.0, 90.0, 105.0, 110.0)
            .await
            .is_none());
    }
}
