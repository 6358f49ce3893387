// Scan cycle: watchlist x timeframes, one atomic decision per pair
use crate::api::MarketData;
use crate::db::Store;
use crate::models::{SignalNotification, Timeframe};
use crate::notifier::Notify;
use crate::strategy::SignalEngine;
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Drives one scan cycle over watchlist x configured timeframes.
///
/// Each pair is an all-or-nothing unit: signal persistence and the
/// position transition commit together or not at all, and a failure in
/// one pair never aborts the rest of the cycle. Safe to invoke
/// concurrently (scheduled cycles plus a manual trigger) - the store's
/// one-OPEN-per-pair constraint arbitrates races.
pub struct ScanOrchestrator<M, N> {
    store: Arc<Store>,
    engine: SignalEngine<M>,
    notifier: N,
    timeframes: Vec<Timeframe>,
    cancel: Arc<AtomicBool>,
}

impl<M: MarketData, N: Notify> ScanOrchestrator<M, N> {
    pub fn new(
        store: Arc<Store>,
        engine: SignalEngine<M>,
        notifier: N,
        timeframes: Vec<Timeframe>,
    ) -> Self {
        Self {
            store,
            engine,
            notifier,
            timeframes,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cooperative shutdown flag, checked between pairs
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Run one cycle; returns the number of signals created
    pub async fn run(&self) -> Result<usize> {
        let watchlist = self.store.watchlist().await.context("watchlist read")?;
        let mut created = 0;

        'pairs: for entry in &watchlist {
            for &timeframe in &self.timeframes {
                if self.cancel.load(Ordering::Relaxed) {
                    tracing::info!("Scan cancelled after {} signals", created);
                    break 'pairs;
                }

                match self.scan_pair(&entry.symbol, timeframe).await {
                    Ok(n) => created += n,
                    Err(e) => {
                        // This pair contributes nothing this cycle; keep going
                        tracing::warn!(
                            "Scan failed for {} {}: {:#}",
                            entry.symbol,
                            timeframe,
                            e
                        );
                    }
                }
            }
        }

        tracing::info!("Scan cycle complete: {} signals created", created);
        Ok(created)
    }

    /// Exit-or-entry for one pair. An open position means only the exit
    /// rule is evaluated this cycle; entry is considered only when the
    /// pair has no open position.
    async fn scan_pair(&self, symbol: &str, timeframe: Timeframe) -> Result<usize> {
        if let Some(position) = self.store.open_position(symbol, timeframe).await? {
            let Some(signal) = self
                .engine
                .compute_exit(
                    symbol,
                    timeframe,
                    position.entry,
                    position.stop,
                    position.tp1,
                    position.tp2,
                )
                .await
            else {
                return Ok(0);
            };

            self.store.apply_exit(&signal, position.id).await?;
            tracing::info!("Closed {} {} ({})", symbol, timeframe, signal.reason);
            self.notifier
                .notify(&SignalNotification::from_signal(&signal, true))
                .await;
            return Ok(1);
        }

        let Some(signal) = self.engine.compute_entry(symbol, timeframe).await else {
            return Ok(0);
        };

        self.store.apply_entry(&signal).await?;
        tracing::info!(
            "Opened {} {} @ {:.2} (stop {:.2})",
            symbol,
            timeframe,
            signal.entry,
            signal.stop
        );
        self.notifier
            .notify(&SignalNotification::from_signal(&signal, false))
            .await;
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, PositionStatus, PriceBar, Signal};
    use crate::notifier::NullNotifier;
    use chrono::{Duration, Utc};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use uuid::Uuid;

    struct StubMarket {
        series: HashMap<String, Vec<PriceBar>>,
    }

    impl MarketData for StubMarket {
        async fn fetch(&self, symbol: &str, _timeframe: Timeframe) -> Vec<PriceBar> {
            self.series.get(symbol).cloned().unwrap_or_default()
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<SignalNotification>>,
    }

    impl Notify for &RecordingNotifier {
        async fn notify(&self, notification: &SignalNotification) {
            self.sent.lock().unwrap().push(notification.clone());
        }
    }

    fn bars_from_closes(closes: &[f64]) -> Vec<PriceBar> {
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

    /// 59 flat closes then a jump: confirmed EMA20/EMA50 upward cross
    fn crossover_series(last: f64) -> Vec<PriceBar> {
        let mut closes = vec![100.0; 59];
        closes.push(last);
        bars_from_closes(&closes)
    }

    fn buy_signal(symbol: &str, timeframe: Timeframe, entry: f64) -> Signal {
        Signal {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            timeframe,
            direction: Direction::Buy,
            entry,
            stop: entry * 0.95,
            tp1: entry * 1.05,
            tp2: entry * 1.10,
            confidence: "medium".to_string(),
            reason: "EMA20 crossed above EMA50".to_string(),
            risk_reward: 1.0,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_entry_cycle_creates_signal_and_position() {
        let store = Arc::new(Store::in_memory().await.unwrap());
        store.add_symbol("AAPL").await.unwrap();

        let mut series = HashMap::new();
        series.insert("AAPL".to_string(), crossover_series(190.0));
        let notifier = RecordingNotifier::default();
        let orchestrator = ScanOrchestrator::new(
            store.clone(),
            SignalEngine::new(StubMarket { series }),
            &notifier,
            vec![Timeframe::H1],
        );

        assert_eq!(orchestrator.run().await.unwrap(), 1);

        let open = store
            .open_position("AAPL", Timeframe::H1)
            .await
            .unwrap()
            .unwrap();
        assert!((open.entry - 190.0).abs() < 1e-9);

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(!sent[0].is_exit);
    }

    #[tokio::test]
    async fn test_open_position_suppresses_entry_evaluation() {
        let store = Arc::new(Store::in_memory().await.unwrap());
        store.add_symbol("AAPL").await.unwrap();
        // Open position whose exit rules do not fire at close=190
        store
            .apply_entry(&buy_signal("AAPL", Timeframe::H1, 190.0))
            .await
            .unwrap();

        // The series would trigger an entry if it were evaluated
        let mut series = HashMap::new();
        series.insert("AAPL".to_string(), crossover_series(190.0));
        let orchestrator = ScanOrchestrator::new(
            store.clone(),
            SignalEngine::new(StubMarket { series }),
            NullNotifier,
            vec![Timeframe::H1],
        );

        assert_eq!(orchestrator.run().await.unwrap(), 0);
        // Still exactly one signal (the seeded entry) and one open position
        assert_eq!(store.recent_signals(10, None, None).await.unwrap().len(), 1);
        assert_eq!(
            store.positions(PositionStatus::Open).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_exit_cycle_closes_position_and_tags_notification() {
        let store = Arc::new(Store::in_memory().await.unwrap());
        store.add_symbol("MSFT").await.unwrap();
        store
            .apply_entry(&buy_signal("MSFT", Timeframe::D1, 100.0))
            .await
            .unwrap();

        // Close at 94: below the 95 stop
        let mut closes = vec![100.0; 69];
        closes.push(94.0);
        let mut series = HashMap::new();
        series.insert("MSFT".to_string(), bars_from_closes(&closes));

        let notifier = RecordingNotifier::default();
        let orchestrator = ScanOrchestrator::new(
            store.clone(),
            SignalEngine::new(StubMarket { series }),
            &notifier,
            vec![Timeframe::D1],
        );

        assert_eq!(orchestrator.run().await.unwrap(), 1);
        assert!(store
            .open_position("MSFT", Timeframe::D1)
            .await
            .unwrap()
            .is_none());

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].is_exit);
        assert_eq!(sent[0].direction, Direction::Sell);
        // Original levels carried unchanged
        assert!((sent[0].entry - 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_empty_series_skips_pair_and_cycle_continues() {
        let store = Arc::new(Store::in_memory().await.unwrap());
        store.add_symbol("AAPL").await.unwrap();
        store.add_symbol("NVDA").await.unwrap();

        // AAPL has no data at all; NVDA triggers an entry
        let mut series = HashMap::new();
        series.insert("NVDA".to_string(), crossover_series(500.0));
        let orchestrator = ScanOrchestrator::new(
            store.clone(),
            SignalEngine::new(StubMarket { series }),
            NullNotifier,
            vec![Timeframe::H1],
        );

        assert_eq!(orchestrator.run().await.unwrap(), 1);
        assert!(store
            .open_position("NVDA", Timeframe::H1)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_cancel_flag_stops_between_pairs() {
        let store = Arc::new(Store::in_memory().await.unwrap());
        store.add_symbol("AAPL").await.unwrap();

        let mut series = HashMap::new();
        series.insert("AAPL".to_string(), crossover_series(190.0));
        let orchestrator = ScanOrchestrator::new(
            store.clone(),
            SignalEngine::new(StubMarket { series }),
            NullNotifier,
            vec![Timeframe::H1],
        );

        orchestrator.cancel_flag().store(true, Ordering::Relaxed);
        assert_eq!(orchestrator.run().await.unwrap(), 0);
        assert!(store.recent_signals(10, None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_cycles_keep_single_open_position() {
        let store = Arc::new(Store::in_memory().await.unwrap());
        store.add_symbol("AAPL").await.unwrap();

        let make = |store: Arc<Store>| {
            let mut series = HashMap::new();
            series.insert("AAPL".to_string(), crossover_series(190.0));
            ScanOrchestrator::new(
                store,
                SignalEngine::new(StubMarket { series }),
                NullNotifier,
                vec![Timeframe::H1],
            )
        };
        let a = make(store.clone());
        let b = make(store.clone());

        // A manual trigger racing a scheduled cycle: both complete without
        // error and the pair ends up with exactly one OPEN position.
        let (ra, rb) = tokio::join!(a.run(), b.run());
        assert!(ra.is_ok());
        assert!(rb.is_ok());
        assert_eq!(
            store.positions(PositionStatus::Open).await.unwrap().len(),
            1
        );
    }
}
