use signalbot::api::{
    MarketDataFetcher, RateLimiter, TwelveDataClient, YahooChartClient, YahooDownloadClient,
};
use signalbot::config::Settings;
use signalbot::db::Store;
use signalbot::models::{PositionStatus, SignalNotification, Timeframe};
use signalbot::notifier::{Notify, NullNotifier, TelegramNotifier};
use signalbot::scan::ScanOrchestrator;
use signalbot::strategy::SignalEngine;
use signalbot::Result;
use chrono::{Timelike, Utc};
use clap::{Parser, Subcommand};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};

const HOURLY_PERIOD_SECS: u64 = 3600;
const DAILY_PERIOD_SECS: u64 = 86_400;

// ============================================================================
// CLI
// ============================================================================

#[derive(Parser)]
#[command(name = "signalbot", about = "EMA crossover signal scanner")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduled scanner (hourly + daily cadences)
    Run,
    /// Run a single scan cycle and exit
    Scan,
    /// Manage the scanned symbol list
    Watchlist {
        #[command(subcommand)]
        action: WatchlistAction,
    },
    /// Show recent signals
    Signals {
        #[arg(long)]
        symbol: Option<String>,
        #[arg(long)]
        timeframe: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Show tracked positions
    Positions {
        #[arg(long, default_value = "open")]
        status: String,
    },
    /// Open positions with live P&L
    Portfolio,
    /// Last traded price for one symbol
    Price { symbol: String },
}

#[derive(Subcommand)]
enum WatchlistAction {
    List,
    Add { symbol: String },
    Remove { symbol: String },
}

// ============================================================================
// Notifier selection
// ============================================================================

enum ChannelNotifier {
    Telegram(TelegramNotifier),
    Null(NullNotifier),
}

impl Notify for ChannelNotifier {
    async fn notify(&self, notification: &SignalNotification) {
        match self {
            ChannelNotifier::Telegram(t) => t.notify(notification).await,
            ChannelNotifier::Null(n) => n.notify(notification).await,
        }
    }
}

fn build_notifier(settings: &Settings) -> ChannelNotifier {
    let chats = settings.telegram_chats();
    match (&settings.telegram_bot_token, chats.is_empty()) {
        (Some(token), false) if !token.trim().is_empty() => {
            tracing::info!("Telegram notifier enabled ({} chats)", chats.len());
            ChannelNotifier::Telegram(TelegramNotifier::new(token.clone(), chats))
        }
        _ => {
            tracing::info!("No Telegram credentials, notifications disabled");
            ChannelNotifier::Null(NullNotifier)
        }
    }
}

// ============================================================================
// Wiring
// ============================================================================

fn build_fetcher(settings: &Settings) -> MarketDataFetcher {
    let twelvedata = settings
        .twelvedata_key()
        .map(|key| TwelveDataClient::new(key.to_string()));
    if twelvedata.is_none() {
        tracing::info!("No TwelveData key, starting at the Yahoo chart provider");
    }

    let limiter = Arc::new(RateLimiter::new(
        settings.td_rate_per_minute,
        settings.td_rate_per_day,
    ));
    let download = settings
        .enable_yahoo_download
        .then(YahooDownloadClient::new);

    MarketDataFetcher::new(twelvedata, limiter, YahooChartClient::new(), download)
}

async fn open_store(settings: &Settings) -> Result<Arc<Store>> {
    let store = Store::connect(&settings.database_url).await?;
    let seeded = store
        .seed_watchlist_if_empty(&settings.watchlist_symbols())
        .await?;
    if seeded > 0 {
        tracing::info!("Seeded watchlist with {} default symbols", seeded);
    }
    Ok(Arc::new(store))
}

fn build_orchestrator(
    settings: &Settings,
    store: Arc<Store>,
) -> ScanOrchestrator<MarketDataFetcher, ChannelNotifier> {
    ScanOrchestrator::new(
        store,
        SignalEngine::new(build_fetcher(settings)),
        build_notifier(settings),
        settings.scan_timeframes(),
    )
}

// ============================================================================
// Scheduling
// ============================================================================

/// Seconds until the next top of the hour (XX:00:00 UTC)
fn next_hour_boundary() -> Instant {
    let now = Utc::now();
    let secs_into_hour = (now.minute() * 60 + now.second()) as u64;
    let wait = if secs_into_hour == 0 {
        0
    } else {
        HOURLY_PERIOD_SECS - secs_into_hour
    };
    Instant::now() + Duration::from_secs(wait)
}

/// Next occurrence of HH:00:00 UTC for the configured daily hour
fn next_daily_tick(hour_utc: u32) -> Instant {
    let now = Utc::now();
    let secs_today = now.num_seconds_from_midnight() as u64;
    let target = u64::from(hour_utc.min(23)) * 3600;
    let wait = if secs_today < target {
        target - secs_today
    } else {
        DAILY_PERIOD_SECS - secs_today + target
    };
    Instant::now() + Duration::from_secs(wait)
}

async fn scan_loop(
    orchestrator: Arc<ScanOrchestrator<MarketDataFetcher, ChannelNotifier>>,
    start: Instant,
    period_secs: u64,
    label: &'static str,
) {
    let mut ticker = interval_at(start, Duration::from_secs(period_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        tracing::info!("⏰ {} scan starting", label);
        if let Err(e) = orchestrator.run().await {
            tracing::error!("{} scan failed: {:#}", label, e);
        }
    }
}

async fn run_scheduler(settings: &Settings, store: Arc<Store>) -> Result<()> {
    let orchestrator = Arc::new(build_orchestrator(settings, store));
    let cancel = orchestrator.cancel_flag();

    tracing::info!(
        "🚀 SignalBot starting: hourly at XX:00, daily at {:02}:00 UTC",
        settings.daily_scan_hour_utc.min(23)
    );

    let hourly = tokio::spawn(scan_loop(
        orchestrator.clone(),
        next_hour_boundary(),
        HOURLY_PERIOD_SECS,
        "hourly",
    ));
    let daily = tokio::spawn(scan_loop(
        orchestrator.clone(),
        next_daily_tick(settings.daily_scan_hour_utc),
        DAILY_PERIOD_SECS,
        "daily",
    ));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested, stopping after current pair");
    cancel.store(true, Ordering::Relaxed);
    hourly.abort();
    daily.abort();
    Ok(())
}

// ============================================================================
// One-shot commands
// ============================================================================

async fn show_signals(
    store: &Store,
    symbol: Option<String>,
    timeframe: Option<String>,
    limit: i64,
) -> Result<()> {
    let timeframe = match timeframe {
        Some(raw) => Some(
            Timeframe::parse(&raw).ok_or_else(|| format!("unknown timeframe '{raw}'"))?,
        ),
        None => None,
    };

    let signals = store
        .recent_signals(limit, symbol.as_deref(), timeframe)
        .await?;
    if signals.is_empty() {
        println!("No signals recorded");
        return Ok(());
    }

    for s in signals {
        println!(
            "{}  {:<6} {:<3} {:<4}  entry {:>8.2}  stop {:>8.2}  tp1 {:>8.2}  tp2 {:>8.2}  rr {:<4}  {}",
            s.created_at.format("%Y-%m-%d %H:%M"),
            s.symbol,
            s.timeframe,
            s.direction.as_str(),
            s.entry,
            s.stop,
            s.tp1,
            s.tp2,
            s.risk_reward,
            s.reason,
        );
    }
    Ok(())
}

async fn show_positions(store: &Store, status: &str) -> Result<()> {
    let status = match status.to_uppercase().as_str() {
        "OPEN" => PositionStatus::Open,
        "CLOSED" => PositionStatus::Closed,
        other => return Err(format!("unknown status '{other}' (open|closed)").into()),
    };

    let positions = store.positions(status).await?;
    if positions.is_empty() {
        println!("No {} positions", status.as_str());
        return Ok(());
    }

    for p in positions {
        let closed = p
            .closed_at
            .map(|t| format!("  closed {}", t.format("%Y-%m-%d %H:%M")))
            .unwrap_or_default();
        println!(
            "{:<6} {:<3}  entry {:>8.2}  stop {:>8.2}  tp2 {:>8.2}  opened {}{}",
            p.symbol,
            p.timeframe,
            p.entry,
            p.stop,
            p.tp2,
            p.opened_at.format("%Y-%m-%d %H:%M"),
            closed,
        );
    }
    Ok(())
}

async fn show_portfolio(store: &Store, fetcher: &MarketDataFetcher) -> Result<()> {
    let positions = store.positions(PositionStatus::Open).await?;
    if positions.is_empty() {
        println!("No open positions");
        return Ok(());
    }

    for p in positions {
        match fetcher.last_price(&p.symbol).await {
            Some(last) => {
                let pnl_pct = (last - p.entry) / p.entry * 100.0;
                println!(
                    "{:<6} {:<3}  entry {:>8.2}  last {:>8.2}  pnl {:>+6.2}%",
                    p.symbol, p.timeframe, p.entry, last, pnl_pct,
                );
            }
            None => println!(
                "{:<6} {:<3}  entry {:>8.2}  last     n/a",
                p.symbol, p.timeframe, p.entry,
            ),
        }
    }
    Ok(())
}

// ============================================================================
// Entry point
// ============================================================================

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "signalbot=info".to_string()),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load()?;
    setup_logging();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let store = open_store(&settings).await?;
            run_scheduler(&settings, store).await?;
        }
        Command::Scan => {
            let store = open_store(&settings).await?;
            let orchestrator = build_orchestrator(&settings, store);
            let created = orchestrator.run().await?;
            println!("Scan complete: {created} signals created");
        }
        Command::Watchlist { action } => {
            let store = open_store(&settings).await?;
            match action {
                WatchlistAction::List => {
                    for entry in store.watchlist().await? {
                        println!("{}", entry.symbol);
                    }
                }
                WatchlistAction::Add { symbol } => {
                    if store.add_symbol(&symbol).await? {
                        println!("Added {}", symbol.trim().to_uppercase());
                    } else {
                        println!("{} already on the watchlist", symbol.trim().to_uppercase());
                    }
                }
                WatchlistAction::Remove { symbol } => {
                    if store.remove_symbol(&symbol).await? {
                        println!("Removed {}", symbol.trim().to_uppercase());
                    } else {
                        println!("{} was not on the watchlist", symbol.trim().to_uppercase());
                    }
                }
            }
        }
        Command::Signals {
            symbol,
            timeframe,
            limit,
        } => {
            let store = open_store(&settings).await?;
            show_signals(&store, symbol, timeframe, limit).await?;
        }
        Command::Positions { status } => {
            let store = open_store(&settings).await?;
            show_positions(&store, &status).await?;
        }
        Command::Portfolio => {
            let store = open_store(&settings).await?;
            let fetcher = build_fetcher(&settings);
            show_portfolio(&store, &fetcher).await?;
        }
        Command::Price { symbol } => {
            let fetcher = build_fetcher(&settings);
            match fetcher.last_price(&symbol).await {
                Some(price) => println!("{} {:.2}", symbol.trim().to_uppercase(), price),
                None => return Err(format!("no price available for {symbol}").into()),
            }
        }
    }

    Ok(())
}
