use crate::models::{
    Direction, Position, PositionStatus, Signal, Timeframe, WatchlistEntry,
};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

/// SQLite persistence for watchlist, signals and positions.
///
/// The "at most one OPEN position per (symbol, timeframe)" invariant is
/// enforced here, not by callers: a partial unique index rejects a second
/// OPEN row, and entry/exit are applied as single transactions so a signal
/// is never persisted without its position transition (or vice versa).
pub struct Store {
    pool: SqlitePool,
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS watchlist (
        symbol TEXT PRIMARY KEY
    )",
    "CREATE TABLE IF NOT EXISTS signals (
        id          TEXT PRIMARY KEY,
        symbol      TEXT NOT NULL,
        timeframe   TEXT NOT NULL,
        direction   TEXT NOT NULL,
        entry       REAL NOT NULL,
        stop        REAL NOT NULL,
        tp1         REAL NOT NULL,
        tp2         REAL NOT NULL,
        confidence  TEXT NOT NULL,
        reason      TEXT NOT NULL,
        risk_reward REAL NOT NULL,
        created_at  TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_signals_pair_recency
        ON signals (symbol, timeframe, created_at DESC)",
    "CREATE TABLE IF NOT EXISTS positions (
        id        TEXT PRIMARY KEY,
        symbol    TEXT NOT NULL,
        timeframe TEXT NOT NULL,
        entry     REAL NOT NULL,
        stop      REAL NOT NULL,
        tp1       REAL NOT NULL,
        tp2       REAL NOT NULL,
        status    TEXT NOT NULL,
        opened_at TEXT NOT NULL,
        closed_at TEXT
    )",
    // The invariant: one OPEN row per pair
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_positions_one_open
        ON positions (symbol, timeframe) WHERE status = 'OPEN'",
];

impl Store {
    /// Open (creating the file if needed) and apply the schema
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid database url {}", database_url))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("failed to open database")?;

        let store = Self { pool };
        store.init_schema().await?;

        tracing::info!("Connected to SQLite store at {}", database_url);
        Ok(store)
    }

    /// Single-connection in-memory store for tests
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("failed to open in-memory database")?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("failed to apply schema")?;
        }
        Ok(())
    }

    // ============== Watchlist ==============

    /// Insert the default symbols, but only when the table is empty
    pub async fn seed_watchlist_if_empty(&self, defaults: &[String]) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM watchlist")
            .fetch_one(&self.pool)
            .await?;
        if count > 0 {
            return Ok(0);
        }

        let mut seeded = 0;
        for symbol in defaults {
            if self.add_symbol(symbol).await? {
                seeded += 1;
            }
        }
        tracing::info!("Seeded watchlist with {} symbols", seeded);
        Ok(seeded)
    }

    pub async fn watchlist(&self) -> Result<Vec<WatchlistEntry>> {
        let rows = sqlx::query("SELECT symbol FROM watchlist ORDER BY symbol ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| WatchlistEntry {
                symbol: row.get("symbol"),
            })
            .collect())
    }

    /// Returns false when the symbol was already present
    pub async fn add_symbol(&self, symbol: &str) -> Result<bool> {
        let symbol = normalize_symbol(symbol)?;
        let result = sqlx::query("INSERT OR IGNORE INTO watchlist (symbol) VALUES (?1)")
            .bind(&symbol)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Returns false when the symbol was not on the list
    pub async fn remove_symbol(&self, symbol: &str) -> Result<bool> {
        let symbol = normalize_symbol(symbol)?;
        let result = sqlx::query("DELETE FROM watchlist WHERE symbol = ?1")
            .bind(&symbol)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ============== Signals ==============

    pub async fn recent_signals(
        &self,
        limit: i64,
        symbol: Option<&str>,
        timeframe: Option<Timeframe>,
    ) -> Result<Vec<Signal>> {
        let mut sql = String::from(
            "SELECT id, symbol, timeframe, direction, entry, stop, tp1, tp2,
                    confidence, reason, risk_reward, created_at
             FROM signals WHERE 1=1",
        );
        if symbol.is_some() {
            sql.push_str(" AND symbol = ?");
        }
        if timeframe.is_some() {
            sql.push_str(" AND timeframe = ?");
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ?");

        let mut query = sqlx::query(&sql);
        if let Some(symbol) = symbol {
            query = query.bind(symbol.trim().to_uppercase());
        }
        if let Some(timeframe) = timeframe {
            query = query.bind(timeframe.as_str());
        }
        query = query.bind(limit);

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(signal_from_row).collect()
    }

    // ============== Positions ==============

    /// Latest OPEN position for a pair, if any
    pub async fn open_position(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<Position>> {
        let row = sqlx::query(
            "SELECT id, symbol, timeframe, entry, stop, tp1, tp2, status, opened_at, closed_at
             FROM positions
             WHERE symbol = ?1 AND timeframe = ?2 AND status = 'OPEN'
             ORDER BY opened_at DESC
             LIMIT 1",
        )
        .bind(symbol)
        .bind(timeframe.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(position_from_row).transpose()
    }

    pub async fn positions(&self, status: PositionStatus) -> Result<Vec<Position>> {
        let rows = sqlx::query(
            "SELECT id, symbol, timeframe, entry, stop, tp1, tp2, status, opened_at, closed_at
             FROM positions WHERE status = ?1 ORDER BY opened_at DESC",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(position_from_row).collect()
    }

    // ============== Atomic per-pair transitions ==============

    /// Persist an entry signal and open its position as one transaction.
    /// A concurrent OPEN row for the pair makes the whole unit roll back.
    pub async fn apply_entry(&self, signal: &Signal) -> Result<Position> {
        let mut tx = self.pool.begin().await?;

        insert_signal(&mut tx, signal).await?;

        let position = Position {
            id: Uuid::new_v4(),
            symbol: signal.symbol.clone(),
            timeframe: signal.timeframe,
            entry: signal.entry,
            stop: signal.stop,
            tp1: signal.tp1,
            tp2: signal.tp2,
            status: PositionStatus::Open,
            opened_at: signal.created_at,
            closed_at: None,
        };

        sqlx::query(
            "INSERT INTO positions (id, symbol, timeframe, entry, stop, tp1, tp2, status, opened_at, closed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL)",
        )
        .bind(position.id.to_string())
        .bind(&position.symbol)
        .bind(position.timeframe.as_str())
        .bind(position.entry)
        .bind(position.stop)
        .bind(position.tp1)
        .bind(position.tp2)
        .bind(position.status.as_str())
        .bind(position.opened_at)
        .execute(&mut *tx)
        .await
        .with_context(|| {
            format!(
                "failed to open position for {} {}",
                position.symbol, position.timeframe
            )
        })?;

        tx.commit().await?;
        Ok(position)
    }

    /// Persist an exit signal and close its position as one transaction.
    /// Fails (rolling back the signal) when the position is no longer OPEN.
    pub async fn apply_exit(&self, signal: &Signal, position_id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        insert_signal(&mut tx, signal).await?;

        let result = sqlx::query(
            "UPDATE positions SET status = 'CLOSED', closed_at = ?1
             WHERE id = ?2 AND status = 'OPEN'",
        )
        .bind(signal.created_at)
        .bind(position_id.to_string())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            bail!("position {} is not open", position_id);
        }

        tx.commit().await?;
        Ok(())
    }
}

async fn insert_signal(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    signal: &Signal,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO signals (id, symbol, timeframe, direction, entry, stop, tp1, tp2,
                              confidence, reason, risk_reward, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
    )
    .bind(signal.id.to_string())
    .bind(&signal.symbol)
    .bind(signal.timeframe.as_str())
    .bind(signal.direction.as_str())
    .bind(signal.entry)
    .bind(signal.stop)
    .bind(signal.tp1)
    .bind(signal.tp2)
    .bind(&signal.confidence)
    .bind(&signal.reason)
    .bind(signal.risk_reward)
    .bind(signal.created_at)
    .execute(&mut **tx)
    .await
    .context("failed to insert signal")?;
    Ok(())
}

fn normalize_symbol(symbol: &str) -> Result<String> {
    let symbol = symbol.trim().to_uppercase();
    if symbol.is_empty() || symbol.chars().any(char::is_whitespace) {
        bail!("invalid symbol {:?}", symbol);
    }
    Ok(symbol)
}

fn signal_from_row(row: &SqliteRow) -> Result<Signal> {
    let id: String = row.get("id");
    let timeframe: String = row.get("timeframe");
    let direction: String = row.get("direction");
    let created_at: DateTime<Utc> = row.get("created_at");

    Ok(Signal {
        id: Uuid::parse_str(&id).context("invalid signal id")?,
        symbol: row.get("symbol"),
        timeframe: Timeframe::parse(&timeframe)
            .with_context(|| format!("invalid timeframe {}", timeframe))?,
        direction: match direction.as_str() {
            "BUY" => Direction::Buy,
            "SELL" => Direction::Sell,
            other => bail!("invalid direction {}", other),
        },
        entry: row.get("entry"),
        stop: row.get("stop"),
        tp1: row.get("tp1"),
        tp2: row.get("tp2"),
        confidence: row.get("confidence"),
        reason: row.get("reason"),
        risk_reward: row.get("risk_reward"),
        created_at,
    })
}

fn position_from_row(row: &SqliteRow) -> Result<Position> {
    let id: String = row.get("id");
    let timeframe: String = row.get("timeframe");
    let status: String = row.get("status");
    let opened_at: DateTime<Utc> = row.get("opened_at");
    let closed_at: Option<DateTime<Utc>> = row.get("closed_at");

    Ok(Position {
        id: Uuid::parse_str(&id).context("invalid position id")?,
        symbol: row.get("symbol"),
        timeframe: Timeframe::parse(&timeframe)
            .with_context(|| format!("invalid timeframe {}", timeframe))?,
        entry: row.get("entry"),
        stop: row.get("stop"),
        tp1: row.get("tp1"),
        tp2: row.get("tp2"),
        status: match status.as_str() {
            "OPEN" => PositionStatus::Open,
            "CLOSED" => PositionStatus::Closed,
            other => bail!("invalid position status {}", other),
        },
        opened_at,
        closed_at,
    })
}
