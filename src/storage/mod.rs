//! Persistence layer.
//!
//! Append-only `bet_events` table in SQLite. Every placement, confirmation,
//! failure and claim is one row; a position is the fold of its epoch's rows.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

use crate::types::{BotError, BotResult, Direction, Position, PositionStatus};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS bet_events (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp   TEXT    NOT NULL,
    event_type  TEXT    NOT NULL,
    epoch       INTEGER NOT NULL,
    direction   TEXT,
    stake_size  TEXT,
    tx_hash     TEXT
);
CREATE INDEX IF NOT EXISTS idx_bet_events_epoch ON bet_events (epoch);
"#;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Bet,
    BetSubmitted,
    BetConfirmed,
    BetFailed,
    Claimed,
    ClaimReverted,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Bet => "bet",
            EventType::BetSubmitted => "bet_submitted",
            EventType::BetConfirmed => "bet_confirmed",
            EventType::BetFailed => "bet_failed",
            EventType::Claimed => "claimed",
            EventType::ClaimReverted => "claim_reverted",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bet" => Ok(EventType::Bet),
            "bet_submitted" => Ok(EventType::BetSubmitted),
            "bet_confirmed" => Ok(EventType::BetConfirmed),
            "bet_failed" => Ok(EventType::BetFailed),
            "claimed" => Ok(EventType::Claimed),
            "claim_reverted" => Ok(EventType::ClaimReverted),
            other => Err(BotError::Storage(format!("unknown event type {other}"))),
        }
    }
}

/// One row of `bet_events`.
#[derive(Debug, Clone, PartialEq)]
pub struct BetEvent {
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub epoch: u64,
    pub direction: Option<Direction>,
    pub stake_size: Option<Decimal>,
    pub tx_hash: Option<String>,
}

impl BetEvent {
    pub fn new(event_type: EventType, epoch: u64) -> Self {
        Self {
            id: None,
            timestamp: Utc::now(),
            event_type,
            epoch,
            direction: None,
            stake_size: None,
            tx_hash: None,
        }
    }

    pub fn with_tx_hash(mut self, tx_hash: Option<String>) -> Self {
        self.tx_hash = tx_hash;
        self
    }

    /// A placement attempt, written before anything is broadcast.
    pub fn placement(position: &Position) -> Self {
        let mut event =
            Self::new(EventType::Bet, position.epoch).with_tx_hash(position.tx_hash.clone());
        event.direction = Some(position.direction);
        event.stake_size = Some(position.stake);
        event
    }

    /// The hash of a broadcast placement.
    pub fn submission(epoch: u64, tx_hash: &str) -> Self {
        Self::new(EventType::BetSubmitted, epoch).with_tx_hash(Some(tx_hash.to_string()))
    }

    /// The final status of a placement.
    pub fn outcome(epoch: u64, status: PositionStatus, tx_hash: Option<String>) -> BotResult<Self> {
        let event_type = match status {
            PositionStatus::Confirmed => EventType::BetConfirmed,
            PositionStatus::Failed => EventType::BetFailed,
            PositionStatus::Pending => {
                return Err(BotError::Storage(format!(
                    "epoch {epoch}: pending is not an outcome"
                )))
            }
        };
        Ok(Self::new(event_type, epoch).with_tx_hash(tx_hash))
    }

    fn from_row(row: &SqliteRow) -> BotResult<Self> {
        let timestamp: String = row.try_get("timestamp")?;
        let event_type: String = row.try_get("event_type")?;
        let epoch: i64 = row.try_get("epoch")?;
        let direction: Option<String> = row.try_get("direction")?;
        let stake_size: Option<String> = row.try_get("stake_size")?;

        Ok(Self {
            id: Some(row.try_get("id")?),
            timestamp: DateTime::parse_from_rfc3339(&timestamp)
                .map_err(|e| BotError::Storage(format!("bad timestamp {timestamp}: {e}")))?
                .with_timezone(&Utc),
            event_type: event_type.parse()?,
            epoch: epoch as u64,
            direction: direction.map(|d| d.parse::<Direction>()).transpose()?,
            stake_size: stake_size
                .map(|s| {
                    Decimal::from_str(&s)
                        .map_err(|e| BotError::Storage(format!("bad stake {s}: {e}")))
                })
                .transpose()?,
            tx_hash: row.try_get("tx_hash")?,
        })
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PositionStore {
    pool: SqlitePool,
    #[cfg(test)]
    reject_writes: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl PositionStore {
    /// Open (creating if needed) the database at `database_url`.
    pub async fn connect(database_url: &str) -> BotResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| BotError::Configuration(format!("invalid database url: {e}")))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            #[cfg(test)]
            reject_writes: Default::default(),
        };
        store.migrate().await?;
        info!(database_url, "Position store ready");
        Ok(store)
    }

    /// Private in-memory database. One connection, so every query sees
    /// the same data.
    pub async fn in_memory() -> BotResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let store = Self {
            pool,
            #[cfg(test)]
            reject_writes: Default::default(),
        };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> BotResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// Switch that makes every `append` fail while set.
    #[cfg(test)]
    pub(crate) fn write_switch(&self) -> std::sync::Arc<std::sync::atomic::AtomicBool> {
        self.reject_writes.clone()
    }

    pub async fn append(&self, event: &BetEvent) -> BotResult<i64> {
        #[cfg(test)]
        if self.reject_writes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(BotError::Storage("database is locked".into()));
        }

        let result = sqlx::query(
            "INSERT INTO bet_events (timestamp, event_type, epoch, direction, stake_size, tx_hash) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(event.timestamp.to_rfc3339())
        .bind(event.event_type.as_str())
        .bind(event.epoch as i64)
        .bind(event.direction.map(|d| d.as_str()))
        .bind(event.stake_size.map(|s| s.to_string()))
        .bind(event.tx_hash.as_deref())
        .execute(&self.pool)
        .await?;

        debug!(epoch = event.epoch, event = %event.event_type, "Event recorded");
        Ok(result.last_insert_rowid())
    }

    /// Record a placement attempt.
    pub async fn record_bet(&self, position: &Position) -> BotResult<i64> {
        self.append(&BetEvent::placement(position)).await
    }

    /// Attach the broadcast hash to an already recorded placement.
    pub async fn record_submission(&self, epoch: u64, tx_hash: &str) -> BotResult<i64> {
        self.append(&BetEvent::submission(epoch, tx_hash)).await
    }

    /// Record the final status of a placement.
    pub async fn record_bet_outcome(
        &self,
        epoch: u64,
        status: PositionStatus,
        tx_hash: Option<String>,
    ) -> BotResult<i64> {
        self.append(&BetEvent::outcome(epoch, status, tx_hash)?).await
    }

    pub async fn record_claim(
        &self,
        epoch: u64,
        tx_hash: &str,
        succeeded: bool,
    ) -> BotResult<i64> {
        let event_type = if succeeded {
            EventType::Claimed
        } else {
            EventType::ClaimReverted
        };
        self.append(&BetEvent::new(event_type, epoch).with_tx_hash(Some(tx_hash.to_string())))
            .await
    }

    pub async fn events_for_epoch(&self, epoch: u64) -> BotResult<Vec<BetEvent>> {
        let rows = sqlx::query("SELECT * FROM bet_events WHERE epoch = ? ORDER BY id")
            .bind(epoch as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(BetEvent::from_row).collect()
    }

    /// The position recorded for `epoch`, folded from its events.
    pub async fn position_for_epoch(&self, epoch: u64) -> BotResult<Option<Position>> {
        let events = self.events_for_epoch(epoch).await?;
        Ok(fold_position(&events))
    }

    pub async fn is_claimed(&self, epoch: u64) -> BotResult<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM bet_events WHERE epoch = ? AND event_type = 'claimed'",
        )
        .bind(epoch as i64)
        .fetch_one(&self.pool)
        .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n > 0)
    }

    /// Every recorded position, oldest epoch first.
    pub async fn positions(&self) -> BotResult<Vec<Position>> {
        let rows = sqlx::query("SELECT * FROM bet_events ORDER BY epoch, id")
            .fetch_all(&self.pool)
            .await?;
        let events = rows
            .iter()
            .map(BetEvent::from_row)
            .collect::<BotResult<Vec<_>>>()?;

        let mut positions = Vec::new();
        for chunk in events.chunk_by(|a, b| a.epoch == b.epoch) {
            if let Some(position) = fold_position(chunk) {
                positions.push(position);
            }
        }
        Ok(positions)
    }
}

/// Replay one epoch's events into its position. Only the first `bet` row
/// opens a position; later status rows refine it.
fn fold_position(events: &[BetEvent]) -> Option<Position> {
    let mut position: Option<Position> = None;
    for event in events {
        match (event.event_type, position.as_mut()) {
            (EventType::Bet, None) => {
                let direction = event.direction?;
                let mut opened =
                    Position::pending(event.epoch, direction, event.stake_size.unwrap_or_default());
                opened.tx_hash = event.tx_hash.clone();
                position = Some(opened);
            }
            (EventType::BetSubmitted, Some(p)) => {
                p.tx_hash = event.tx_hash.clone();
            }
            (EventType::BetConfirmed, Some(p)) => {
                p.status = PositionStatus::Confirmed;
                if event.tx_hash.is_some() {
                    p.tx_hash = event.tx_hash.clone();
                }
            }
            (EventType::BetFailed, Some(p)) => {
                p.status = PositionStatus::Failed;
                if event.tx_hash.is_some() {
                    p.tx_hash = event.tx_hash.clone();
                }
            }
            _ => {}
        }
    }
    position
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
