//! Shared types for the round-betting agent.
//!
//! These types form the data model used across all modules. Ledger
//! adapters produce them, strategy code consumes them, and the engine
//! records them. Nothing in here performs I/O.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Direction
// ---------------------------------------------------------------------------

/// Which way a round closes relative to its lock price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn opposite(&self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }

    /// Stable lowercase key used in the position store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "UP"),
            Direction::Down => write!(f, "DOWN"),
        }
    }
}

/// Case-insensitive; accepts the contract's bull/bear vocabulary too.
impl std::str::FromStr for Direction {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "up" | "bull" => Ok(Direction::Up),
            "down" | "bear" => Ok(Direction::Down),
            _ => Err(BotError::Conversion(format!("Unknown direction: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Round
// ---------------------------------------------------------------------------

/// One betting round as reported by the prediction contract.
///
/// Amounts are in the ledger's native coin, prices in quote currency.
/// Pool amounts keep changing until the lock block; everything is frozen
/// once `oracle_called` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    pub epoch: u64,
    pub start_block: u64,
    pub lock_block: u64,
    pub end_block: u64,
    pub lock_price: Decimal,
    pub close_price: Decimal,
    pub total_amount: Decimal,
    pub bull_amount: Decimal,
    pub bear_amount: Decimal,
    pub reward_base_cal_amount: Decimal,
    pub reward_amount: Decimal,
    pub oracle_called: bool,
}

impl fmt::Display for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "round {} (lock #{} | end #{} | pool {:.3} | bull {:.3} | bear {:.3})",
            self.epoch,
            self.lock_block,
            self.end_block,
            self.total_amount,
            self.bull_amount,
            self.bear_amount,
        )
    }
}

impl Round {
    /// Money staked on one side of the pool.
    pub fn side_amount(&self, direction: Direction) -> Decimal {
        match direction {
            Direction::Up => self.bull_amount,
            Direction::Down => self.bear_amount,
        }
    }

    /// Gross payout multiple for a side: `total / side`.
    /// `None` when nobody has bet on that side yet.
    pub fn odds(&self, direction: Direction) -> Option<Decimal> {
        let side = self.side_amount(direction);
        if side.is_zero() {
            return None;
        }
        self.total_amount.checked_div(side)
    }

    /// Winning direction, only once the oracle has closed the round.
    /// A flat close counts as DOWN.
    pub fn result(&self) -> Option<Direction> {
        if !self.oracle_called {
            return None;
        }
        if self.close_price > self.lock_price {
            Some(Direction::Up)
        } else {
            Some(Direction::Down)
        }
    }

    /// Blocks remaining before the round locks (negative once locked).
    pub fn blocks_until_lock(&self, current_block: u64) -> i64 {
        self.lock_block as i64 - current_block as i64
    }

    #[cfg(test)]
    pub fn sample(epoch: u64) -> Self {
        use rust_decimal_macros::dec;
        Round {
            epoch,
            start_block: 1_000,
            lock_block: 1_100,
            end_block: 1_200,
            lock_price: Decimal::ZERO,
            close_price: Decimal::ZERO,
            total_amount: dec!(30),
            bull_amount: dec!(10),
            bear_amount: dec!(20),
            reward_base_cal_amount: Decimal::ZERO,
            reward_amount: Decimal::ZERO,
            oracle_called: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Prices
// ---------------------------------------------------------------------------

/// Which of the two independent feeds a sample came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PriceSource {
    /// Exchange last-trade price.
    Primary,
    /// On-chain oracle answer.
    Secondary,
}

impl fmt::Display for PriceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriceSource::Primary => write!(f, "primary"),
            PriceSource::Secondary => write!(f, "secondary"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSample {
    pub source: PriceSource,
    pub value: Decimal,
    pub observed_at: DateTime<Utc>,
}

impl PriceSample {
    pub fn new(source: PriceSource, value: Decimal) -> Self {
        Self {
            source,
            value,
            observed_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// Output of stake sizing for one tick. Logged, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    /// `None` means do not bet this tick.
    pub direction: Option<Direction>,
    /// Half-Kelly fraction of balance for the chosen side, after capping.
    pub stake_fraction: Decimal,
    /// Absolute stake in native coin. Zero when `direction` is `None`.
    pub stake: Decimal,
    /// (primary − secondary) / secondary
    pub premium: Decimal,
    pub reason: String,
}

impl Decision {
    pub fn none(premium: Decimal, reason: impl Into<String>) -> Self {
        Self {
            direction: None,
            stake_fraction: Decimal::ZERO,
            stake: Decimal::ZERO,
            premium,
            reason: reason.into(),
        }
    }

    pub fn is_bet(&self) -> bool {
        self.direction.is_some()
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            Some(d) => write!(
                f,
                "{d} stake={:.4} kelly={:.2}% premium={:.4}% ({})",
                self.stake,
                self.stake_fraction * Decimal::ONE_HUNDRED,
                self.premium * Decimal::ONE_HUNDRED,
                self.reason,
            ),
            None => write!(
                f,
                "NONE premium={:.4}% ({})",
                self.premium * Decimal::ONE_HUNDRED,
                self.reason
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Pending,
    Confirmed,
    Failed,
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionStatus::Pending => write!(f, "PENDING"),
            PositionStatus::Confirmed => write!(f, "CONFIRMED"),
            PositionStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// A bet this process placed (or attempted) for one epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub epoch: u64,
    pub direction: Direction,
    pub stake: Decimal,
    pub tx_hash: Option<String>,
    pub status: PositionStatus,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "epoch {} {} {:.4} [{}] {}",
            self.epoch,
            self.direction,
            self.stake,
            self.status,
            self.tx_hash.as_deref().unwrap_or("-"),
        )
    }
}

impl Position {
    pub fn pending(epoch: u64, direction: Direction, stake: Decimal) -> Self {
        Self {
            epoch,
            direction,
            stake,
            tx_hash: None,
            status: PositionStatus::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == PositionStatus::Pending
    }
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// Hash prefix of submissions that were never broadcast.
pub const DRY_RUN_PREFIX: &str = "dry-run-";

/// Handle to a submitted write operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxHandle {
    pub tx_hash: String,
    /// `None` for dry-run submissions and for handles rebuilt from storage.
    pub nonce: Option<u64>,
    pub submitted_at: DateTime<Utc>,
}

impl TxHandle {
    /// Handle for a hash recorded by an earlier run.
    pub fn recovered(tx_hash: String) -> Self {
        Self {
            tx_hash,
            nonce: None,
            submitted_at: Utc::now(),
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.tx_hash.starts_with(DRY_RUN_PREFIX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    Success,
    Reverted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: String,
    pub status: TxStatus,
}

impl Receipt {
    pub fn succeeded(&self) -> bool {
        self.status == TxStatus::Success
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain error taxonomy. Only `Configuration` is ever fatal, and only
/// before the betting loop starts.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("Network error ({context}): {message}")]
    TransientNetwork { context: String, message: String },

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Nonce conflict at nonce {nonce}: {message}")]
    NonceConflict { nonce: u64, message: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("No receipt for {tx_hash} after {waited_secs}s")]
    ReceiptTimeout { tx_hash: String, waited_secs: u64 },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Conversion error: {0}")]
    Conversion(String),
}

impl BotError {
    pub fn transient(context: impl Into<String>, err: impl fmt::Display) -> Self {
        BotError::TransientNetwork {
            context: context.into(),
            message: err.to_string(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, BotError::Configuration(_))
    }
}

impl From<sqlx::Error> for BotError {
    fn from(e: sqlx::Error) -> Self {
        BotError::Storage(e.to_string())
    }
}

pub type BotResult<T> = std::result::Result<T, BotError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
