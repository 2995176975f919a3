//! Ledger integration.
//!
//! Defines the narrow traits the engine consumes and provides the EVM
//! adapter implementing all of them:
//! - `RoundReader` — round state and chain metadata (read-only)
//! - `AccountReader` — wallet balance and chain-reported nonce
//! - `LedgerWriter` — signed write operations and their receipts
//!
//! Implementations surface failures immediately; retry and backoff
//! policy belongs to the caller.

pub mod evm;
pub mod units;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;

use crate::types::{BotResult, Direction, Round, TxStatus};

#[cfg(test)]
use mockall::automock;

/// Read access to the round contract and the chain it lives on.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RoundReader: Send + Sync {
    async fn current_epoch(&self) -> BotResult<u64>;

    async fn round_details(&self, epoch: u64) -> BotResult<Round>;

    async fn is_paused(&self) -> BotResult<bool>;

    async fn latest_block(&self) -> BotResult<u64>;

    /// Contract-enforced minimum stake, in native coin.
    async fn min_bet_amount(&self) -> BotResult<Decimal>;

    /// Whether our account can claim winnings for `epoch`.
    async fn claimable(&self, epoch: u64) -> BotResult<bool>;

    async fn block_timestamp(&self, block: u64) -> BotResult<DateTime<Utc>>;
}

/// Read access to the betting account itself.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AccountReader: Send + Sync {
    /// Spendable balance in native coin.
    async fn balance(&self) -> BotResult<Decimal>;

    /// Next nonce as the chain sees it (pending transaction count).
    async fn transaction_count(&self) -> BotResult<u64>;
}

/// Signed writes against the round contract.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LedgerWriter: Send + Sync {
    /// Build, sign and broadcast. Returns the transaction hash.
    async fn send(&self, call: LedgerCall, params: TxParams) -> BotResult<String>;

    /// `None` while the transaction is not yet mined.
    async fn receipt(&self, tx_hash: &str) -> BotResult<Option<TxStatus>>;
}

// ---------------------------------------------------------------------------
// Write operations
// ---------------------------------------------------------------------------

/// The contract's published write operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerCall {
    BetUp,
    BetDown,
    Claim(u64),
}

impl LedgerCall {
    pub fn bet(direction: Direction) -> Self {
        match direction {
            Direction::Up => LedgerCall::BetUp,
            Direction::Down => LedgerCall::BetDown,
        }
    }

    pub fn is_claim(&self) -> bool {
        matches!(self, LedgerCall::Claim(_))
    }
}

impl fmt::Display for LedgerCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerCall::BetUp => write!(f, "betBull"),
            LedgerCall::BetDown => write!(f, "betBear"),
            LedgerCall::Claim(epoch) => write!(f, "claim({epoch})"),
        }
    }
}

/// Transaction envelope fields every write requires.
#[derive(Debug, Clone, PartialEq)]
pub struct TxParams {
    pub from: String,
    /// Native coin attached to the call.
    pub value: Decimal,
    pub gas: u64,
    pub gas_price_gwei: Decimal,
    pub nonce: u64,
}

/// Map a node's send-error text onto the error taxonomy (geth phrasing).
pub fn classify_send_error(nonce: u64, message: &str) -> crate::types::BotError {
    use crate::types::BotError;

    let lower = message.to_lowercase();
    if lower.contains("nonce too low")
        || lower.contains("already known")
        || lower.contains("replacement transaction underpriced")
        || lower.contains("nonce too high")
    {
        BotError::NonceConflict {
            nonce,
            message: message.to_string(),
        }
    } else if lower.contains("insufficient funds") {
        BotError::InsufficientFunds(message.to_string())
    } else {
        BotError::transient("send transaction", message)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
