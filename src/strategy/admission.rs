//! Admission control.
//!
//! Pre-trade gates that must all pass before a round is armed: the block
//! window before lock, the contract pause flag, a balance floor and a
//! minimum pool. A second gate checks the chosen side's odds once a
//! direction is known.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use crate::types::{Direction, Round};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// Arm no earlier than this many blocks before lock.
    pub blocks_away: u64,
    /// Arm no later than this many blocks before lock.
    pub execution_block: u64,
    pub min_balance: Decimal,
    pub min_pool_size: Decimal,
    /// Minimum gross payout multiple on the chosen side.
    pub min_bet_odds: Decimal,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            blocks_away: 3,
            execution_block: 1,
            min_balance: dec!(0.1),
            min_pool_size: Decimal::ZERO,
            min_bet_odds: dec!(1.5),
        }
    }
}

// ---------------------------------------------------------------------------
// Rejection reasons
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Rejection {
    #[error("too early: {blocks_left} blocks to lock (window opens at {blocks_away})")]
    TooEarly { blocks_left: i64, blocks_away: u64 },

    #[error("too late: {blocks_left} blocks to lock (window closes at {execution_block})")]
    TooLate {
        blocks_left: i64,
        execution_block: u64,
    },

    #[error("contract paused")]
    Paused,

    #[error("balance {balance} below floor {min_balance}")]
    BalanceBelowFloor {
        balance: Decimal,
        min_balance: Decimal,
    },

    #[error("pool {pool} below minimum {min_pool}")]
    PoolTooSmall { pool: Decimal, min_pool: Decimal },

    #[error("no money on {0} side")]
    EmptySide(Direction),

    #[error("{direction} odds {odds:.3} below minimum {min_odds}")]
    OddsTooLow {
        direction: Direction,
        odds: Decimal,
        min_odds: Decimal,
    },
}

impl Rejection {
    /// Rejections that mean the account cannot fund a bet.
    pub fn is_insufficient_funds(&self) -> bool {
        matches!(self, Rejection::BalanceBelowFloor { .. })
    }

    /// Rejections that will never clear for this round.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Rejection::TooLate { .. })
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct AdmissionController {
    config: AdmissionConfig,
}

impl AdmissionController {
    pub fn new(config: AdmissionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Round-level gates, checked in order: block window, pause flag,
    /// balance floor, pool size.
    pub fn admit(
        &self,
        round: &Round,
        current_block: u64,
        paused: bool,
        balance: Decimal,
    ) -> Result<(), Rejection> {
        let blocks_left = round.blocks_until_lock(current_block);

        if blocks_left > self.config.blocks_away as i64 {
            return Err(Rejection::TooEarly {
                blocks_left,
                blocks_away: self.config.blocks_away,
            });
        }
        if blocks_left < self.config.execution_block as i64 {
            return Err(Rejection::TooLate {
                blocks_left,
                execution_block: self.config.execution_block,
            });
        }
        if paused {
            return Err(Rejection::Paused);
        }
        if balance < self.config.min_balance {
            return Err(Rejection::BalanceBelowFloor {
                balance,
                min_balance: self.config.min_balance,
            });
        }
        if round.total_amount < self.config.min_pool_size {
            return Err(Rejection::PoolTooSmall {
                pool: round.total_amount,
                min_pool: self.config.min_pool_size,
            });
        }

        debug!(
            epoch = round.epoch,
            blocks_left,
            %balance,
            pool = %round.total_amount,
            "Round admitted"
        );
        Ok(())
    }

    pub fn is_admissible(
        &self,
        round: &Round,
        current_block: u64,
        paused: bool,
        balance: Decimal,
    ) -> bool {
        self.admit(round, current_block, paused, balance).is_ok()
    }

    /// Odds gate for the side we intend to back.
    pub fn check_odds(&self, round: &Round, direction: Direction) -> Result<Decimal, Rejection> {
        let odds = round
            .odds(direction)
            .ok_or(Rejection::EmptySide(direction))?;
        if odds < self.config.min_bet_odds {
            return Err(Rejection::OddsTooLow {
                direction,
                odds,
                min_odds: self.config.min_bet_odds,
            });
        }
        Ok(odds)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
