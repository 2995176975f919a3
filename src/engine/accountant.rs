//! Accountant: result analysis over recorded bets.
//!
//! Joins every recorded position with its finalized round and tallies
//! wins, losses and estimated P&L. Payouts follow the contract's reward
//! formula: `stake × reward_amount / reward_base_cal_amount`.

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use crate::ledger::RoundReader;
use crate::storage::PositionStore;
use crate::types::{BotResult, Direction, Position, PositionStatus, Round};

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochRow {
    pub epoch: u64,
    pub direction: Direction,
    pub stake: Decimal,
    pub status: PositionStatus,
    /// `None` until the oracle closes the round.
    pub result: Option<Direction>,
    /// Final gross odds on our side.
    pub odds: Option<Decimal>,
    pub pnl: Option<Decimal>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceReport {
    pub bets: usize,
    pub wins: usize,
    pub losses: usize,
    /// Placed but not yet settled by the oracle.
    pub unresolved: usize,
    /// Attempts that never landed on chain.
    pub failed: usize,
    pub win_rate: Decimal,
    pub staked: Decimal,
    pub net_pnl: Decimal,
    pub rows: Vec<EpochRow>,
}

// ---------------------------------------------------------------------------
// Accountant
// ---------------------------------------------------------------------------

pub struct Accountant;

impl Accountant {
    /// Review every recorded position against the chain.
    ///
    /// A round that cannot be read is counted as unresolved rather than
    /// failing the whole report.
    pub async fn review(
        store: &PositionStore,
        reader: &dyn RoundReader,
    ) -> BotResult<PerformanceReport> {
        let positions = store.positions().await?;
        let mut rounds = Vec::with_capacity(positions.len());

        for position in &positions {
            if position.status == PositionStatus::Failed {
                rounds.push(None);
                continue;
            }
            match reader.round_details(position.epoch).await {
                Ok(round) => rounds.push(Some(round)),
                Err(e) => {
                    warn!(epoch = position.epoch, error = %e, "Round unreadable, counting as unresolved");
                    rounds.push(None);
                }
            }
        }

        let report = Self::tally(&positions, &rounds);
        info!(
            bets = report.bets,
            wins = report.wins,
            losses = report.losses,
            unresolved = report.unresolved,
            win_rate = format!("{:.1}%", report.win_rate * Decimal::ONE_HUNDRED),
            net_pnl = %report.net_pnl,
            "Performance reviewed"
        );
        Ok(report)
    }

    /// Pure tally over positions and their (optional) rounds, index-aligned.
    pub fn tally(positions: &[Position], rounds: &[Option<Round>]) -> PerformanceReport {
        let mut report = PerformanceReport::default();

        for (position, round) in positions.iter().zip(rounds) {
            if position.status == PositionStatus::Failed {
                report.failed += 1;
                report.rows.push(EpochRow {
                    epoch: position.epoch,
                    direction: position.direction,
                    stake: position.stake,
                    status: position.status,
                    result: None,
                    odds: None,
                    pnl: None,
                });
                continue;
            }

            report.bets += 1;
            report.staked += position.stake;

            let result = round.as_ref().and_then(Round::result);
            let odds = round.as_ref().and_then(|r| r.odds(position.direction));
            let pnl = match (result, round) {
                (Some(winner), Some(round)) if winner == position.direction => {
                    report.wins += 1;
                    Some(payout(position.stake, round) - position.stake)
                }
                (Some(_), _) => {
                    report.losses += 1;
                    Some(-position.stake)
                }
                _ => {
                    report.unresolved += 1;
                    None
                }
            };
            if let Some(p) = pnl {
                report.net_pnl += p;
            }

            report.rows.push(EpochRow {
                epoch: position.epoch,
                direction: position.direction,
                stake: position.stake,
                status: position.status,
                result,
                odds,
                pnl,
            });
        }

        let decided = report.wins + report.losses;
        if decided > 0 {
            report.win_rate = Decimal::from(report.wins) / Decimal::from(decided);
        }
        report
    }
}

/// Gross payout for a winning stake. Falls back to pool odds when the
/// contract has not computed rewards.
fn payout(stake: Decimal, round: &Round) -> Decimal {
    if round.reward_base_cal_amount > Decimal::ZERO {
        stake * round.reward_amount / round.reward_base_cal_amount
    } else {
        round
            .odds(round.result().unwrap_or(Direction::Down))
            .map(|odds| stake * odds)
            .unwrap_or(stake)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
