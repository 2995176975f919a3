//! Settlement of past rounds.
//!
//! Runs a few epochs behind the live round. For a round we won, checks the
//! contract still considers the winnings claimable and submits one claim.
//! A reverted claim is recorded and never retried.

use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::executor::TransactionExecutor;
use crate::ledger::{LedgerCall, RoundReader};
use crate::notify::{claim_message, Notifier};
use crate::storage::PositionStore;
use crate::types::{BotError, BotResult, PositionStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    AlreadyClaimed,
    /// No bet recorded for the epoch, or the bet never made it on chain.
    NotParticipated,
    /// Oracle has not closed the round yet.
    NotFinalized,
    Lost,
    /// Won, but the contract reports nothing to claim.
    NotClaimable,
    Claimed { tx_hash: String },
    ClaimReverted { tx_hash: String },
    /// Claim sent, no receipt within the timeout.
    ClaimPending { tx_hash: String },
}

impl fmt::Display for SettlementOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettlementOutcome::AlreadyClaimed => write!(f, "already claimed"),
            SettlementOutcome::NotParticipated => write!(f, "not participated"),
            SettlementOutcome::NotFinalized => write!(f, "not finalized"),
            SettlementOutcome::Lost => write!(f, "lost"),
            SettlementOutcome::NotClaimable => write!(f, "not claimable"),
            SettlementOutcome::Claimed { tx_hash } => write!(f, "claimed ({tx_hash})"),
            SettlementOutcome::ClaimReverted { tx_hash } => write!(f, "claim reverted ({tx_hash})"),
            SettlementOutcome::ClaimPending { tx_hash } => write!(f, "claim pending ({tx_hash})"),
        }
    }
}

pub struct SettlementWorker {
    reader: Arc<dyn RoundReader>,
    executor: Arc<TransactionExecutor>,
    store: PositionStore,
    notifier: Arc<dyn Notifier>,
    receipt_timeout: Duration,
}

impl SettlementWorker {
    pub fn new(
        reader: Arc<dyn RoundReader>,
        executor: Arc<TransactionExecutor>,
        store: PositionStore,
        notifier: Arc<dyn Notifier>,
        receipt_timeout: Duration,
    ) -> Self {
        Self {
            reader,
            executor,
            store,
            notifier,
            receipt_timeout,
        }
    }

    pub async fn settle(&self, epoch: u64) -> BotResult<SettlementOutcome> {
        if self.store.is_claimed(epoch).await? {
            return Ok(SettlementOutcome::AlreadyClaimed);
        }

        let position = match self.store.position_for_epoch(epoch).await? {
            Some(p) if p.status != PositionStatus::Failed => p,
            _ => {
                debug!(epoch, "No live position to settle");
                return Ok(SettlementOutcome::NotParticipated);
            }
        };

        let round = self.reader.round_details(epoch).await?;
        let Some(result) = round.result() else {
            info!(epoch, "Round not finalized yet");
            return Ok(SettlementOutcome::NotFinalized);
        };

        if result != position.direction {
            info!(
                epoch,
                bet = %position.direction,
                result = %result,
                lock = %round.lock_price,
                close = %round.close_price,
                "Round lost"
            );
            return Ok(SettlementOutcome::Lost);
        }

        if !self.reader.claimable(epoch).await? {
            warn!(epoch, "Won round but contract reports nothing claimable");
            return Ok(SettlementOutcome::NotClaimable);
        }

        let handle = self
            .executor
            .submit(LedgerCall::Claim(epoch), Decimal::ZERO)
            .await?;

        match self.executor.await_receipt(&handle, self.receipt_timeout).await {
            Ok(receipt) if receipt.succeeded() => {
                self.store.record_claim(epoch, &receipt.tx_hash, true).await?;
                info!(epoch, tx_hash = %receipt.tx_hash, "Winnings claimed");
                self.notifier
                    .notify(&claim_message(epoch, position.direction, &receipt.tx_hash), false)
                    .await;
                Ok(SettlementOutcome::Claimed {
                    tx_hash: receipt.tx_hash,
                })
            }
            Ok(receipt) => {
                self.store.record_claim(epoch, &receipt.tx_hash, false).await?;
                warn!(epoch, tx_hash = %receipt.tx_hash, "Claim reverted");
                Ok(SettlementOutcome::ClaimReverted {
                    tx_hash: receipt.tx_hash,
                })
            }
            Err(BotError::ReceiptTimeout { tx_hash, waited_secs }) => {
                warn!(epoch, %tx_hash, waited_secs, "Claim receipt timed out");
                Ok(SettlementOutcome::ClaimPending { tx_hash })
            }
            Err(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
