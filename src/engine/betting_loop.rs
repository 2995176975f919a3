//! The betting loop.
//!
//! One iteration per tick. Each epoch walks WAITING → ARMED → PLACED → DONE:
//! - WAITING: round not yet admissible
//! - ARMED: inside the block window, sampling prices until a bet is sized
//! - PLACED: a submission was attempted; waiting on its receipt
//! - DONE: nothing more to do until the epoch advances
//!
//! A new epoch resets the machine and hands `epoch − settlement_lag` to the
//! settlement worker. Errors end the tick, never the loop.
//!
//! A placement is journaled before it is broadcast. Records that fail to
//! write after a broadcast are queued and retried at the start of every
//! tick; the loop does not move on to a new epoch while any are queued.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::balance::BalanceWatch;
use super::executor::TransactionExecutor;
use super::settlement::{SettlementOutcome, SettlementWorker};
use crate::feeds::{sample_pair, PairSample, PriceSampler};
use crate::ledger::{LedgerCall, RoundReader};
use crate::notify::{bet_message, Notifier};
use crate::storage::{BetEvent, EventType, PositionStore};
use crate::strategy::{Strategy, Verdict};
use crate::types::{BotError, BotResult, Decision, Position, PositionStatus, Receipt, Round, TxHandle};

// ---------------------------------------------------------------------------
// Phase & status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Waiting,
    Armed,
    Placed,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Waiting => write!(f, "WAITING"),
            Phase::Armed => write!(f, "ARMED"),
            Phase::Placed => write!(f, "PLACED"),
            Phase::Done => write!(f, "DONE"),
        }
    }
}

/// Snapshot published after every tick.
#[derive(Debug, Clone, Serialize)]
pub struct LoopStatus {
    pub epoch: Option<u64>,
    pub phase: Phase,
    pub last_decision: Option<Decision>,
    pub position: Option<Position>,
    pub updated_at: DateTime<Utc>,
}

impl Default for LoopStatus {
    fn default() -> Self {
        Self {
            epoch: None,
            phase: Phase::Waiting,
            last_decision: None,
            position: None,
            updated_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration & collaborators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub tick_interval: Duration,
    pub error_backoff: Duration,
    pub receipt_timeout: Duration,
    pub settlement_lag: u64,
    /// Older balance snapshots are still used but logged as approximate.
    pub max_balance_age: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(500),
            error_backoff: Duration::from_secs(2),
            receipt_timeout: Duration::from_secs(60),
            settlement_lag: 2,
            max_balance_age: Duration::from_secs(7_200),
        }
    }
}

/// Everything the loop talks to.
pub struct LoopContext {
    pub reader: Arc<dyn RoundReader>,
    pub sampler: Arc<dyn PriceSampler>,
    pub executor: Arc<TransactionExecutor>,
    pub store: PositionStore,
    pub notifier: Arc<dyn Notifier>,
    pub balance: BalanceWatch,
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

pub struct BettingLoop {
    config: LoopConfig,
    strategy: Strategy,
    ctx: LoopContext,
    settlement: Option<Arc<SettlementWorker>>,
    settlements: JoinSet<(u64, BotResult<SettlementOutcome>)>,
    status_tx: watch::Sender<LoopStatus>,

    epoch: Option<u64>,
    phase: Phase,
    position: Option<Position>,
    pending: Option<TxHandle>,
    last_decision: Option<Decision>,
    unsaved: VecDeque<BetEvent>,
}

impl BettingLoop {
    pub fn new(config: LoopConfig, strategy: Strategy, ctx: LoopContext) -> Self {
        let (status_tx, _) = watch::channel(LoopStatus::default());
        Self {
            config,
            strategy,
            ctx,
            settlement: None,
            settlements: JoinSet::new(),
            status_tx,
            epoch: None,
            phase: Phase::Waiting,
            position: None,
            pending: None,
            last_decision: None,
            unsaved: VecDeque::new(),
        }
    }

    /// Enable claiming of settled rounds.
    pub fn with_settlement(mut self, worker: Arc<SettlementWorker>) -> Self {
        self.settlement = Some(worker);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<LoopStatus> {
        self.status_tx.subscribe()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn epoch(&self) -> Option<u64> {
        self.epoch
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    /// Records still waiting to be written.
    pub fn unsaved(&self) -> usize {
        self.unsaved.len()
    }

    /// Tick until `shutdown` flips, then wait for in-flight settlements.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            tick_ms = self.config.tick_interval.as_millis() as u64,
            claiming = self.settlement.is_some(),
            dry_run = self.ctx.executor.is_dry_run(),
            "Betting loop started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = match self.tick().await {
                Ok(()) => self.config.tick_interval,
                Err(e) => {
                    if matches!(e, BotError::InsufficientFunds(_)) {
                        warn!(epoch = ?self.epoch, phase = %self.phase, error = %e, "Tick failed");
                    } else {
                        error!(epoch = ?self.epoch, phase = %self.phase, error = %e, "Tick failed");
                    }
                    self.config.error_backoff
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        if let Err(e) = self.flush_unsaved().await {
            error!(unsaved = self.unsaved.len(), error = %e, "Records lost at shutdown");
        }
        let outstanding = self.drain_settlements().await;
        info!(settled = outstanding.len(), "Betting loop stopped");
    }

    /// One iteration of the state machine.
    pub async fn tick(&mut self) -> BotResult<()> {
        self.reap_settlements();

        let result = match self.flush_unsaved().await {
            Ok(()) => self.step().await,
            Err(e) => Err(e),
        };
        self.publish();
        result
    }

    async fn step(&mut self) -> BotResult<()> {
        let epoch = self.ctx.reader.current_epoch().await?;

        match self.epoch {
            Some(tracked) if epoch < tracked => {
                debug!(epoch, tracked, "Epoch went backwards, ignoring tick");
                return Ok(());
            }
            Some(tracked) if epoch == tracked => {}
            _ => self.enter_epoch(epoch).await?,
        }

        match self.phase {
            Phase::Waiting | Phase::Armed => self.try_place(epoch).await,
            Phase::Placed => self.check_pending().await,
            Phase::Done => Ok(()),
        }
    }

    async fn enter_epoch(&mut self, epoch: u64) -> BotResult<()> {
        // a restart must not bet twice into the same round
        let existing = self.ctx.store.position_for_epoch(epoch).await?;

        if let Some(previous) = self.epoch {
            info!(previous, epoch, phase = %self.phase, "New epoch");
        } else {
            info!(epoch, "Tracking first epoch");
        }

        self.epoch = Some(epoch);
        self.phase = Phase::Waiting;
        self.position = None;
        self.pending = None;
        self.last_decision = None;

        if epoch > self.config.settlement_lag {
            self.spawn_settlement(epoch - self.config.settlement_lag);
        }

        if let Some(existing) = existing {
            info!(epoch, position = %existing, "Position already recorded for epoch");
            self.pending = match (&existing.tx_hash, existing.is_pending()) {
                (Some(tx_hash), true) => Some(TxHandle::recovered(tx_hash.clone())),
                _ => None,
            };
            self.phase = if self.pending.is_some() {
                Phase::Placed
            } else {
                Phase::Done
            };
            self.position = Some(existing);
        }
        Ok(())
    }

    fn current_balance(&self) -> Option<Decimal> {
        let snapshot = self.ctx.balance.borrow();
        let snapshot = snapshot.as_ref()?;
        if snapshot.is_stale(self.config.max_balance_age) {
            debug!(
                age_secs = snapshot.age().num_seconds(),
                "Balance snapshot is stale, using approximate value"
            );
        }
        Some(snapshot.value)
    }

    async fn try_place(&mut self, epoch: u64) -> BotResult<()> {
        let Some(balance) = self.current_balance() else {
            debug!(epoch, "Balance unknown, waiting for first refresh");
            return Ok(());
        };

        let round = self.ctx.reader.round_details(epoch).await?;
        let block = self.ctx.reader.latest_block().await?;
        let paused = self.ctx.reader.is_paused().await?;

        if let Err(rejection) = self.strategy.admit(&round, block, paused, balance) {
            if rejection.is_terminal() {
                info!(epoch, %rejection, "Betting window closed without a bet");
                self.phase = Phase::Done;
            } else {
                if rejection.is_insufficient_funds() {
                    warn!(epoch, %rejection, "Insufficient funds to bet");
                } else {
                    debug!(epoch, %rejection, "Round not admissible");
                }
                self.phase = Phase::Waiting;
            }
            return Ok(());
        }

        if self.phase == Phase::Waiting {
            info!(epoch, block, lock_block = round.lock_block, %balance, "Round armed");
            self.phase = Phase::Armed;
        }

        let (primary, secondary) = match sample_pair(self.ctx.sampler.as_ref()).await? {
            PairSample::Both { primary, secondary } => (primary, secondary),
            PairSample::Partial { failed, error } => {
                warn!(epoch, source = %failed, %error, "Price sample incomplete, skipping tick");
                return Ok(());
            }
        };

        let verdict = self.strategy.decide(&round, &primary, &secondary, balance);
        self.last_decision = Some(verdict.decision().clone());

        match verdict {
            Verdict::Bet(decision) => self.place(&round, decision).await,
            Verdict::Pass(_) | Verdict::Rejected { .. } => Ok(()),
        }
    }

    async fn place(&mut self, round: &Round, decision: Decision) -> BotResult<()> {
        let Some(direction) = decision.direction else {
            return Ok(());
        };

        // nothing is sent unless the attempt is on disk
        let mut position = Position::pending(round.epoch, direction, decision.stake);
        self.ctx.store.record_bet(&position).await?;

        // PLACED regardless of outcome: one attempt per epoch
        self.phase = Phase::Placed;
        self.position = Some(position.clone());

        let handle = match self
            .ctx
            .executor
            .submit(LedgerCall::bet(direction), decision.stake)
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                position.status = PositionStatus::Failed;
                self.save(BetEvent::new(EventType::BetFailed, round.epoch))
                    .await;
                self.phase = Phase::Done;
                self.position = Some(position);
                return Err(e);
            }
        };

        position.tx_hash = Some(handle.tx_hash.clone());
        self.position = Some(position);
        self.pending = Some(handle.clone());
        self.save(BetEvent::submission(round.epoch, &handle.tx_hash))
            .await;

        info!(
            epoch = round.epoch,
            %direction,
            stake = %decision.stake,
            tx_hash = %handle.tx_hash,
            "Bet submitted"
        );
        self.ctx
            .notifier
            .notify(&bet_message(round, &decision, &handle.tx_hash), false)
            .await;

        match self
            .ctx
            .executor
            .await_receipt(&handle, self.config.receipt_timeout)
            .await
        {
            Ok(receipt) => self.finalize(receipt).await,
            Err(BotError::ReceiptTimeout { tx_hash, waited_secs }) => {
                warn!(epoch = round.epoch, %tx_hash, waited_secs, "Bet receipt timed out, will keep checking");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn check_pending(&mut self) -> BotResult<()> {
        let Some(handle) = self.pending.clone() else {
            self.phase = Phase::Done;
            return Ok(());
        };
        match self.ctx.executor.poll_receipt(&handle).await? {
            Some(receipt) => self.finalize(receipt).await,
            None => {
                debug!(tx_hash = %handle.tx_hash, "Bet still pending");
                Ok(())
            }
        }
    }

    async fn finalize(&mut self, receipt: Receipt) -> BotResult<()> {
        let status = if receipt.succeeded() {
            PositionStatus::Confirmed
        } else {
            PositionStatus::Failed
        };
        let Some(epoch) = self.position.as_ref().map(|p| p.epoch) else {
            self.pending = None;
            self.phase = Phase::Done;
            return Ok(());
        };

        if status == PositionStatus::Confirmed {
            info!(epoch, tx_hash = %receipt.tx_hash, "Bet confirmed");
        } else {
            warn!(epoch, tx_hash = %receipt.tx_hash, "Bet reverted");
        }
        self.save(BetEvent::outcome(epoch, status, Some(receipt.tx_hash))?)
            .await;

        if let Some(position) = self.position.as_mut() {
            position.status = status;
        }
        self.pending = None;
        self.phase = Phase::Done;
        Ok(())
    }

    // -- journal ------------------------------------------------------------

    /// Write `event`, or queue it behind earlier unsaved records.
    async fn save(&mut self, event: BetEvent) {
        if self.unsaved.is_empty() {
            match self.ctx.store.append(&event).await {
                Ok(_) => return,
                Err(e) => warn!(
                    epoch = event.epoch,
                    event = %event.event_type,
                    error = %e,
                    "Failed to record event, will retry"
                ),
            }
        }
        self.unsaved.push_back(event);
    }

    /// Write queued records in order, stopping at the first failure.
    async fn flush_unsaved(&mut self) -> BotResult<()> {
        while let Some(event) = self.unsaved.front() {
            self.ctx.store.append(event).await?;
            debug!(epoch = event.epoch, event = %event.event_type, "Queued event recorded");
            self.unsaved.pop_front();
        }
        Ok(())
    }

    // -- settlement ---------------------------------------------------------

    fn spawn_settlement(&mut self, epoch: u64) {
        let Some(worker) = self.settlement.clone() else {
            return;
        };
        self.settlements.spawn(async move {
            let result = worker.settle(epoch).await;
            match &result {
                Ok(outcome) => info!(epoch, %outcome, "Settlement finished"),
                Err(e) => warn!(epoch, error = %e, "Settlement failed"),
            }
            (epoch, result)
        });
    }

    fn reap_settlements(&mut self) {
        while let Some(joined) = self.settlements.try_join_next() {
            if let Err(e) = joined {
                error!(error = %e, "Settlement task panicked");
            }
        }
    }

    /// Wait for every in-flight settlement.
    pub async fn drain_settlements(&mut self) -> Vec<(u64, BotResult<SettlementOutcome>)> {
        let mut finished = Vec::new();
        while let Some(joined) = self.settlements.join_next().await {
            match joined {
                Ok(result) => finished.push(result),
                Err(e) => error!(error = %e, "Settlement task panicked"),
            }
        }
        finished
    }

    fn publish(&self) {
        self.status_tx.send_replace(LoopStatus {
            epoch: self.epoch,
            phase: self.phase,
            last_decision: self.last_decision.clone(),
            position: self.position.clone(),
            updated_at: Utc::now(),
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
