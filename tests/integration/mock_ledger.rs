//! In-memory ledger for integration testing.
//!
//! Implements `RoundReader`, `AccountReader` and `LedgerWriter` over a
//! simulated chain: one account, a nonce, round pools that move when we
//! bet, and claims that pay out using the contract's reward formula.
//! Everything is controllable from test code.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use roundwager::feeds::PriceSampler;
use roundwager::ledger::{
    classify_send_error, AccountReader, LedgerCall, LedgerWriter, RoundReader, TxParams,
};
use roundwager::notify::Notifier;
use roundwager::types::*;

pub const ACCOUNT: &str = "0x00000000000000000000000000000000000000a1";

/// Share of the pool paid to winners after the treasury fee.
const PAYOUT_SHARE: Decimal = dec!(0.97);

struct ChainState {
    epoch: u64,
    block: u64,
    paused: bool,
    balance: Decimal,
    nonce: u64,
    min_bet: Decimal,
    rounds: HashMap<u64, Round>,
    bets: HashMap<u64, (Direction, Decimal)>,
    claimed: HashSet<u64>,
    sent: Vec<(LedgerCall, TxParams)>,
    receipts: HashMap<String, TxStatus>,
    revert_claims: bool,
    hold_receipts: bool,
}

/// A simulated prediction contract and the account betting into it.
pub struct MockLedger {
    state: Mutex<ChainState>,
}

impl MockLedger {
    pub fn new(balance: Decimal) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ChainState {
                epoch: 0,
                block: 10_000,
                paused: false,
                balance,
                nonce: 0,
                min_bet: dec!(0.001),
                rounds: HashMap::new(),
                bets: HashMap::new(),
                claimed: HashSet::new(),
                sent: Vec::new(),
                receipts: HashMap::new(),
                revert_claims: false,
                hold_receipts: false,
            }),
        })
    }

    /// Start `epoch` at the current block with the given pool split.
    /// The round locks 100 blocks later.
    pub fn open_round(&self, epoch: u64, bull: Decimal, bear: Decimal) {
        let mut s = self.state.lock().unwrap();
        let block = s.block;
        s.epoch = epoch;
        s.rounds.insert(
            epoch,
            Round {
                epoch,
                start_block: block,
                lock_block: block + 100,
                end_block: block + 200,
                lock_price: Decimal::ZERO,
                close_price: Decimal::ZERO,
                total_amount: bull + bear,
                bull_amount: bull,
                bear_amount: bear,
                reward_base_cal_amount: Decimal::ZERO,
                reward_amount: Decimal::ZERO,
                oracle_called: false,
            },
        );
    }

    /// Move the chain to `blocks_before` blocks ahead of the current round's lock.
    pub fn approach_lock(&self, blocks_before: u64) {
        let mut s = self.state.lock().unwrap();
        let lock = s.rounds[&s.epoch].lock_block;
        s.block = lock - blocks_before;
    }

    /// Jump past the current round's end block.
    pub fn finish_current_round(&self) {
        let mut s = self.state.lock().unwrap();
        s.block = s.rounds[&s.epoch].end_block + 1;
    }

    /// Oracle closes `epoch`; rewards computed as the contract does.
    pub fn close_round(&self, epoch: u64, lock_price: Decimal, close_price: Decimal) {
        let mut s = self.state.lock().unwrap();
        let round = s.rounds.get_mut(&epoch).unwrap();
        round.lock_price = lock_price;
        round.close_price = close_price;
        round.oracle_called = true;
        let winner = round.result().unwrap();
        round.reward_base_cal_amount = round.side_amount(winner);
        round.reward_amount = round.total_amount * PAYOUT_SHARE;
    }

    pub fn set_paused(&self, paused: bool) {
        self.state.lock().unwrap().paused = paused;
    }

    pub fn set_balance(&self, balance: Decimal) {
        self.state.lock().unwrap().balance = balance;
    }

    pub fn set_min_bet(&self, min_bet: Decimal) {
        self.state.lock().unwrap().min_bet = min_bet;
    }

    pub fn set_revert_claims(&self, revert: bool) {
        self.state.lock().unwrap().revert_claims = revert;
    }

    /// Keep every receipt unmined until released.
    pub fn set_hold_receipts(&self, hold: bool) {
        self.state.lock().unwrap().hold_receipts = hold;
    }

    /// Transactions sent from the same account by someone else.
    pub fn external_transactions(&self, count: u64) {
        self.state.lock().unwrap().nonce += count;
    }

    pub fn sent(&self) -> Vec<(LedgerCall, TxParams)> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn wallet_balance(&self) -> Decimal {
        self.state.lock().unwrap().balance
    }

    pub fn round(&self, epoch: u64) -> Round {
        self.state.lock().unwrap().rounds[&epoch].clone()
    }
}

#[async_trait]
impl RoundReader for MockLedger {
    async fn current_epoch(&self) -> BotResult<u64> {
        Ok(self.state.lock().unwrap().epoch)
    }

    async fn round_details(&self, epoch: u64) -> BotResult<Round> {
        self.state
            .lock()
            .unwrap()
            .rounds
            .get(&epoch)
            .cloned()
            .ok_or_else(|| BotError::transient("rounds", format!("unknown epoch {epoch}")))
    }

    async fn is_paused(&self) -> BotResult<bool> {
        Ok(self.state.lock().unwrap().paused)
    }

    async fn latest_block(&self) -> BotResult<u64> {
        Ok(self.state.lock().unwrap().block)
    }

    async fn min_bet_amount(&self) -> BotResult<Decimal> {
        Ok(self.state.lock().unwrap().min_bet)
    }

    async fn claimable(&self, epoch: u64) -> BotResult<bool> {
        let s = self.state.lock().unwrap();
        let winner = s.rounds.get(&epoch).and_then(Round::result);
        let ours = s.bets.get(&epoch).map(|(direction, _)| *direction);
        Ok(winner.is_some() && winner == ours && !s.claimed.contains(&epoch))
    }

    async fn block_timestamp(&self, _block: u64) -> BotResult<DateTime<Utc>> {
        Ok(Utc::now())
    }
}

#[async_trait]
impl AccountReader for MockLedger {
    async fn balance(&self) -> BotResult<Decimal> {
        Ok(self.state.lock().unwrap().balance)
    }

    async fn transaction_count(&self) -> BotResult<u64> {
        Ok(self.state.lock().unwrap().nonce)
    }
}

#[async_trait]
impl LedgerWriter for MockLedger {
    async fn send(&self, call: LedgerCall, params: TxParams) -> BotResult<String> {
        let mut s = self.state.lock().unwrap();

        if params.nonce < s.nonce {
            return Err(classify_send_error(params.nonce, "nonce too low"));
        }
        if params.value > s.balance {
            return Err(classify_send_error(
                params.nonce,
                "insufficient funds for gas * price + value",
            ));
        }

        s.nonce = params.nonce + 1;
        s.balance -= params.value;
        let tx_hash = format!("0x{:064x}", params.nonce);

        let status = match call {
            LedgerCall::BetUp | LedgerCall::BetDown => {
                let direction = if call == LedgerCall::BetUp {
                    Direction::Up
                } else {
                    Direction::Down
                };
                let epoch = s.epoch;
                if let Some(round) = s.rounds.get_mut(&epoch) {
                    round.total_amount += params.value;
                    match direction {
                        Direction::Up => round.bull_amount += params.value,
                        Direction::Down => round.bear_amount += params.value,
                    }
                }
                s.bets.insert(epoch, (direction, params.value));
                TxStatus::Success
            }
            LedgerCall::Claim(epoch) => {
                if s.revert_claims {
                    TxStatus::Reverted
                } else {
                    let round = s.rounds[&epoch].clone();
                    let (_, stake) = s.bets[&epoch];
                    s.balance += stake * round.reward_amount / round.reward_base_cal_amount;
                    s.claimed.insert(epoch);
                    TxStatus::Success
                }
            }
        };

        s.receipts.insert(tx_hash.clone(), status);
        s.sent.push((call, params));
        Ok(tx_hash)
    }

    async fn receipt(&self, tx_hash: &str) -> BotResult<Option<TxStatus>> {
        let s = self.state.lock().unwrap();
        if s.hold_receipts {
            return Ok(None);
        }
        Ok(s.receipts.get(tx_hash).copied())
    }
}

// ---------------------------------------------------------------------------
// Feeds and notifications
// ---------------------------------------------------------------------------

/// Both feeds answer with fixed prices, adjustable between ticks.
pub struct FixedSampler {
    prices: Mutex<(Decimal, Decimal)>,
}

impl FixedSampler {
    pub fn new(primary: Decimal, secondary: Decimal) -> Arc<Self> {
        Arc::new(Self {
            prices: Mutex::new((primary, secondary)),
        })
    }

    pub fn set(&self, primary: Decimal, secondary: Decimal) {
        *self.prices.lock().unwrap() = (primary, secondary);
    }
}

#[async_trait]
impl PriceSampler for FixedSampler {
    async fn sample_primary(&self) -> BotResult<PriceSample> {
        let (primary, _) = *self.prices.lock().unwrap();
        Ok(PriceSample::new(PriceSource::Primary, primary))
    }

    async fn sample_secondary(&self) -> BotResult<PriceSample> {
        let (_, secondary) = *self.prices.lock().unwrap();
        Ok(PriceSample::new(PriceSource::Secondary, secondary))
    }
}

/// Keeps every message for inspection.
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(String, bool)>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<(String, bool)> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, text: &str, silent: bool) {
        self.messages.lock().unwrap().push((text.to_string(), silent));
    }
}
