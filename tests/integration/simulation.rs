//! End-to-end rounds against the in-memory ledger.
//!
//! Each test wires the real engine (executor, betting loop, settlement,
//! storage) to `MockLedger` and drives it tick by tick.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

use roundwager::engine::accountant::Accountant;
use roundwager::engine::balance::{BalanceConfig, BalanceRefresher};
use roundwager::engine::betting_loop::{BettingLoop, LoopConfig, LoopContext, Phase};
use roundwager::engine::executor::{ExecutorConfig, TransactionExecutor};
use roundwager::engine::heartbeat::Heartbeat;
use roundwager::engine::settlement::{SettlementOutcome, SettlementWorker};
use roundwager::ledger::LedgerCall;
use roundwager::storage::{EventType, PositionStore};
use roundwager::strategy::admission::{AdmissionConfig, AdmissionController};
use roundwager::strategy::kelly::{SizingConfig, StakeSizer};
use roundwager::strategy::Strategy;
use roundwager::types::*;

use crate::mock_ledger::{FixedSampler, MockLedger, RecordingNotifier, ACCOUNT};

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Agent {
    ledger: Arc<MockLedger>,
    sampler: Arc<FixedSampler>,
    notifier: Arc<RecordingNotifier>,
    store: PositionStore,
    refresher: BalanceRefresher,
    betting: BettingLoop,
}

fn strategy() -> Strategy {
    Strategy::new(
        AdmissionController::new(AdmissionConfig {
            blocks_away: 5,
            execution_block: 1,
            min_balance: dec!(0.1),
            min_pool_size: Decimal::ZERO,
            min_bet_odds: dec!(1.2),
        }),
        StakeSizer::new(SizingConfig {
            win_probability: dec!(0.5),
            bet_threshold: dec!(0.01),
            ..SizingConfig::default()
        }),
    )
}

fn executor(ledger: &Arc<MockLedger>, dry_run: bool) -> Arc<TransactionExecutor> {
    Arc::new(TransactionExecutor::new(
        ExecutorConfig {
            account: ACCOUNT.into(),
            dry_run,
            receipt_poll_interval: Duration::from_millis(5),
            ..ExecutorConfig::default()
        },
        ledger.clone(),
        ledger.clone(),
    ))
}

async fn agent(ledger: Arc<MockLedger>, store: PositionStore, dry_run: bool) -> Agent {
    let sampler = FixedSampler::new(dec!(306), dec!(300));
    let notifier = Arc::new(RecordingNotifier::default());
    let executor = executor(&ledger, dry_run);

    let (refresher, balance) = BalanceRefresher::new(
        ledger.clone(),
        BalanceConfig {
            refresh_interval: Duration::from_secs(3_600),
            gas_reserve: Decimal::ZERO,
            balance_override: Decimal::ZERO,
        },
    );
    refresher.refresh().await.unwrap();

    let settlement = Arc::new(SettlementWorker::new(
        ledger.clone(),
        executor.clone(),
        store.clone(),
        notifier.clone(),
        Duration::from_millis(50),
    ));

    let betting = BettingLoop::new(
        LoopConfig {
            receipt_timeout: Duration::from_millis(30),
            ..LoopConfig::default()
        },
        strategy(),
        LoopContext {
            reader: ledger.clone(),
            sampler: sampler.clone(),
            executor,
            store: store.clone(),
            notifier: notifier.clone(),
            balance,
        },
    )
    .with_settlement(settlement);

    Agent {
        ledger,
        sampler,
        notifier,
        store,
        refresher,
        betting,
    }
}

/// Ledger with epoch 10 open, 3 blocks before lock, bull 10 / bear 20.
async fn armed_agent(dry_run: bool) -> Agent {
    let ledger = MockLedger::new(dec!(4));
    ledger.open_round(10, dec!(10), dec!(20));
    ledger.approach_lock(3);
    agent(ledger, PositionStore::in_memory().await.unwrap(), dry_run).await
}

/// Roll the chain forward to `epoch`, far from its lock.
fn advance_to(ledger: &MockLedger, epoch: u64) {
    ledger.finish_current_round();
    ledger.open_round(epoch, dec!(5), dec!(5));
}

async fn settlement_of(agent: &mut Agent, epoch: u64) -> SettlementOutcome {
    agent
        .betting
        .drain_settlements()
        .await
        .into_iter()
        .find(|(e, _)| *e == epoch)
        .map(|(_, outcome)| outcome.unwrap())
        .unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_bet_then_claim_winnings() {
    let mut a = armed_agent(false).await;

    a.betting.tick().await.unwrap();
    assert_eq!(a.betting.phase(), Phase::Done);
    let position = a.betting.position().unwrap().clone();
    assert_eq!(position.direction, Direction::Up);
    assert_eq!(position.stake, dec!(0.5));
    assert_eq!(position.status, PositionStatus::Confirmed);
    assert_eq!(a.ledger.round(10).bull_amount, dec!(10.5));

    a.ledger.close_round(10, dec!(300), dec!(305));
    advance_to(&a.ledger, 11);
    a.betting.tick().await.unwrap();
    assert_eq!(a.betting.phase(), Phase::Waiting);

    advance_to(&a.ledger, 12);
    a.betting.tick().await.unwrap();
    match settlement_of(&mut a, 10).await {
        SettlementOutcome::Claimed { tx_hash } => assert!(tx_hash.starts_with("0x")),
        other => panic!("expected a claim, got {other}"),
    }

    assert!(a.store.is_claimed(10).await.unwrap());
    let sent = a.ledger.sent();
    assert_eq!(sent.len(), 2);
    let (call, params) = &sent[1];
    assert_eq!(*call, LedgerCall::Claim(10));
    assert_eq!(params.nonce, 1);
    assert_eq!(params.value, Decimal::ZERO);
    assert!(a.ledger.wallet_balance() > dec!(4));

    let texts: Vec<String> = a.notifier.messages().into_iter().map(|(t, _)| t).collect();
    assert!(texts.iter().any(|t| t.starts_with("Bet placed")));
    assert!(texts.iter().any(|t| t.starts_with("Claimed")));
}

#[tokio::test]
async fn test_losing_round_sends_no_claim() {
    let mut a = armed_agent(false).await;
    a.betting.tick().await.unwrap();

    a.ledger.close_round(10, dec!(300), dec!(295));
    advance_to(&a.ledger, 12);
    a.betting.tick().await.unwrap();

    assert_eq!(settlement_of(&mut a, 10).await, SettlementOutcome::Lost);
    assert_eq!(a.ledger.sent().len(), 1);
}

#[tokio::test]
async fn test_reverted_claim_is_recorded() {
    let mut a = armed_agent(false).await;
    a.betting.tick().await.unwrap();

    a.ledger.set_revert_claims(true);
    a.ledger.close_round(10, dec!(300), dec!(305));
    advance_to(&a.ledger, 12);
    a.betting.tick().await.unwrap();

    assert!(matches!(
        settlement_of(&mut a, 10).await,
        SettlementOutcome::ClaimReverted { .. }
    ));
    assert!(!a.store.is_claimed(10).await.unwrap());
    let last = a.store.events_for_epoch(10).await.unwrap().pop().unwrap();
    assert_eq!(last.event_type, EventType::ClaimReverted);
}

#[tokio::test]
async fn test_one_bet_per_epoch_across_ticks() {
    let mut a = armed_agent(false).await;
    for _ in 0..4 {
        a.betting.tick().await.unwrap();
    }
    // a wider premium on a later tick changes nothing
    a.sampler.set(dec!(320), dec!(300));
    a.betting.tick().await.unwrap();

    assert_eq!(a.ledger.sent().len(), 1);
    assert_eq!(a.store.positions().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_waits_for_window_then_bets() {
    let ledger = MockLedger::new(dec!(4));
    ledger.open_round(10, dec!(10), dec!(20));
    ledger.approach_lock(40);
    let mut a = agent(ledger, PositionStore::in_memory().await.unwrap(), false).await;

    a.betting.tick().await.unwrap();
    assert_eq!(a.betting.phase(), Phase::Waiting);
    assert!(a.ledger.sent().is_empty());

    a.ledger.approach_lock(2);
    a.betting.tick().await.unwrap();
    assert_eq!(a.betting.phase(), Phase::Done);
    assert_eq!(a.ledger.sent().len(), 1);
}

#[tokio::test]
async fn test_paused_contract_is_never_bet() {
    let a_ledger = MockLedger::new(dec!(4));
    a_ledger.open_round(10, dec!(10), dec!(20));
    a_ledger.approach_lock(3);
    a_ledger.set_paused(true);
    let mut a = agent(a_ledger, PositionStore::in_memory().await.unwrap(), false).await;

    a.betting.tick().await.unwrap();
    assert_eq!(a.betting.phase(), Phase::Waiting);
    assert!(a.ledger.sent().is_empty());
}

#[tokio::test]
async fn test_narrow_premium_passes() {
    let mut a = armed_agent(false).await;
    a.sampler.set(dec!(300.5), dec!(300));

    a.betting.tick().await.unwrap();
    assert_eq!(a.betting.phase(), Phase::Armed);
    assert!(a.ledger.sent().is_empty());
}

#[tokio::test]
async fn test_dry_run_never_broadcasts() {
    let mut a = armed_agent(true).await;

    a.betting.tick().await.unwrap();
    assert_eq!(a.betting.phase(), Phase::Done);
    assert!(a.ledger.sent().is_empty());

    let stored = a.store.position_for_epoch(10).await.unwrap().unwrap();
    assert_eq!(stored.status, PositionStatus::Confirmed);
    assert!(stored.tx_hash.unwrap().starts_with(DRY_RUN_PREFIX));
}

#[tokio::test]
async fn test_restart_does_not_double_bet() {
    let a = {
        let mut first = armed_agent(false).await;
        first.betting.tick().await.unwrap();
        first
    };
    assert_eq!(a.ledger.sent().len(), 1);

    let mut restarted = agent(a.ledger.clone(), a.store.clone(), false).await;
    restarted.betting.tick().await.unwrap();

    assert_eq!(restarted.betting.phase(), Phase::Done);
    assert_eq!(restarted.ledger.sent().len(), 1);
}

#[tokio::test]
async fn test_pending_receipt_confirmed_on_later_tick() {
    let mut a = armed_agent(false).await;
    a.ledger.set_hold_receipts(true);

    a.betting.tick().await.unwrap();
    assert_eq!(a.betting.phase(), Phase::Placed);
    assert!(a.betting.position().unwrap().is_pending());

    a.ledger.set_hold_receipts(false);
    a.betting.tick().await.unwrap();
    assert_eq!(a.betting.phase(), Phase::Done);
    let stored = a.store.position_for_epoch(10).await.unwrap().unwrap();
    assert_eq!(stored.status, PositionStatus::Confirmed);
    assert_eq!(a.ledger.sent().len(), 1);
}

#[tokio::test]
async fn test_insufficient_funds_fails_the_epoch() {
    let mut a = armed_agent(false).await;
    // wallet drained after the last balance refresh
    a.ledger.set_balance(dec!(0.2));

    let err = a.betting.tick().await.unwrap_err();
    assert!(matches!(err, BotError::InsufficientFunds(_)));
    assert_eq!(a.betting.phase(), Phase::Done);

    a.betting.tick().await.unwrap();
    let stored = a.store.position_for_epoch(10).await.unwrap().unwrap();
    assert_eq!(stored.status, PositionStatus::Failed);
    assert!(a.ledger.sent().is_empty());

    // the refreshed balance keeps the next epoch out too
    a.ledger.set_balance(dec!(0.05));
    a.refresher.refresh().await.unwrap();
    advance_to(&a.ledger, 11);
    a.ledger.approach_lock(3);
    a.betting.tick().await.unwrap();
    assert_eq!(a.betting.phase(), Phase::Waiting);
}

#[tokio::test]
async fn test_nonce_tracks_external_transactions() {
    let ledger = MockLedger::new(dec!(4));
    let exec = executor(&ledger, false);

    let first = exec.submit(LedgerCall::BetUp, dec!(0.1)).await.unwrap();
    assert_eq!(first.nonce, Some(0));

    ledger.external_transactions(2);
    let second = exec.submit(LedgerCall::BetDown, dec!(0.1)).await.unwrap();
    assert_eq!(second.nonce, Some(3));

    let third = exec.submit(LedgerCall::BetDown, dec!(0.1)).await.unwrap();
    assert_eq!(third.nonce, Some(4));
    assert_eq!(exec.nonce_counter().await, 5);
}

#[tokio::test]
async fn test_accountant_reports_win() {
    let mut a = armed_agent(false).await;
    a.betting.tick().await.unwrap();
    a.ledger.close_round(10, dec!(300), dec!(305));

    let report = Accountant::review(&a.store, a.ledger.as_ref()).await.unwrap();
    assert_eq!(report.bets, 1);
    assert_eq!(report.wins, 1);
    assert_eq!(report.win_rate, Decimal::ONE);
    assert!(report.net_pnl > Decimal::ZERO);
    assert_eq!(report.rows[0].result, Some(Direction::Up));
}

#[tokio::test]
async fn test_heartbeat_reads_chain_and_balance() {
    let a = armed_agent(false).await;
    let heartbeat = Heartbeat::new(
        "rw-sim".into(),
        Duration::from_secs(60),
        a.ledger.clone(),
        a.notifier.clone(),
        a.refresher.subscribe(),
    );

    let report = heartbeat.beat().await.unwrap();
    assert_eq!(report.epoch, 10);
    assert_eq!(report.balance, Some(dec!(4)));
    let (text, silent) = a.notifier.messages().pop().unwrap();
    assert!(silent);
    assert!(text.starts_with("rw-sim status"));
}

#[tokio::test]
async fn test_status_api_follows_loop() {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use roundwager::dashboard::{build_router, StatusState};
    use tower::ServiceExt;

    let mut a = armed_agent(false).await;
    let state = Arc::new(StatusState::new(
        "rw-sim".into(),
        a.betting.subscribe(),
        a.refresher.subscribe(),
        a.store.clone(),
    ));
    a.betting.tick().await.unwrap();

    let resp = build_router(state.clone())
        .oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["epoch"], 10);
    assert_eq!(json["phase"], "DONE");

    let resp = build_router(state)
        .oneshot(Request::builder().uri("/api/positions/10").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
